//! Checks that concurrent readers see exactly as much of concurrent writes
//! as the configured isolation level allows.
//!
//! Writers repeatedly put a poison value (`-1`) and then a random
//! non-negative value into one shared key within a single transaction.
//! Readers read the key many times per transaction and record whether it
//! changed between two reads. Under repeatable read no reader may ever see a
//! change; under read committed at least one reader in the cluster must. A
//! reader that sees the poison value, or anything that is not a
//! non-negative long, has witnessed a dirty read and fails the stage.

use crate::core::{
  AckResult, AckSet, CommitOutcome, ProbeError, Store, Value, Verdict,
};
use crate::probes::{run_for, ProbeBody, ProbeControl};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};
use validator::Validate;

pub const ISOLATION_CHECK_KEY: &str = "isolationCheckKey";
const POISON: i64 = -1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
  RepeatableRead,
  ReadCommitted,
}
impl FromStr for IsolationLevel {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "REPEATABLE_READ" => Ok(IsolationLevel::RepeatableRead),
      "READ_COMMITTED" => Ok(IsolationLevel::ReadCommitted),
      _ => Err(format!(
        "Expected level should be one of READ_COMMITTED and REPEATABLE_READ, \
         got {}",
        s
      )),
    }
  }
}
impl fmt::Display for IsolationLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      IsolationLevel::RepeatableRead => f.write_str("REPEATABLE_READ"),
      IsolationLevel::ReadCommitted => f.write_str("READ_COMMITTED"),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct IsolationConfig {
  /// How long readers and writers run. default: `60 s`
  pub duration: Duration,
  /// default: `2`
  pub writer_threads: usize,
  /// default: `10`
  pub reader_threads: usize,
  /// Reads per reader transaction. default: `30`
  #[validate(range(min = 1))]
  pub transaction_size: usize,
  /// The level the store is configured with. No default.
  pub expected_isolation_level: IsolationLevel,
  /// Pause between the poison write and the real write. default: `10 ms`
  pub writer_pause: Duration,
  /// Pause after every read. default: `10 ms`
  pub read_pause: Duration,
}
impl IsolationConfig {
  pub fn new(expected_isolation_level: IsolationLevel) -> IsolationConfig {
    IsolationConfig {
      duration: Duration::from_secs(60),
      writer_threads: 2,
      reader_threads: 10,
      transaction_size: 30,
      expected_isolation_level: expected_isolation_level,
      writer_pause: Duration::from_millis(10),
      read_pause: Duration::from_millis(10),
    }
  }
}

/// Runs readers and writers against the worker's node. Returns whether any
/// reader saw the value change inside a transaction.
pub fn isolation_on_worker(
  config: &IsolationConfig,
  store: &dyn Store,
) -> Result<bool, ProbeError> {
  store.put(ISOLATION_CHECK_KEY, Value::Long(0)).map_err(|e| {
    ProbeError::Failed(format!("Failed to insert first value: {}", e))
  })?;
  let mut bodies = Vec::new();
  for i in 0..config.writer_threads {
    let body: ProbeBody<'_, bool> =
      Box::new(move |ctl| writer(config, store, ctl));
    bodies.push((format!("Writer-{}", i), body));
  }
  for i in 0..config.reader_threads {
    let body: ProbeBody<'_, bool> =
      Box::new(move |ctl| reader(config, store, ctl));
    bodies.push((format!("Reader-{}", i), body));
  }
  let control = ProbeControl::new("isolation");
  let changes = run_for(&control, config.duration, bodies)?;
  Ok(changes.into_iter().any(|c| c))
}

fn writer(
  config: &IsolationConfig,
  store: &dyn Store,
  control: &ProbeControl,
) -> Result<bool, ProbeError> {
  let mut rng = SmallRng::from_entropy();
  while !control.is_finished() {
    trace!("Starting transaction");
    let mut tx = store.begin()?;
    tx.put(ISOLATION_CHECK_KEY, Value::Long(POISON))?;
    thread::sleep(config.writer_pause);
    let value = rng.gen_range(0..1000);
    tx.put(ISOLATION_CHECK_KEY, Value::Long(value))?;
    match tx.commit()? {
      CommitOutcome::Committed => trace!("Inserted value {}", value),
      CommitOutcome::Conflict => trace!("Write of {} conflicted", value),
    }
  }
  Ok(false)
}

fn reader(
  config: &IsolationConfig,
  store: &dyn Store,
  control: &ProbeControl,
) -> Result<bool, ProbeError> {
  let mut change_detected = false;
  while !control.is_finished() {
    trace!("Starting transaction");
    let mut tx = store.begin()?;
    let mut last = None;
    for _ in 0..config.transaction_size {
      let value = tx.get(ISOLATION_CHECK_KEY)?;
      let current = match value.as_ref().and_then(Value::as_long) {
        Some(l) if l >= 0 => l,
        _ => {
          if let Err(e) = tx.rollback() {
            warn!("Rollback after unexpected value failed: {}", e);
          }
          return Err(ProbeError::ProtocolViolation(format!(
            "Unexpected value {}",
            value.map_or_else(|| "null".to_string(), |v| v.to_string())
          )));
        }
      };
      trace!("Read value {}, previous value is {:?}", current, last);
      if last.map_or(false, |l| l != current) {
        trace!("Change detected");
        change_detected = true;
      }
      last = Some(current);
      thread::sleep(config.read_pause);
    }
    tx.commit()?;
  }
  Ok(change_detected)
}

pub fn isolation_on_master(config: &IsolationConfig, acks: &AckSet) -> Verdict {
  let level = config.expected_isolation_level;
  let mut verdict = Verdict::pass();
  let mut any_change = false;
  for ack in acks.iter() {
    if let AckResult::Change(changed) = ack.result {
      debug!("Value change detected on worker {}: {}", ack.worker, changed);
      if level == IsolationLevel::RepeatableRead && changed {
        verdict.fail(format!(
          "Worker {} detected a value change but this should not happen with \
           isolation {}",
          ack.worker, level
        ));
      }
      any_change |= changed;
    }
  }
  if level == IsolationLevel::ReadCommitted && !any_change {
    verdict.fail(format!(
      "Value change was expected with isolation {} but none was detected",
      level
    ));
  }
  verdict
}

#[test]
fn test_isolation_level_names() {
  assert_eq!(
    "read_committed".parse::<IsolationLevel>(),
    Ok(IsolationLevel::ReadCommitted)
  );
  assert_eq!(
    "REPEATABLE_READ".parse::<IsolationLevel>(),
    Ok(IsolationLevel::RepeatableRead)
  );
  assert!("SERIALIZABLE".parse::<IsolationLevel>().is_err());
  assert_eq!(IsolationLevel::RepeatableRead.to_string(), "REPEATABLE_READ");
}
