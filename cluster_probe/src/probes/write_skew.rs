use crate::core::{
  AckResult, AckSet, CommitOutcome, CounterAck, ProbeError, Store, Value,
  Verdict,
};
use crate::probes::{run_for, ProbeBody, ProbeControl};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace};
use validator::Validate;

pub const WRITE_SKEW_CHECK_KEY: &str = "writeSkewCheckKey";

/// Threads on every worker increment one shared counter in optimistic
/// transactions. Every attempt must either land in the counter or be
/// rejected as a conflict.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct WriteSkewConfig {
  /// default: `60 s`
  pub duration: Duration,
  /// Incrementing threads per worker. default: `10`
  #[validate(range(min = 1))]
  pub threads: usize,
  /// Start from an absent counter instead of seeding it with zero, which
  /// also tests the skew between "absent" and the first value.
  /// default: `false`
  pub test_null: bool,
  /// Time given to the cluster after seeding the counter, and again before
  /// reading its final value. default: `30 s`
  pub settle_delay: Duration,
}
impl Default for WriteSkewConfig {
  fn default() -> Self {
    WriteSkewConfig {
      duration: Duration::from_secs(60),
      threads: 10,
      test_null: false,
      settle_delay: Duration::from_secs(30),
    }
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct ThreadCounters {
  attempts: u64,
  skews: u64,
}

pub fn write_skew_on_worker(
  config: &WriteSkewConfig,
  store: &dyn Store,
) -> Result<CounterAck, ProbeError> {
  if !config.test_null {
    store.put(WRITE_SKEW_CHECK_KEY, Value::Long(0)).map_err(|e| {
      ProbeError::Failed(format!("Failed to insert initial zero: {}", e))
    })?;
    thread::sleep(config.settle_delay);
  }
  let bodies = (0..config.threads)
    .map(|i| {
      let body: ProbeBody<'_, ThreadCounters> =
        Box::new(move |ctl| increment_loop(store, ctl));
      (format!("WriteSkew-{}", i), body)
    })
    .collect();
  let control = ProbeControl::new("write skew");
  let counters = run_for(&control, config.duration, bodies)?;
  thread::sleep(config.settle_delay);

  let final_value = match store.get(WRITE_SKEW_CHECK_KEY)? {
    Some(Value::Long(l)) => l,
    other => {
      return Err(ProbeError::ProtocolViolation(format!(
        "Counter is not a long: it is {}",
        other.map_or_else(|| "null".to_string(), |v| v.to_string())
      )))
    }
  };
  Ok(CounterAck {
    total_attempts: counters.iter().map(|c| c.attempts).sum(),
    conflicts_detected: counters.iter().map(|c| c.skews).sum(),
    final_counter_value: final_value,
  })
}

fn increment_loop(
  store: &dyn Store,
  control: &ProbeControl,
) -> Result<ThreadCounters, ProbeError> {
  let mut counters = ThreadCounters::default();
  while !control.is_finished() {
    trace!("Starting transaction");
    let mut tx = store.begin()?;
    let prior = match tx.get(WRITE_SKEW_CHECK_KEY)? {
      None => 0,
      Some(Value::Long(l)) => l,
      Some(other) => {
        return Err(ProbeError::ProtocolViolation(format!(
          "Counter is not a long: it is {}",
          other
        )))
      }
    };
    tx.put(WRITE_SKEW_CHECK_KEY, Value::Long(prior + 1))?;
    let skew = match tx.commit() {
      Ok(CommitOutcome::Committed) => false,
      Ok(CommitOutcome::Conflict) => true,
      Err(e) => {
        trace!("Commit failed: {}", e);
        true
      }
    };
    if skew {
      trace!("Skew detected");
      counters.skews += 1;
    } else if prior == 0 {
      trace!("Successfully inserted 1");
    }
    counters.attempts += 1;
  }
  Ok(counters)
}

/// Checks `final value + conflicts == attempts` over the whole cluster. The
/// final value is the highest one read back by any worker.
pub fn write_skew_on_master(
  config: &WriteSkewConfig,
  acks: &AckSet,
) -> Verdict {
  let mut verdict = Verdict::pass();
  let mut attempts = 0u64;
  let mut skews = 0u64;
  let mut max_value = None;
  for ack in acks.iter() {
    if let AckResult::Counters(c) = &ack.result {
      debug!("Worker {} reports {:?}", ack.worker, c);
      attempts += c.total_attempts;
      skews += c.conflicts_detected;
      max_value = max_value.max(Some(c.final_counter_value));
    }
  }
  let max_value = match max_value {
    Some(v) => v,
    None => {
      verdict.fail("No worker reported write skew counters");
      return verdict;
    }
  };
  info!(
    "Total increments: {}, skews: {}, stored value: {}",
    attempts, skews, max_value
  );
  let successful = attempts as i64 - skews as i64;
  if max_value != successful {
    verdict.fail(format!(
      "The store holds counter value {} but workers report {} successful \
       increments, a difference of {}",
      max_value,
      successful,
      successful - max_value
    ));
  } else {
    verdict.note(format!(
      "Performed {} successful increments in {:?}",
      successful, config.duration
    ));
  }
  verdict
}
