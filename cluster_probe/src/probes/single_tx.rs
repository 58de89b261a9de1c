use crate::core::{ClusterTopology, CommitOutcome, ProbeError, Store, Value};
use crate::probes::{run_for, ProbeBody, ProbeControl};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};
use validator::Validate;

const TX_KEY_PREFIX: &str = "txKey";
const TX_VALUE_PREFIX: &str = "txValue";

/// Every thread of every worker writes (or removes) `txKey0..N` in one
/// transaction, then commits or rolls back depending on whether its worker
/// and thread are in the commit sets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SingleTxLoadConfig {
  /// Enforced length of each transaction, spread evenly over its
  /// operations. default: `0 s`
  pub duration: Duration,
  /// Transactions per worker, one per thread. default: `1`
  #[validate(range(min = 1))]
  pub threads: usize,
  /// Workers whose transactions commit, `None` for all. default: `None`
  pub commit_workers: Option<BTreeSet<usize>>,
  /// Threads whose transactions commit, `None` for all. default: `None`
  pub commit_threads: Option<BTreeSet<usize>>,
  /// Keys written per transaction. default: `20`
  #[validate(range(min = 1))]
  pub transaction_size: u32,
  /// Remove the keys instead of writing them. default: `false`
  pub delete: bool,
}
impl Default for SingleTxLoadConfig {
  fn default() -> Self {
    SingleTxLoadConfig {
      duration: Duration::ZERO,
      threads: 1,
      commit_workers: None,
      commit_threads: None,
      transaction_size: 20,
      delete: false,
    }
  }
}

/// Checks the outcome of a [`SingleTxLoadConfig`] run: every key carries
/// the tag of one and the same committer, which must be allowed to commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SingleTxCheckConfig {
  /// Workers that may have committed, `None` for all. default: `None`
  pub commit_workers: Option<BTreeSet<usize>>,
  /// Threads that may have committed, `None` for all. default: `None`
  pub commit_threads: Option<BTreeSet<usize>>,
  /// default: `20`
  #[validate(range(min = 1))]
  pub transaction_size: u32,
  /// Expect every key to be absent. default: `false`
  pub deleted: bool,
}
impl Default for SingleTxCheckConfig {
  fn default() -> Self {
    SingleTxCheckConfig {
      commit_workers: None,
      commit_threads: None,
      transaction_size: 20,
      deleted: false,
    }
  }
}

/// The worker and thread whose transaction wrote a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Committer {
  pub worker: usize,
  pub thread: usize,
}
impl fmt::Display for Committer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.worker, self.thread)
  }
}

pub fn tx_key(i: u32) -> String {
  format!("{}{}", TX_KEY_PREFIX, i)
}

/// `txValue<i>@<worker>-<thread>`
pub fn tx_value(i: u32, committer: Committer) -> Value {
  Value::Text(format!("{}{}@{}", TX_VALUE_PREFIX, i, committer))
}

fn parse_tx_value(value: &Value) -> Option<(u32, Committer)> {
  let text = match value {
    Value::Text(t) => t.strip_prefix(TX_VALUE_PREFIX)?,
    _ => return None,
  };
  let (index, tag) = text.split_once('@')?;
  let (worker, thread) = tag.split_once('-')?;
  let committer = Committer {
    worker: worker.parse().ok()?,
    thread: thread.parse().ok()?,
  };
  Some((index.parse().ok()?, committer))
}

fn allowed(set: &Option<BTreeSet<usize>>, member: usize) -> bool {
  set.as_ref().map_or(true, |s| s.contains(&member))
}

/// Runs one transaction per configured thread and waits for all of them.
/// Returns how many transactions committed.
pub fn single_tx_load_on_worker(
  config: &SingleTxLoadConfig,
  topology: &ClusterTopology,
  store: &dyn Store,
) -> Result<usize, ProbeError> {
  let worker = topology.worker_index;
  let bodies = (0..config.threads)
    .map(|thread| {
      let committer = Committer {
        worker: worker,
        thread: thread,
      };
      let body: ProbeBody<'_, bool> =
        Box::new(move |_| run_transaction(config, store, committer));
      (format!("ClientThread-{}", committer), body)
    })
    .collect();
  let control = ProbeControl::new("single transaction");
  let committed = run_for(&control, Duration::ZERO, bodies)?
    .into_iter()
    .filter(|c| *c)
    .count();
  info!(
    "Worker {} committed {} of {} transactions",
    worker, committed, config.threads
  );
  Ok(committed)
}

// Returns whether the transaction committed.
fn run_transaction(
  config: &SingleTxLoadConfig,
  store: &dyn Store,
  committer: Committer,
) -> Result<bool, ProbeError> {
  let pause = config.duration / config.transaction_size;
  trace!("Beginning transaction");
  let mut tx = store.begin()?;
  for i in 0..config.transaction_size {
    let key = tx_key(i);
    let res = if config.delete {
      tx.remove(&key)
    } else {
      tx.put(&key, tx_value(i, committer))
    };
    if let Err(e) = res {
      error!(
        "Failed to {} key {}: {}",
        if config.delete { "remove" } else { "insert" },
        key,
        e
      );
      return Err(e.into());
    }
    if pause > Duration::ZERO {
      thread::sleep(pause);
    }
  }
  let commits = allowed(&config.commit_workers, committer.worker)
    && allowed(&config.commit_threads, committer.thread);
  if !commits {
    tx.rollback()?;
    debug!("Rolled back transaction of {}", committer);
    return Ok(false);
  }
  match tx.commit()? {
    CommitOutcome::Committed => {
      trace!("Committed transaction of {}", committer);
      Ok(true)
    }
    CommitOutcome::Conflict => {
      warn!("Transaction of {} was rejected on commit", committer);
      Ok(false)
    }
  }
}

/// Reads every transaction key back. Returns the committer found on the
/// keys, `None` in deletion mode.
pub fn single_tx_check_on_worker(
  config: &SingleTxCheckConfig,
  store: &dyn Store,
) -> Result<Option<Committer>, ProbeError> {
  let mut committer: Option<Committer> = None;
  for i in 0..config.transaction_size {
    let key = tx_key(i);
    let value = store.get(&key).map_err(|e| {
      ProbeError::Failed(format!("Failed to get key {}: {}", key, e))
    })?;
    if config.deleted {
      if let Some(v) = value {
        return Err(ProbeError::Failed(format!(
          "The value for {} should have been deleted, is {}",
          key, v
        )));
      }
      continue;
    }
    let tag = match value.as_ref().and_then(parse_tx_value) {
      Some((index, tag)) if index == i => tag,
      _ => {
        return Err(ProbeError::Failed(format!(
          "Unexpected value for {} = {}",
          key,
          value.map_or_else(|| "null".to_string(), |v| v.to_string())
        )))
      }
    };
    match committer {
      None => {
        if !allowed(&config.commit_workers, tag.worker) {
          return Err(ProbeError::Failed(format!(
            "The transaction should be committed by worker {:?} but \
             committer is {}",
            config.commit_workers.iter().flatten().collect::<Vec<_>>(),
            tag
          )));
        }
        if !allowed(&config.commit_threads, tag.thread) {
          return Err(ProbeError::Failed(format!(
            "The transaction should be committed by thread {:?} but \
             committer is {}",
            config.commit_threads.iter().flatten().collect::<Vec<_>>(),
            tag
          )));
        }
        committer = Some(tag);
      }
      Some(previous) if previous != tag => {
        return Err(ProbeError::Failed(format!(
          "Inconsistency: previous committer was {}, this is {}",
          previous, tag
        )));
      }
      Some(_) => (),
    }
  }
  match committer {
    Some(c) => {
      info!("All {} keys committed by {}", config.transaction_size, c)
    }
    None => info!("All {} keys are deleted", config.transaction_size),
  }
  Ok(committer)
}

#[test]
fn test_tx_value_tags() {
  let committer = Committer {
    worker: 12,
    thread: 3,
  };
  let value = tx_value(7, committer);
  assert_eq!(value, Value::Text("txValue7@12-3".to_string()));
  assert_eq!(parse_tx_value(&value), Some((7, committer)));
  assert_eq!(tx_key(7), "txKey7");
  let bad = ["txValue7@12", "txValue@1-2", "value7@1-2", "txValue7@1-x"];
  for text in bad.iter() {
    assert_eq!(parse_tx_value(&Value::Text(text.to_string())), None);
  }
  assert_eq!(parse_tx_value(&Value::Long(7)), None);
  let some = Some([1, 2].iter().copied().collect::<BTreeSet<_>>());
  assert!(allowed(&some, 2));
  assert!(!allowed(&some, 3));
  assert!(allowed(&None, 3));
}
