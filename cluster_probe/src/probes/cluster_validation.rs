use crate::core::{
  AckResult, AckSet, ClusterTopology, ProbeError, ReplicationAck, Store,
  StoreError, Value, Verdict,
};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::{info, trace, warn};
use validator::Validate;

const MARKER_PREFIX: &str = "_cluster_marker_";
const CONFIRMATION_PREFIX: &str = "_cluster_confirmation_";
const MARKER_VALUE: &str = "true";

/// Every worker writes a marker and waits until it can read the markers of
/// its peers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ClusterValidationConfig {
  /// Accept a cluster in which each worker sees at least one peer, and skip
  /// the confirmation round. default: `false`
  pub partial_replication: bool,
  /// Polling rounds for peer markers. default: `60`
  #[validate(range(min = 1))]
  pub replication_try_count: u32,
  /// Sleep between two polling rounds. default: `2 s`
  pub replication_time_sleep: Duration,
  /// Polls per peer for its confirmation. default: `10`
  #[validate(range(min = 1))]
  pub confirmation_try_count: u32,
  /// Sleep between two confirmation polls. default: `1 s`
  pub confirmation_sleep: Duration,
  /// Attempts of a single put or get before giving up. default: `5`
  #[validate(range(min = 1))]
  pub operation_retries: u32,
}
impl Default for ClusterValidationConfig {
  fn default() -> Self {
    ClusterValidationConfig {
      partial_replication: false,
      replication_try_count: 60,
      replication_time_sleep: Duration::from_secs(2),
      confirmation_try_count: 10,
      confirmation_sleep: Duration::from_secs(1),
      operation_retries: 5,
    }
  }
}

pub fn marker_key(worker: usize) -> String {
  format!("{}{}", MARKER_PREFIX, worker)
}

pub fn confirmation_key(worker: usize) -> String {
  format!("{}{}", CONFIRMATION_PREFIX, worker)
}

struct Validator<'a> {
  config: &'a ClusterValidationConfig,
  topology: &'a ClusterTopology,
  store: &'a dyn Store,
}
impl<'a> Validator<'a> {
  fn try_to_put(&self, key: &str) -> Result<(), ProbeError> {
    let mut last = None;
    for attempt in 1..=self.config.operation_retries {
      match self.store.put(key, Value::Text(MARKER_VALUE.to_string())) {
        Ok(()) => return Ok(()),
        Err(e) => {
          warn!("Attempt {} to put {} failed: {}", attempt, key, e);
          last = Some(e);
        }
      }
    }
    Err(ProbeError::Failed(format!(
      "Couldn't write {} after {} attempts: {}",
      key,
      self.config.operation_retries,
      last.map_or_else(String::new, |e: StoreError| e.to_string())
    )))
  }

  fn try_get(&self, key: &str) -> Option<Value> {
    for attempt in 1..=self.config.operation_retries {
      match self.store.get(key) {
        Ok(value) => return value,
        Err(e) => trace!("Attempt {} to get {} failed: {}", attempt, key, e),
      }
    }
    warn!(
      "Couldn't read {} in {} attempts, treating it as absent",
      key, self.config.operation_retries
    );
    None
  }

  fn is_marked(&self, key: &str) -> bool {
    matches!(self.try_get(key), Some(Value::Text(t)) if t == MARKER_VALUE)
  }

  fn replication_count(&self) -> usize {
    let count = self
      .topology
      .peers()
      .filter(|peer| {
        let marked = self.is_marked(&marker_key(*peer));
        trace!("Worker {} replicated here: {}", peer, marked);
        marked
      })
      .count();
    info!("Number of workers that replicated here is {}", count);
    count
  }

  fn replicated_enough(&self, count: usize) -> bool {
    if self.config.partial_replication {
      count >= 1
    } else {
      count == self.topology.peers().count()
    }
  }

  fn check_replication(&self) -> Result<ReplicationAck, ProbeError> {
    let own = marker_key(self.topology.worker_index);
    self.try_to_put(&own)?;
    let mut count = 0;
    for round in 1..=self.config.replication_try_count {
      count = self.replication_count();
      if self.replicated_enough(count) {
        info!(
          "Replication test passed, partial replication: {}, replication \
           count: {}",
          self.config.partial_replication, count
        );
        return Ok(ReplicationAck {
          peers_observed: count,
          converged: true,
        });
      }
      self.try_to_put(&own)?;
      info!(
        "Replication test failed, {} tries so far. Sleeping for {:?} and \
         trying again.",
        round, self.config.replication_time_sleep
      );
      thread::sleep(self.config.replication_time_sleep);
    }
    info!("Replication test failed. Last replication count is {}", count);
    Ok(ReplicationAck {
      peers_observed: count,
      converged: false,
    })
  }

  fn confirm_replication(&self) -> Result<(), ProbeError> {
    let me = self.topology.worker_index;
    self.try_to_put(&confirmation_key(me))?;
    for peer in self.topology.peers() {
      let key = confirmation_key(peer);
      let mut tries = 0;
      while tries < self.config.confirmation_try_count && !self.is_marked(&key)
      {
        self.try_to_put(&marker_key(me))?;
        self.try_to_put(&confirmation_key(me))?;
        thread::sleep(self.config.confirmation_sleep);
        tries += 1;
      }
      if !self.is_marked(&key) {
        warn!(
          "Confirm phase unsuccessful. Worker {} hasn't acknowledged the test",
          peer
        );
        return Err(ProbeError::Unconfirmed { worker: peer });
      }
    }
    info!("Confirm phase successful.");
    Ok(())
  }
}

/// Runs both phases on one worker. The confirmation phase only runs when
/// full replication is required and this worker saw all of its peers.
pub fn cluster_validation_on_worker(
  config: &ClusterValidationConfig,
  topology: &ClusterTopology,
  store: &dyn Store,
) -> Result<ReplicationAck, ProbeError> {
  let validator = Validator {
    config: config,
    topology: topology,
    store: store,
  };
  let ack = validator.check_replication()?;
  if config.partial_replication {
    info!("Using partial replication, skipping confirm phase");
  } else if ack.converged && ack.peers_observed > 0 {
    validator.confirm_replication()?;
  }
  Ok(ack)
}

pub fn cluster_validation_on_master(
  config: &ClusterValidationConfig,
  acks: &AckSet,
) -> Verdict {
  let mut verdict = Verdict::pass();
  let expected = acks.participants().saturating_sub(1);
  for ack in acks.iter() {
    let repl = match &ack.result {
      AckResult::Replication(r) => r,
      AckResult::Error(_) => continue,
      _ => {
        verdict.note(format!(
          "Worker {} did not send any response",
          ack.worker
        ));
        continue;
      }
    };
    if config.partial_replication {
      if !repl.converged || repl.peers_observed == 0 {
        verdict.fail(format!(
          "Replication hasn't occurred on worker {}",
          ack.worker
        ));
      }
    } else if !repl.converged || repl.peers_observed != expected {
      verdict.fail(format!(
        "On worker {} total replication hasn't occurred. Expected {} and \
         received {}",
        ack.worker, expected, repl.peers_observed
      ));
    }
  }
  if !verdict.passed() {
    warn!("Cluster hasn't formed!");
  }
  verdict
}
