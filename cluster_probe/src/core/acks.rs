use crate::check::CheckTally;
use crate::core::SegmentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// The one answer a worker gives for one stage execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerAck {
  /// Index of the worker that sent this ack.
  pub worker: usize,
  /// How long the worker spent executing the stage.
  pub elapsed: Duration,
  /// What the worker found.
  pub result: AckResult,
}
impl WorkerAck {
  /// Whether the worker itself reported a failure.
  pub fn is_error(&self) -> bool {
    match &self.result {
      AckResult::Error(_) => true,
      AckResult::Tally(t) => t.error.is_some(),
      _ => false,
    }
  }
}

/// Stage-specific payload of a [`WorkerAck`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AckResult {
  /// The stage ran and has nothing to report.
  Success,
  /// Size and replication metadata of the worker's node.
  Size(SizeAck),
  /// Outcome of a data scan that did not get as far as reporting sizes.
  Tally(TallyAck),
  /// Whether any reader on the worker saw a value change mid-transaction.
  Change(bool),
  /// Increment attempts and conflicts on the shared counter.
  Counters(CounterAck),
  /// Peers observed during cluster formation.
  Replication(ReplicationAck),
  /// The stage failed on the worker.
  Error(String),
}

/// Sizes reported by one node, plus the scan tally if entries were checked.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeAck {
  pub owned_size: u64,
  pub locally_stored_size: u64,
  pub total_size: Option<u64>,
  pub segment_sizes: BTreeMap<SegmentId, u64>,
  pub num_replicas: i32,
  pub tally: Option<CheckTally>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TallyAck {
  pub tally: CheckTally,
  pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterAck {
  pub total_attempts: u64,
  pub conflicts_detected: u64,
  pub final_counter_value: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationAck {
  /// Peers whose marker was visible in the last polling round.
  pub peers_observed: usize,
  /// Whether the required number of peers was reached before the rounds ran
  /// out.
  pub converged: bool,
}

/// Everything the master gathered for one stage execution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AckSet {
  /// Configured number of workers.
  pub cluster_size: usize,
  /// One ack per responding worker, ordered by worker index.
  pub acks: Vec<WorkerAck>,
  /// Live workers that did not answer before the barrier timed out.
  pub missing: Vec<usize>,
  /// Workers known to be dead, never asked.
  pub excluded: Vec<usize>,
}
impl AckSet {
  /// An ack set in which every worker of a `cluster_size` cluster answered.
  pub fn complete(cluster_size: usize, mut acks: Vec<WorkerAck>) -> AckSet {
    acks.sort_by_key(|a| a.worker);
    AckSet {
      cluster_size: cluster_size,
      acks: acks,
      missing: vec![],
      excluded: vec![],
    }
  }

  /// Number of workers the stage was dispatched to.
  pub fn participants(&self) -> usize {
    self.acks.len() + self.missing.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &WorkerAck> {
    self.acks.iter()
  }
}
