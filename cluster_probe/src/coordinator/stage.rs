use crate::check::{check_data_on_master, check_data_on_worker, CheckDataConfig};
use crate::coordinator::WorkerContext;
use crate::core::{AckResult, AckSet, ConfigError, TallyAck, Verdict};
use crate::probes::cluster_validation::{
  cluster_validation_on_master, cluster_validation_on_worker,
};
use crate::probes::isolation::{isolation_on_master, isolation_on_worker};
use crate::probes::load::load_on_worker;
use crate::probes::single_tx::{
  single_tx_check_on_worker, single_tx_load_on_worker,
};
use crate::probes::write_skew::{write_skew_on_master, write_skew_on_worker};
use crate::probes::{
  ClusterValidationConfig, IsolationConfig, LoadConfig, SingleTxCheckConfig,
  SingleTxLoadConfig, WriteSkewConfig,
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use validator::Validate;

/// One unit of work the master runs on every live worker, carrying its
/// configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Stage {
  Load(LoadConfig),
  CheckData(CheckDataConfig),
  Isolation(IsolationConfig),
  WriteSkew(WriteSkewConfig),
  ClusterValidation(ClusterValidationConfig),
  SingleTxLoad(SingleTxLoadConfig),
  SingleTxCheck(SingleTxCheckConfig),
}
impl Stage {
  pub fn name(&self) -> &'static str {
    match self {
      Stage::Load(c) if c.remove => "remove",
      Stage::Load(_) => "load",
      Stage::CheckData(_) => "check data",
      Stage::Isolation(_) => "isolation",
      Stage::WriteSkew(_) => "write skew",
      Stage::ClusterValidation(_) => "cluster validation",
      Stage::SingleTxLoad(c) if c.delete => "single tx remove",
      Stage::SingleTxLoad(_) => "single tx load",
      Stage::SingleTxCheck(_) => "single tx check",
    }
  }

  /// Rejects configurations the stage cannot run with.
  pub fn validate(&self) -> Result<(), ConfigError> {
    match self {
      Stage::Load(c) => c.validate()?,
      Stage::CheckData(c) => c.validate()?,
      Stage::Isolation(c) => c.validate()?,
      Stage::WriteSkew(c) => c.validate()?,
      Stage::ClusterValidation(c) => c.validate()?,
      Stage::SingleTxLoad(c) => c.validate()?,
      Stage::SingleTxCheck(c) => c.validate()?,
    }
    Ok(())
  }

  /// Whether acks missing at the end of the barrier leave the verdict
  /// untouched.
  pub fn tolerates_missing(&self) -> bool {
    matches!(self, Stage::ClusterValidation(c) if c.partial_replication)
  }

  /// Runs the stage against the worker's node. Blocks until the probe is
  /// done. Any failure is turned into [`AckResult::Error`].
  pub fn execute_on_worker(&self, ctx: &WorkerContext) -> AckResult {
    let store = ctx.store.as_ref();
    let res = match self {
      Stage::Load(c) => load_on_worker(c, &ctx.topology, store)
        .map(|_| AckResult::Success)
        .map_err(|e| e.to_string()),
      Stage::CheckData(c) => check_data_on_worker(
        c,
        &ctx.topology,
        store,
        ctx.value_check.as_ref(),
      )
      .map_err(|e| e.to_string()),
      Stage::Isolation(c) => isolation_on_worker(c, store)
        .map(AckResult::Change)
        .map_err(|e| e.to_string()),
      Stage::WriteSkew(c) => write_skew_on_worker(c, store)
        .map(AckResult::Counters)
        .map_err(|e| e.to_string()),
      Stage::ClusterValidation(c) => {
        cluster_validation_on_worker(c, &ctx.topology, store)
          .map(AckResult::Replication)
          .map_err(|e| e.to_string())
      }
      Stage::SingleTxLoad(c) => {
        single_tx_load_on_worker(c, &ctx.topology, store)
          .map(|_| AckResult::Success)
          .map_err(|e| e.to_string())
      }
      Stage::SingleTxCheck(c) => single_tx_check_on_worker(c, store)
        .map(|_| AckResult::Success)
        .map_err(|e| e.to_string()),
    };
    res.unwrap_or_else(|e| {
      error!(
        "Worker {} failed {}: {}",
        ctx.topology.worker_index,
        self.name(),
        e
      );
      AckResult::Error(e)
    })
  }

  /// Reduces the acks gathered by the barrier into the stage verdict.
  ///
  /// Checks common to every stage run first: error acks, acks missing after
  /// the timeout and excluded workers. The stage's own checks always run
  /// afterwards, so every problem ends up in the verdict.
  pub fn process_acks_on_master(&self, acks: &AckSet) -> Verdict {
    let mut verdict = Verdict::pass();
    let durations = acks
      .iter()
      .map(|a| format!("{}: {:?}", a.worker, a.elapsed))
      .join(", ");
    if acks.missing.is_empty() {
      info!(
        "Received responses from all {} workers ({})",
        acks.acks.len(),
        durations
      );
    } else {
      info!(
        "Received responses from {} of {} workers ({})",
        acks.acks.len(),
        acks.participants(),
        durations
      );
    }
    for worker in &acks.excluded {
      verdict.note(format!(
        "Worker {} is dead and was excluded from {}",
        worker,
        self.name()
      ));
    }
    for worker in &acks.missing {
      let msg = format!("Worker {} did not send any response", worker);
      if self.tolerates_missing() {
        verdict.note(msg);
      } else {
        verdict.fail(msg);
      }
    }
    for ack in acks.iter() {
      match &ack.result {
        AckResult::Error(e) => verdict.fail(format!(
          "Worker {} failed {}: {}",
          ack.worker,
          self.name(),
          e
        )),
        AckResult::Tally(TallyAck {
          tally,
          error: Some(e),
        }) => verdict.fail(format!(
          "Worker {} failed {}: {} {}",
          ack.worker,
          self.name(),
          e,
          tally
        )),
        _ => (),
      }
    }
    verdict.merge(match self {
      Stage::Load(_) | Stage::SingleTxLoad(_) | Stage::SingleTxCheck(_) => {
        Verdict::pass()
      }
      Stage::CheckData(c) => check_data_on_master(c, acks),
      Stage::Isolation(c) => isolation_on_master(c, acks),
      Stage::WriteSkew(c) => write_skew_on_master(c, acks),
      Stage::ClusterValidation(c) => cluster_validation_on_master(c, acks),
    });
    verdict
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::check::CheckTally;
  use crate::core::WorkerAck;
  use std::time::Duration;

  fn ack(worker: usize, result: AckResult) -> WorkerAck {
    WorkerAck {
      worker: worker,
      elapsed: Duration::from_millis(5),
      result: result,
    }
  }

  #[test]
  fn test_error_acks_fail_every_stage() {
    let stage = Stage::Load(LoadConfig::default());
    let acks = AckSet::complete(
      2,
      vec![
        ack(0, AckResult::Success),
        ack(1, AckResult::Error("disk on fire".to_string())),
      ],
    );
    let verdict = stage.process_acks_on_master(&acks);
    assert!(!verdict.passed());
    assert!(verdict.mentions("Worker 1 failed load: disk on fire"));

    let tally = CheckTally {
      checked: 3,
      ..CheckTally::default()
    };
    let acks = AckSet::complete(
      1,
      vec![ack(
        0,
        AckResult::Tally(TallyAck {
          tally: tally,
          error: Some("Found 3 entries while 4 should be loaded.".to_string()),
        }),
      )],
    );
    let verdict = stage.process_acks_on_master(&acks);
    assert!(verdict.mentions("while 4 should be loaded"));
  }

  #[test]
  fn test_missing_acks_tolerated_only_in_partial_mode() {
    let acks = AckSet {
      cluster_size: 3,
      acks: vec![ack(0, AckResult::Success)],
      missing: vec![1],
      excluded: vec![2],
    };
    let load = Stage::Load(LoadConfig::default());
    let verdict = load.process_acks_on_master(&acks);
    assert!(!verdict.passed());
    assert!(verdict.mentions("Worker 1 did not send any response"));
    assert!(verdict.mentions("Worker 2 is dead"));

    let partial = Stage::ClusterValidation(ClusterValidationConfig {
      partial_replication: true,
      ..ClusterValidationConfig::default()
    });
    assert!(partial.tolerates_missing());
    let full = Stage::ClusterValidation(ClusterValidationConfig::default());
    assert!(!full.tolerates_missing());
  }

  #[test]
  fn test_invalid_stage_rejected() {
    let stage = Stage::WriteSkew(WriteSkewConfig {
      threads: 0,
      ..WriteSkewConfig::default()
    });
    assert!(matches!(stage.validate(), Err(ConfigError::Invalid(_))));
    assert!(Stage::Load(LoadConfig::default()).validate().is_ok());
  }
}
