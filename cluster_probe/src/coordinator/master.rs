use crate::check::ValueCheck;
use crate::coordinator::worker::{run_worker, RawAck, WorkerMsg};
use crate::coordinator::{AckPacket, Stage, StagePacket};
use crate::core::{
  deserialize, serialize, AckResult, AckSet, ClusterTopology, ConfigError,
  Store, Verdict, WorkerAck,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use validator::{Validate, ValidationError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MasterConfig {
  /// How long the barrier waits for every live worker to answer.
  /// default: `5 min`
  #[validate(custom = "validate_timeout")]
  pub ack_timeout: Duration,
  /// Threads of the runtime driving the workers. default: `2`
  #[validate(range(min = 1))]
  pub runtime_threads: usize,
}
impl Default for MasterConfig {
  fn default() -> Self {
    MasterConfig {
      ack_timeout: Duration::from_secs(300),
      runtime_threads: 2,
    }
  }
}

fn validate_timeout(timeout: &Duration) -> Result<(), ValidationError> {
  if *timeout > Duration::ZERO {
    Ok(())
  } else {
    Err(ValidationError::new("ack_timeout_zero"))
  }
}

#[derive(Debug, Error)]
pub enum MasterError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("cannot start the runtime: {0}")]
  Runtime(#[from] io::Error),
}

struct WorkerHandle {
  tx: UnboundedSender<WorkerMsg>,
  task: JoinHandle<()>,
  alive: bool,
}

/// Drives a fixed set of workers through stages, one stage at a time.
///
/// Every stage is a barrier: [`run_stage`](Master::run_stage) ships the
/// stage to every live worker and returns only once each of them answered
/// or the ack timeout elapsed. Workers are tokio tasks on a runtime owned by
/// the master, so the master must not be driven from within an async
/// context.
pub struct Master {
  config: MasterConfig,
  workers: Vec<WorkerHandle>,
  acks: UnboundedReceiver<RawAck>,
  next_stage_id: u64,
  rt: Runtime,
}
impl Master {
  /// Starts one worker per store. Worker `i` drives `stores[i]`.
  pub fn new(
    config: MasterConfig,
    stores: Vec<Arc<dyn Store>>,
    value_check: Option<ValueCheck>,
  ) -> Result<Master, MasterError> {
    config.validate().map_err(ConfigError::from)?;
    let rt = Builder::new_multi_thread()
      .worker_threads(config.runtime_threads)
      .thread_name("probe-master")
      .enable_time()
      .build()?;
    let (ack_tx, ack_rx) = unbounded_channel();
    let workers = stores
      .into_iter()
      .enumerate()
      .map(|(index, store)| {
        let (tx, rx) = unbounded_channel();
        let task = rt.spawn(run_worker(
          index,
          store,
          value_check.clone(),
          rx,
          ack_tx.clone(),
        ));
        WorkerHandle {
          tx: tx,
          task: task,
          alive: true,
        }
      })
      .collect::<Vec<_>>();
    info!("Started master with {} workers", workers.len());
    Ok(Master {
      config: config,
      workers: workers,
      acks: ack_rx,
      next_stage_id: 0,
      rt: rt,
    })
  }

  /// The configured number of workers, dead or alive.
  pub fn cluster_size(&self) -> usize {
    self.workers.len()
  }

  pub fn live_workers(&self) -> Vec<usize> {
    self
      .workers
      .iter()
      .enumerate()
      .filter(|(_, w)| w.alive)
      .map(|(i, _)| i)
      .collect()
  }

  /// Stops a worker. It is excluded from every later stage. Returns whether
  /// the worker was alive.
  pub fn kill(&mut self, worker: usize) -> bool {
    match self.workers.get_mut(worker) {
      Some(handle) if handle.alive => {
        handle.alive = false;
        let _ = handle.tx.send(WorkerMsg::Term);
        handle.task.abort();
        info!("Killed worker {}", worker);
        true
      }
      _ => false,
    }
  }

  /// Runs one stage on every live worker and reduces their acks.
  pub fn run_stage(&mut self, stage: &Stage) -> Verdict {
    if let Err(e) = stage.validate() {
      let mut verdict = Verdict::pass();
      verdict.fail(format!("Cannot run {}: {}", stage.name(), e));
      return verdict;
    }
    self.next_stage_id += 1;
    let stage_id = self.next_stage_id;
    let live = self.live_workers();
    let excluded = (0..self.cluster_size())
      .filter(|w| !live.contains(w))
      .collect::<Vec<_>>();
    info!(
      "Starting {} (stage {}) on workers {:?}",
      stage.name(),
      stage_id,
      live
    );

    let mut pending = BTreeSet::new();
    let mut unreachable = Vec::new();
    for worker in live.iter().copied() {
      let packet = StagePacket {
        stage_id: stage_id,
        topology: ClusterTopology::with_live(
          self.cluster_size(),
          worker,
          live.clone(),
        ),
        stage: stage.clone(),
      };
      let bytes = match serialize(&packet) {
        Ok(bytes) => bytes,
        Err(e) => {
          let mut verdict = Verdict::pass();
          verdict.fail(format!("Cannot dispatch {}: {}", stage.name(), e));
          return verdict;
        }
      };
      if self.workers[worker].tx.send(WorkerMsg::Packet(bytes)).is_ok() {
        pending.insert(worker);
      } else {
        warn!("Worker {} is gone, cannot send it {}", worker, stage.name());
        unreachable.push(worker);
      }
    }

    let acks = self.await_acks(stage_id, &mut pending);
    let mut missing = pending.into_iter().collect::<Vec<_>>();
    missing.extend(unreachable);
    missing.sort_unstable();
    let set = AckSet {
      cluster_size: self.cluster_size(),
      acks: acks,
      missing: missing,
      excluded: excluded,
    };
    let verdict = stage.process_acks_on_master(&set);
    info!("Stage {} {}: {}", stage_id, stage.name(), verdict);
    verdict
  }

  fn await_acks(
    &mut self,
    stage_id: u64,
    pending: &mut BTreeSet<usize>,
  ) -> Vec<WorkerAck> {
    let rx = &mut self.acks;
    let deadline = Instant::now() + self.config.ack_timeout;
    let mut acks = self.rt.block_on(async {
      let mut acks = Vec::new();
      while !pending.is_empty() {
        let (worker, bytes) = match timeout_at(deadline, rx.recv()).await {
          Ok(Some(raw)) => raw,
          Ok(None) => break,
          Err(_) => {
            warn!("Timed out waiting for workers {:?}", pending);
            break;
          }
        };
        match deserialize::<AckPacket>(&bytes) {
          Ok(packet) if packet.stage_id != stage_id => debug!(
            "Discarding stale ack of stage {} from worker {}",
            packet.stage_id, worker
          ),
          Ok(packet) => {
            if pending.remove(&worker) {
              acks.push(packet.ack);
            }
          }
          Err(e) => {
            if pending.remove(&worker) {
              acks.push(WorkerAck {
                worker: worker,
                elapsed: Duration::ZERO,
                result: AckResult::Error(e.to_string()),
              });
            }
          }
        }
      }
      acks
    });
    acks.sort_by_key(|a| a.worker);
    acks
  }
}
impl Drop for Master {
  fn drop(&mut self) {
    for handle in self.workers.iter().filter(|w| w.alive) {
      let _ = handle.tx.send(WorkerMsg::Term);
    }
  }
}

#[test]
fn test_master_config_rejects_zero_timeout() {
  let config = MasterConfig {
    ack_timeout: Duration::ZERO,
    ..MasterConfig::default()
  };
  assert!(config.validate().is_err());
  assert!(MasterConfig::default().validate().is_ok());
}
