use crate::check::ValueCheck;
use crate::coordinator::Stage;
use crate::core::{
  deserialize, panic_message, serialize, AckResult, ClusterTopology, Store,
  WorkerAck,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task;
use tracing::{debug, error, trace};

/// What a worker needs to execute one stage.
#[derive(Clone)]
pub struct WorkerContext {
  /// The cluster as seen for this stage execution.
  pub topology: ClusterTopology,
  /// The worker's node of the store under test.
  pub store: Arc<dyn Store>,
  /// Overrides the value check derived from the stage configuration.
  pub value_check: Option<ValueCheck>,
}

/// A stage dispatched by the master.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StagePacket {
  pub stage_id: u64,
  pub topology: ClusterTopology,
  pub stage: Stage,
}

/// A worker's answer to the [`StagePacket`] with the same `stage_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AckPacket {
  pub stage_id: u64,
  pub ack: WorkerAck,
}

pub(crate) enum WorkerMsg {
  Packet(Vec<u8>),
  Term,
}

/// Raw ack bytes tagged with the sending worker, so that the master can
/// blame the right worker when they do not decode.
pub(crate) type RawAck = (usize, Vec<u8>);

/// Executes stage packets one at a time until told to stop. Stages run on
/// the blocking pool so probes may block freely.
pub(crate) async fn run_worker(
  index: usize,
  store: Arc<dyn Store>,
  value_check: Option<ValueCheck>,
  mut rx: UnboundedReceiver<WorkerMsg>,
  acks: UnboundedSender<RawAck>,
) {
  while let Some(msg) = rx.recv().await {
    let bytes = match msg {
      WorkerMsg::Packet(bytes) => bytes,
      WorkerMsg::Term => break,
    };
    let packet = match deserialize::<StagePacket>(&bytes) {
      Ok(p) => p,
      Err(e) => {
        error!("Worker {} dropped a stage packet: {}", index, e);
        continue;
      }
    };
    debug!(
      "Worker {} starts {} (stage {})",
      index,
      packet.stage.name(),
      packet.stage_id
    );
    let ctx = WorkerContext {
      topology: packet.topology,
      store: store.clone(),
      value_check: value_check.clone(),
    };
    let stage = packet.stage;
    let start = Instant::now();
    let res = task::spawn_blocking(move || stage.execute_on_worker(&ctx)).await;
    let result = match res {
      Ok(result) => result,
      Err(e) => match e.try_into_panic() {
        Ok(panic) => AckResult::Error(format!(
          "Stage panicked: {}",
          panic_message(&*panic)
        )),
        Err(e) => AckResult::Error(e.to_string()),
      },
    };
    let ack = AckPacket {
      stage_id: packet.stage_id,
      ack: WorkerAck {
        worker: index,
        elapsed: start.elapsed(),
        result: result,
      },
    };
    trace!("Worker {} answers {:?}", index, ack);
    match serialize(&ack) {
      Ok(bytes) => {
        if acks.send((index, bytes)).is_err() {
          break;
        }
      }
      Err(e) => error!("Worker {} cannot encode its ack: {}", index, e),
    }
  }
  debug!("Worker {} stopped", index);
}

#[test]
fn test_worker_answers_with_stage_id() {
  use crate::probes::LoadConfig;
  use crate::testkit::{SimulatedCluster, SimulatedConfig};
  use tokio::sync::mpsc::unbounded_channel;

  let cluster = SimulatedCluster::new(SimulatedConfig {
    nodes: 1,
    num_replicas: 1,
    ..SimulatedConfig::default()
  });
  let stage = Stage::Load(LoadConfig {
    num_entries: 10,
    load_threads: 2,
    ..LoadConfig::default()
  });
  let packet = StagePacket {
    stage_id: 7,
    topology: ClusterTopology::new(1, 0),
    stage: stage,
  };
  let (tx, rx) = unbounded_channel();
  let (ack_tx, mut ack_rx) = unbounded_channel();
  let bytes = serialize(&packet).unwrap();
  assert!(tx.send(WorkerMsg::Packet(bytes)).is_ok());
  assert!(tx.send(WorkerMsg::Packet(vec![0xff, 0x00])).is_ok());
  assert!(tx.send(WorkerMsg::Term).is_ok());
  let store: Arc<dyn Store> = Arc::new(cluster.node(0));
  tokio_test::block_on(run_worker(0, store, None, rx, ack_tx));

  let (worker, bytes) = ack_rx.try_recv().unwrap();
  assert_eq!(worker, 0);
  let ack: AckPacket = deserialize(&bytes).unwrap();
  assert_eq!(ack.stage_id, 7);
  assert_eq!(ack.ack.result, AckResult::Success);
  assert!(ack_rx.try_recv().is_err());
  assert_eq!(cluster.len(), 10);
}
