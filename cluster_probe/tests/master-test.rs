use cluster_probe::coordinator::{Master, MasterConfig, Stage};
use cluster_probe::probes::{LoadConfig, WriteSkewConfig};
use cluster_probe::testkit::{
  init_logging, LogLevel, SimulatedCluster, SimulatedConfig,
};
use std::thread;
use std::time::Duration;

fn setup(nodes: usize, ack_timeout: Duration) -> (SimulatedCluster, Master) {
  init_logging(LogLevel::Warn);
  let cluster = SimulatedCluster::new(SimulatedConfig {
    nodes: nodes,
    ..SimulatedConfig::default()
  });
  let config = MasterConfig {
    ack_timeout: ack_timeout,
    ..MasterConfig::default()
  };
  let master = Master::new(config, cluster.stores(), None).unwrap();
  (cluster, master)
}

fn small_load() -> Stage {
  Stage::Load(LoadConfig {
    num_entries: 20,
    entry_size: 8,
    load_threads: 2,
    ..LoadConfig::default()
  })
}

#[test]
fn test_stages_run_one_after_another() {
  let (cluster, mut master) = setup(3, Duration::from_secs(30));
  assert_eq!(master.cluster_size(), 3);
  assert!(master.run_stage(&small_load()).passed());
  assert_eq!(cluster.len(), 20);
  let remove = Stage::Load(LoadConfig {
    remove: true,
    num_entries: 20,
    load_threads: 2,
    ..LoadConfig::default()
  });
  assert!(master.run_stage(&remove).passed());
  assert!(cluster.is_empty());
}

#[test]
fn test_invalid_stage_is_not_dispatched() {
  let (cluster, mut master) = setup(2, Duration::from_secs(30));
  let stage = Stage::Load(LoadConfig {
    load_threads: 0,
    ..LoadConfig::default()
  });
  let verdict = master.run_stage(&stage);
  assert!(!verdict.passed());
  assert!(verdict.mentions("Cannot run load"));
  assert!(cluster.is_empty());
}

#[test]
fn test_slow_workers_are_missing_and_their_acks_discarded() {
  let (_cluster, mut master) = setup(2, Duration::from_millis(300));
  let slow = Stage::WriteSkew(WriteSkewConfig {
    duration: Duration::from_millis(700),
    threads: 1,
    settle_delay: Duration::ZERO,
    ..WriteSkewConfig::default()
  });
  let verdict = master.run_stage(&slow);
  assert!(!verdict.passed());
  assert!(verdict.mentions("Worker 0 did not send any response"));
  assert!(verdict.mentions("Worker 1 did not send any response"));

  // let the late acks pile up before the next barrier
  thread::sleep(Duration::from_millis(1000));
  let verdict = master.run_stage(&small_load());
  assert!(verdict.passed(), "{}", verdict);
}

#[test]
fn test_killed_workers_are_excluded() {
  let (cluster, mut master) = setup(3, Duration::from_secs(30));
  assert!(master.kill(1));
  assert!(!master.kill(7));
  assert_eq!(master.live_workers(), vec![0, 2]);
  let verdict = master.run_stage(&small_load());
  assert!(verdict.passed(), "{}", verdict);
  assert!(verdict.mentions("Worker 1 is dead and was excluded from load"));
  assert_eq!(cluster.len(), 20);
}
