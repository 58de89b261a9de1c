use cluster_probe::coordinator::{Master, MasterConfig, Stage};
use cluster_probe::core::{AckResult, AckSet, Verdict, WorkerAck};
use cluster_probe::probes::isolation::isolation_on_master;
use cluster_probe::probes::{IsolationConfig, IsolationLevel};
use cluster_probe::testkit::{
  init_logging, LogLevel, SimulatedCluster, SimulatedConfig, StoreIsolation,
};
use std::time::Duration;

fn changes(seen: &[bool]) -> AckSet {
  AckSet::complete(
    seen.len(),
    seen
      .iter()
      .enumerate()
      .map(|(worker, changed)| WorkerAck {
        worker: worker,
        elapsed: Duration::from_secs(60),
        result: AckResult::Change(*changed),
      })
      .collect(),
  )
}

fn judge(level: IsolationLevel, seen: &[bool]) -> Verdict {
  isolation_on_master(&IsolationConfig::new(level), &changes(seen))
}

#[test]
fn test_repeatable_read_forbids_any_change() {
  let verdict = judge(IsolationLevel::RepeatableRead, &[false, false, false]);
  assert!(verdict.passed());
  let verdict = judge(IsolationLevel::RepeatableRead, &[false, true, false]);
  assert!(!verdict.passed());
  assert!(verdict.mentions("Worker 1 detected a value change"));
}

#[test]
fn test_read_committed_requires_a_change() {
  let verdict = judge(IsolationLevel::ReadCommitted, &[false, false]);
  assert!(!verdict.passed());
  assert!(verdict.mentions("none was detected"));
  assert!(judge(IsolationLevel::ReadCommitted, &[false, true]).passed());
}

fn run(store: StoreIsolation, expected: IsolationLevel) -> Verdict {
  init_logging(LogLevel::Warn);
  let cluster = SimulatedCluster::new(SimulatedConfig {
    nodes: 2,
    isolation: store,
    ..SimulatedConfig::default()
  });
  let mut master =
    Master::new(MasterConfig::default(), cluster.stores(), None).unwrap();
  let mut config = IsolationConfig::new(expected);
  config.duration = Duration::from_millis(500);
  config.writer_threads = 2;
  config.reader_threads = 4;
  config.transaction_size = 10;
  config.writer_pause = Duration::from_millis(5);
  config.read_pause = Duration::from_millis(1);
  master.run_stage(&Stage::Isolation(config))
}

#[test]
fn test_repeatable_read_store() {
  let verdict = run(
    StoreIsolation::RepeatableRead,
    IsolationLevel::RepeatableRead,
  );
  assert!(verdict.passed(), "{}", verdict);
}

#[test]
fn test_read_committed_store() {
  let verdict =
    run(StoreIsolation::ReadCommitted, IsolationLevel::ReadCommitted);
  assert!(verdict.passed(), "{}", verdict);
  let verdict =
    run(StoreIsolation::ReadCommitted, IsolationLevel::RepeatableRead);
  assert!(!verdict.passed());
  assert!(verdict.mentions("detected a value change"));
}

#[test]
fn test_dirty_reads_are_protocol_violations() {
  let mut config = IsolationConfig::new(IsolationLevel::ReadCommitted);
  config.duration = Duration::from_secs(1);
  config.writer_pause = Duration::from_millis(20);
  config.read_pause = Duration::from_millis(1);
  config.reader_threads = 4;
  let cluster = SimulatedCluster::new(SimulatedConfig {
    nodes: 2,
    isolation: StoreIsolation::ReadUncommitted,
    ..SimulatedConfig::default()
  });
  let mut master =
    Master::new(MasterConfig::default(), cluster.stores(), None).unwrap();
  let verdict = master.run_stage(&Stage::Isolation(config));
  assert!(!verdict.passed());
  assert!(verdict.mentions("Unexpected value -1"));
}
