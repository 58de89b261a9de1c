use cluster_probe::coordinator::{Master, MasterConfig, Stage};
use cluster_probe::core::{AckResult, AckSet, CounterAck, WorkerAck};
use cluster_probe::probes::write_skew::write_skew_on_master;
use cluster_probe::probes::WriteSkewConfig;
use cluster_probe::testkit::{
  init_logging, LogLevel, SimulatedCluster, SimulatedConfig,
};
use std::time::Duration;

fn counters(reports: &[(u64, u64, i64)]) -> AckSet {
  AckSet::complete(
    reports.len(),
    reports
      .iter()
      .enumerate()
      .map(|(worker, (attempts, conflicts, value))| WorkerAck {
        worker: worker,
        elapsed: Duration::from_secs(60),
        result: AckResult::Counters(CounterAck {
          total_attempts: *attempts,
          conflicts_detected: *conflicts,
          final_counter_value: *value,
        }),
      })
      .collect(),
  )
}

#[test]
fn test_every_attempt_accounted_for() {
  let config = WriteSkewConfig::default();
  let verdict =
    write_skew_on_master(&config, &counters(&[(600, 20, 963), (400, 17, 963)]));
  assert!(verdict.passed(), "{}", verdict);

  let verdict =
    write_skew_on_master(&config, &counters(&[(600, 20, 960), (400, 17, 960)]));
  assert!(!verdict.passed());
  assert!(verdict.mentions("a difference of 3"));
}

#[test]
fn test_highest_final_value_wins() {
  let config = WriteSkewConfig::default();
  let verdict =
    write_skew_on_master(&config, &counters(&[(600, 20, 950), (400, 17, 963)]));
  assert!(verdict.passed(), "{}", verdict);
}

#[test]
fn test_no_counters_fail() {
  let acks = AckSet::complete(
    1,
    vec![WorkerAck {
      worker: 0,
      elapsed: Duration::ZERO,
      result: AckResult::Error("gone".to_string()),
    }],
  );
  let verdict = write_skew_on_master(&WriteSkewConfig::default(), &acks);
  assert!(!verdict.passed());
}

fn run(write_skew_check: bool, test_null: bool) -> bool {
  init_logging(LogLevel::Warn);
  let cluster = SimulatedCluster::new(SimulatedConfig {
    nodes: 2,
    write_skew_check: write_skew_check,
    ..SimulatedConfig::default()
  });
  let mut master =
    Master::new(MasterConfig::default(), cluster.stores(), None).unwrap();
  let config = WriteSkewConfig {
    duration: Duration::from_millis(500),
    threads: 4,
    test_null: test_null,
    settle_delay: Duration::from_millis(20),
  };
  master.run_stage(&Stage::WriteSkew(config)).passed()
}

#[test]
fn test_optimistic_store_loses_no_increment() {
  assert!(run(true, false));
  assert!(run(true, true));
}

#[test]
fn test_lost_updates_are_detected() {
  assert!(!run(false, false));
}
