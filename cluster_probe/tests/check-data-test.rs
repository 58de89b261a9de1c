use cluster_probe::check::{check_data_on_worker, CheckDataConfig, ValueCheck};
use cluster_probe::coordinator::{Master, MasterConfig, Stage};
use cluster_probe::core::{
  AckResult, BasicOperations, ClusterTopology, KeyGenerator, Value,
  ValueGenerator,
};
use cluster_probe::probes::LoadConfig;
use cluster_probe::testkit::{
  init_logging, FailureConfig, FailureConfigMap, LogLevel, SimulatedCluster,
  SimulatedConfig,
};
use std::time::Duration;

const ENTRY_SIZE: usize = 32;

fn setup(nodes: usize) -> (SimulatedCluster, Master) {
  init_logging(LogLevel::Warn);
  let cluster = SimulatedCluster::new(SimulatedConfig {
    nodes: nodes,
    ..SimulatedConfig::default()
  });
  let config = MasterConfig {
    ack_timeout: Duration::from_secs(60),
    ..MasterConfig::default()
  };
  let master = Master::new(config, cluster.stores(), None).unwrap();
  (cluster, master)
}

fn load(num_entries: u64) -> LoadConfig {
  LoadConfig {
    num_entries: num_entries,
    entry_size: ENTRY_SIZE,
    load_threads: 3,
    wait_on_error: Duration::from_millis(1),
    ..LoadConfig::default()
  }
}

fn check(num_entries: u64) -> CheckDataConfig {
  CheckDataConfig {
    num_entries: num_entries,
    entry_size: ENTRY_SIZE,
    check_threads: 3,
    ..CheckDataConfig::default()
  }
}

#[test]
fn test_loaded_entries_pass_every_check() {
  let (cluster, mut master) = setup(4);
  assert!(master.run_stage(&Stage::Load(load(200))).passed());
  assert_eq!(cluster.len(), 200);
  let config = CheckDataConfig {
    check_subparts_equal: true,
    check_subparts_sum_local: true,
    check_subparts_are_replicas: true,
    ..check(200)
  };
  let verdict = master.run_stage(&Stage::CheckData(config));
  assert!(verdict.passed(), "{}", verdict);
}

#[test]
fn test_missing_entries_fail_the_worker_check() {
  let (_cluster, mut master) = setup(3);
  assert!(master.run_stage(&Stage::Load(load(50))).passed());
  let verdict = master.run_stage(&Stage::CheckData(check(60)));
  assert!(!verdict.passed());
  assert!(verdict.mentions("Found 50 entries while 60 should be loaded."));
}

#[test]
fn test_removed_entries_pass_in_deletion_mode() {
  let (cluster, mut master) = setup(3);
  assert!(master.run_stage(&Stage::Load(load(100))).passed());
  let remove = LoadConfig {
    remove: true,
    ..load(100)
  };
  assert!(master.run_stage(&Stage::Load(remove)).passed());
  assert!(cluster.is_empty());

  let deleted = CheckDataConfig {
    deleted: true,
    ..check(100)
  };
  let verdict = master.run_stage(&Stage::CheckData(deleted.clone()));
  assert!(verdict.passed(), "{}", verdict);

  assert!(master.run_stage(&Stage::Load(load(10))).passed());
  let verdict = master.run_stage(&Stage::CheckData(deleted));
  assert!(!verdict.passed());
  assert!(verdict.mentions("Found 10 entries while these should be deleted."));
}

#[test]
fn test_fail_on_null_stops_the_scan() {
  let (_cluster, mut master) = setup(2);
  assert!(master.run_stage(&Stage::Load(load(20))).passed());
  let config = CheckDataConfig {
    fail_on_null: true,
    check_threads: 1,
    ..check(40)
  };
  let verdict = master.run_stage(&Stage::CheckData(config));
  assert!(!verdict.passed());
  assert!(verdict.mentions("key key_20 has no value"));
  assert!(verdict.mentions("checked=21"));
}

#[test]
fn test_strided_scan_checks_a_subset() {
  let (_cluster, mut master) = setup(2);
  assert!(master.run_stage(&Stage::Load(load(100))).passed());
  let config = CheckDataConfig {
    step_entry_count: 4,
    check_entry_count: 2,
    ignore_sum: true,
    ..check(50)
  };
  let verdict = master.run_stage(&Stage::CheckData(config));
  assert!(verdict.passed(), "{}", verdict);

  // the last thread starts at 80 and reaches 118, past the loaded entries
  let config = CheckDataConfig {
    step_entry_count: 2,
    check_entry_count: 1,
    ignore_sum: true,
    ..check(60)
  };
  let verdict = master.run_stage(&Stage::CheckData(config));
  assert!(!verdict.passed());
  assert!(verdict.mentions("Found 50 entries while 60 should be loaded."));
}

#[test]
fn test_strided_verdict_ignores_thread_count() {
  let cluster = SimulatedCluster::new(SimulatedConfig {
    nodes: 1,
    num_replicas: 1,
    ..SimulatedConfig::default()
  });
  let node = cluster.node(0);
  // batches of two keys, three apart
  for index in [0u64, 1, 3, 4, 6, 7, 9, 10, 12, 13].iter() {
    let key = KeyGenerator::default().generate(*index);
    let value = ValueGenerator::Bytes.generate(*index, ENTRY_SIZE);
    node.put(&key, value).unwrap();
  }
  let topology = ClusterTopology::new(1, 0);
  for threads in 1..=4 {
    let config = CheckDataConfig {
      step_entry_count: 3,
      check_entry_count: 2,
      check_threads: threads,
      ..check(10)
    };
    match check_data_on_worker(&config, &topology, &node, None).unwrap() {
      AckResult::Size(ack) => {
        let tally = ack.tally.unwrap();
        assert_eq!(tally.found, 10, "{} threads", threads);
        assert_eq!(tally.null_values, 0, "{} threads", threads);
      }
      other => panic!("{} threads: {:?}", threads, other),
    }
  }
}

#[test]
fn test_store_errors_are_counted() {
  let (cluster, mut master) = setup(3);
  assert!(master.run_stage(&Stage::Load(load(30))).passed());
  let mut failures = FailureConfigMap::default();
  failures.node_wide.insert(
    1,
    FailureConfig {
      error_prob: 1.0,
      delay: None,
    },
  );
  cluster.set_failures(failures);
  let verdict = master.run_stage(&Stage::CheckData(check(30)));
  assert!(!verdict.passed());
  assert!(verdict.mentions("Worker 1 failed check data"));
  assert!(verdict.mentions("exceptions=30"));
  assert!(!verdict.mentions("Worker 0 failed"));
}

#[test]
fn test_evicted_copy_breaks_the_sums() {
  let (cluster, mut master) = setup(4);
  assert!(master.run_stage(&Stage::Load(load(200))).passed());
  let backup = cluster.owners("key_7")[1];
  assert!(cluster.evict(backup, "key_7"));
  let config = CheckDataConfig {
    check_subparts_equal: true,
    ..check(200)
  };
  let verdict = master.run_stage(&Stage::CheckData(config));
  assert!(!verdict.passed());
  assert!(verdict.mentions("holds 399 entries."));
  assert!(verdict.mentions(&format!("Worker {} reports segment", backup))
    || verdict.mentions(&format!("but worker {} reported size", backup)));
}

#[test]
fn test_custom_value_check() {
  let cluster = SimulatedCluster::new(SimulatedConfig {
    nodes: 2,
    ..SimulatedConfig::default()
  });
  let odd_only = ValueCheck::custom(|index, value: &Value| {
    index % 2 == 1 && matches!(value, Value::Bytes(_))
  });
  let mut master = Master::new(
    MasterConfig::default(),
    cluster.stores(),
    Some(odd_only),
  )
  .unwrap();
  assert!(master.run_stage(&Stage::Load(load(10))).passed());
  let verdict = master.run_stage(&Stage::CheckData(check(10)));
  assert!(!verdict.passed());
  assert!(verdict.mentions("Found 5 entries while 10 should be loaded."));
  assert!(verdict.mentions("invalidValues=5"));
}

#[test]
fn test_size_convergence_with_hint() {
  let (_cluster, mut master) = setup(2);
  assert!(master.run_stage(&Stage::Load(load(40))).passed());
  let mut config = CheckDataConfig {
    size_only: true,
    live_workers_hint: Some(2),
    ..check(40)
  };
  config.convergence.max_ratio = 100.0;
  config.convergence.min_ratio = 0.0;
  config.convergence.interval = Duration::from_millis(1);
  let verdict = master.run_stage(&Stage::CheckData(config));
  assert!(verdict.passed(), "{}", verdict);
}
