use cluster_probe::check::CheckDataConfig;
use cluster_probe::coordinator::{Master, MasterConfig, Stage};
use cluster_probe::probes::{
  ClusterValidationConfig, IsolationConfig, IsolationLevel, LoadConfig,
  SingleTxCheckConfig, SingleTxLoadConfig, WriteSkewConfig,
};
use cluster_probe::testkit::{
  init_logging, LogLevel, SimulatedCluster, SimulatedConfig,
};
use std::env::args;
use std::process::exit;
use std::time::Duration;

const NUM_ENTRIES: u64 = 1000;
const ENTRY_SIZE: usize = 64;

fn stages() -> Vec<Stage> {
  let load = LoadConfig {
    num_entries: NUM_ENTRIES,
    entry_size: ENTRY_SIZE,
    load_threads: 4,
    ..LoadConfig::default()
  };
  let check = CheckDataConfig {
    num_entries: NUM_ENTRIES,
    entry_size: ENTRY_SIZE,
    check_threads: 4,
    check_subparts_sum_local: true,
    check_subparts_are_replicas: true,
    // two markers per worker left by cluster validation
    extra_entries: Some("0,2".to_string()),
    ..CheckDataConfig::default()
  };
  let mut isolation = IsolationConfig::new(IsolationLevel::RepeatableRead);
  isolation.duration = Duration::from_secs(2);
  isolation.writer_pause = Duration::from_millis(1);
  isolation.read_pause = Duration::from_millis(1);
  let single_tx = SingleTxLoadConfig {
    duration: Duration::from_millis(200),
    threads: 2,
    ..SingleTxLoadConfig::default()
  };
  vec![
    Stage::ClusterValidation(ClusterValidationConfig {
      replication_try_count: 5,
      replication_time_sleep: Duration::from_millis(100),
      confirmation_sleep: Duration::from_millis(100),
      ..ClusterValidationConfig::default()
    }),
    Stage::Load(load.clone()),
    Stage::CheckData(check.clone()),
    Stage::Isolation(isolation),
    Stage::WriteSkew(WriteSkewConfig {
      duration: Duration::from_secs(2),
      threads: 4,
      settle_delay: Duration::from_millis(100),
      ..WriteSkewConfig::default()
    }),
    Stage::SingleTxLoad(single_tx.clone()),
    Stage::SingleTxCheck(SingleTxCheckConfig::default()),
    Stage::SingleTxLoad(SingleTxLoadConfig {
      delete: true,
      ..single_tx
    }),
    Stage::Load(LoadConfig {
      remove: true,
      ..load
    }),
    Stage::CheckData(CheckDataConfig {
      deleted: true,
      // plus the isolation and write skew keys
      extra_entries: Some("2,2".to_string()),
      ..check
    }),
  ]
}

fn main() {
  let mut args = args().skip(1);
  let level = match args.next().map(|s| s.parse::<LogLevel>()) {
    None => LogLevel::Info,
    Some(Ok(level)) => level,
    Some(Err(e)) => {
      eprintln!("{}", e);
      exit(2);
    }
  };
  let nodes = match args.next().map(|s| s.parse::<usize>()) {
    None => 4,
    Some(Ok(n)) if n > 0 => n,
    Some(_) => {
      eprintln!("usage: local-cluster [log level] [nodes]");
      exit(2);
    }
  };
  init_logging(level);

  let cluster = SimulatedCluster::new(SimulatedConfig {
    nodes: nodes,
    ..SimulatedConfig::default()
  });
  let config = MasterConfig {
    ack_timeout: Duration::from_secs(60),
    ..MasterConfig::default()
  };
  let mut master = match Master::new(config, cluster.stores(), None) {
    Ok(master) => master,
    Err(e) => {
      eprintln!("{}", e);
      exit(1);
    }
  };
  let mut failed = 0;
  for stage in stages() {
    let verdict = master.run_stage(&stage);
    println!("{}: {}", stage.name(), verdict);
    if !verdict.passed() {
      failed += 1;
    }
  }
  if failed > 0 {
    eprintln!("{} stage(s) failed", failed);
    exit(1);
  }
}
