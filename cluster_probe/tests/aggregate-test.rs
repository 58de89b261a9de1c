use cluster_probe::check::{check_data_on_master, CheckDataConfig, CheckTally};
use cluster_probe::core::{AckResult, AckSet, SizeAck, WorkerAck};
use maplit::btreemap;
use std::time::Duration;

fn size_ack(owned: u64, local: u64, replicas: i32) -> SizeAck {
  SizeAck {
    owned_size: owned,
    locally_stored_size: local,
    num_replicas: replicas,
    ..SizeAck::default()
  }
}

fn acks(infos: Vec<SizeAck>) -> AckSet {
  let n = infos.len();
  AckSet::complete(
    n,
    infos
      .into_iter()
      .enumerate()
      .map(|(worker, info)| WorkerAck {
        worker: worker,
        elapsed: Duration::from_millis(10),
        result: AckResult::Size(info),
      })
      .collect(),
  )
}

fn sizes_config() -> CheckDataConfig {
  CheckDataConfig {
    num_entries: 100,
    extra_entries: Some("1,2".to_string()),
    size_only: true,
    ..CheckDataConfig::default()
  }
}

fn balanced() -> Vec<SizeAck> {
  vec![
    size_ack(28, 55, 2),
    size_ack(27, 54, 2),
    size_ack(27, 55, 2),
    size_ack(27, 54, 2),
  ]
}

#[test]
fn test_sums_match_expected_copies() {
  let verdict = check_data_on_master(&sizes_config(), &acks(balanced()));
  assert!(verdict.passed(), "{}", verdict);
}

#[test]
fn test_sum_mismatch_names_both_values() {
  let mut infos = balanced();
  infos[3].locally_stored_size = 50;
  infos[0].owned_size = 20;
  let verdict = check_data_on_master(&sizes_config(), &acks(infos));
  assert!(!verdict.passed());
  assert!(verdict.mentions("should hold 218 entries"));
  assert!(verdict.mentions("holds 214 entries"));
  assert!(verdict.mentions("should hold 109 entries but holds 101 entries"));
}

#[test]
fn test_replica_disagreement_is_fatal() {
  let mut infos = balanced();
  infos[2].num_replicas = 3;
  let config = CheckDataConfig {
    ignore_sum: true,
    ..sizes_config()
  };
  let verdict = check_data_on_master(&config, &acks(infos));
  assert!(!verdict.passed());
  assert!(verdict.mentions("Worker 2 reports 3 replicas"));
}

#[test]
fn test_replicate_to_all_multiplies_by_cluster_size() {
  let infos = vec![
    size_ack(55, 109, -1),
    size_ack(54, 109, -1),
    size_ack(0, 109, -1),
    size_ack(0, 109, -1),
  ];
  let verdict = check_data_on_master(&sizes_config(), &acks(infos));
  assert!(verdict.passed(), "{}", verdict);
}

#[test]
fn test_total_size_must_agree() {
  let mut infos = balanced();
  infos[0].total_size = Some(109);
  infos[1].total_size = Some(109);
  infos[2].total_size = Some(110);
  let verdict = check_data_on_master(&sizes_config(), &acks(infos));
  assert!(!verdict.passed());
  assert!(verdict.mentions("Workers [3] do not report any total size"));
  assert!(verdict.mentions("Workers disagree on the total size"));

  let mut infos = balanced();
  for info in infos.iter_mut() {
    info.total_size = Some(109);
  }
  assert!(check_data_on_master(&sizes_config(), &acks(infos)).passed());
}

#[test]
fn test_subpart_checks() {
  let mut infos = vec![size_ack(10, 19, 2), size_ack(9, 19, 2)];
  infos[0].segment_sizes = btreemap! {
    "seg-0".to_string() => 10,
    "seg-1".to_string() => 9,
    "seg-2".to_string() => 0,
  };
  infos[1].segment_sizes = btreemap! {
    "seg-0".to_string() => 9,
    "seg-3".to_string() => 9,
  };
  let config = CheckDataConfig {
    ignore_sum: true,
    size_only: true,
    check_subparts_equal: true,
    check_subparts_are_replicas: true,
    check_subparts_sum_local: true,
    ..CheckDataConfig::default()
  };
  let verdict = check_data_on_master(&config, &acks(infos));
  assert!(!verdict.passed());
  assert!(verdict.mentions("segment seg-0 = 9 but worker 0 reported size 10"));
  assert!(verdict.mentions("Segment seg-1 was found on workers [0]"));
  assert!(verdict.mentions("Segment seg-3 was found on workers [1]"));
  assert!(!verdict.mentions("seg-2"));
  assert!(verdict.mentions("On worker 1 sum of segment sizes (18)"));
  assert!(!verdict.mentions("On worker 0"));
}

#[test]
fn test_deleted_entries_must_be_gone() {
  let mut infos = vec![size_ack(0, 0, 2), size_ack(0, 0, 2)];
  infos[1].tally = Some(CheckTally {
    checked: 100,
    found: 3,
    ..CheckTally::default()
  });
  let config = CheckDataConfig {
    num_entries: 100,
    deleted: true,
    ..CheckDataConfig::default()
  };
  let verdict = check_data_on_master(&config, &acks(infos));
  assert!(!verdict.passed());
  assert!(verdict.mentions("Found 3 entries in the cluster"));

  let size_only = CheckDataConfig {
    size_only: true,
    ..config
  };
  let mut infos = vec![size_ack(0, 0, 2)];
  infos[0].tally = Some(CheckTally {
    found: 3,
    ..CheckTally::default()
  });
  assert!(check_data_on_master(&size_only, &acks(infos)).passed());
}

#[test]
fn test_ignore_sum_only_notes() {
  let config = CheckDataConfig {
    ignore_sum: true,
    ..sizes_config()
  };
  let infos = vec![size_ack(1, 1, 2)];
  let verdict = check_data_on_master(&config, &acks(infos));
  assert!(verdict.passed());
  assert!(verdict.mentions("The sum of owned sizes is 1"));
}
