use crate::check::{
  CheckPool, CheckTally, ConvergenceConfig, ConvergenceWaiter, RangeScanner,
  ScanPlan, SizeMetric, ValueCheck,
};
use crate::core::{
  replica_factor, AckResult, ClusterTopology, ConfigError, KeyGenerator,
  SizeAck, Store, TallyAck, ValueGenerator,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use validator::{Validate, ValidationError};

/// Checks that generated entries are present (or absent) and that the node
/// sizes add up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_stride"))]
pub struct CheckDataConfig {
  /// Entries expected in the store. default: `0`
  pub num_entries: u64,
  /// Index of the first entry. default: `0`
  pub first_entry_offset: u64,
  /// If non-zero, the first entry is this times the worker index, and
  /// `first_entry_offset` is ignored. default: `0`
  pub first_entry_offset_worker_index: u64,
  /// Entries stepped over per batch. default: `1`
  #[validate(range(min = 1))]
  pub step_entry_count: u64,
  /// Entries checked per batch. default: `1`
  #[validate(range(min = 1))]
  pub check_entry_count: u64,
  /// Scanning threads per worker, zero for one per CPU. default: `1`
  pub check_threads: usize,
  /// Size of every generated value. default: `0`
  pub entry_size: usize,
  /// Entries of foreign form expected in the store, as polynomial
  /// coefficients in the cluster size: `"1,2,3"` on 4 workers means
  /// `1 + 2*4 + 3*4*4`. default: `None`
  #[validate(custom = "validate_extra_entries")]
  pub extra_entries: Option<String>,
  /// Log the size sums instead of checking them. default: `false`
  pub ignore_sum: bool,
  /// Skip reading entries, only report sizes. default: `false`
  pub size_only: bool,
  /// Number of live workers. When set, every worker waits for its sizes to
  /// converge before reporting them. default: `None`
  #[validate(range(min = 1))]
  pub live_workers_hint: Option<usize>,
  /// Expect the entries to be gone. default: `false`
  pub deleted: bool,
  /// Checked entries between two progress lines. default: `10000`
  #[validate(range(min = 1))]
  pub log_checks_count: u64,
  /// Log the store's diagnostics for every missing entry. default: `false`
  pub debug_null: bool,
  /// Stop at the first missing entry. default: `false`
  pub fail_on_null: bool,
  /// Sum of non-empty segments must equal the locally stored size.
  /// default: `false`
  pub check_subparts_sum_local: bool,
  /// A segment must have the same size on every worker holding it.
  /// default: `false`
  pub check_subparts_equal: bool,
  /// Every segment must be held by as many workers as there are replicas.
  /// default: `false`
  pub check_subparts_are_replicas: bool,
  /// default: `KeyGenerator::Prefixed("key_")`
  pub key_generator: KeyGenerator,
  /// default: `ValueGenerator::Bytes`
  pub value_generator: ValueGenerator,
  #[validate]
  pub convergence: ConvergenceConfig,
}
impl Default for CheckDataConfig {
  fn default() -> Self {
    CheckDataConfig {
      num_entries: 0,
      first_entry_offset: 0,
      first_entry_offset_worker_index: 0,
      step_entry_count: 1,
      check_entry_count: 1,
      check_threads: 1,
      entry_size: 0,
      extra_entries: None,
      ignore_sum: false,
      size_only: false,
      live_workers_hint: None,
      deleted: false,
      log_checks_count: 10000,
      debug_null: false,
      fail_on_null: false,
      check_subparts_sum_local: false,
      check_subparts_equal: false,
      check_subparts_are_replicas: false,
      key_generator: KeyGenerator::default(),
      value_generator: ValueGenerator::default(),
      convergence: ConvergenceConfig::default(),
    }
  }
}
impl CheckDataConfig {
  /// Index of the first key scanned on `worker_index`.
  pub fn first_index(&self, worker_index: usize) -> u64 {
    if self.first_entry_offset_worker_index > 0 {
      self.first_entry_offset_worker_index * worker_index as u64
    } else {
      self.first_entry_offset
    }
  }

  /// Expected number of primary copies in the whole cluster.
  pub fn expected_owned_size(
    &self,
    cluster_size: usize,
  ) -> Result<u64, ConfigError> {
    let extra =
      parse_extra_entries(self.extra_entries.as_deref(), cluster_size)?;
    let common = if self.deleted { 0 } else { self.num_entries };
    Ok(common + extra)
  }

  fn scan_plan(&self, worker_index: usize) -> ScanPlan {
    ScanPlan {
      offset: self.first_index(worker_index),
      step_entry_count: self.step_entry_count,
      check_entry_count: self.check_entry_count,
      deleted: self.deleted,
      fail_on_null: self.fail_on_null,
      debug_null: self.debug_null,
      log_checks_count: self.log_checks_count,
    }
  }
}

fn validate_stride(config: &CheckDataConfig) -> Result<(), ValidationError> {
  if config.check_entry_count <= config.step_entry_count {
    Ok(())
  } else {
    Err(ValidationError::new("check_entry_count_above_step_entry_count"))
  }
}

fn validate_extra_entries(poly: &str) -> Result<(), ValidationError> {
  parse_extra_entries(Some(poly), 1)
    .map(|_| ())
    .map_err(|_| ValidationError::new("extra_entries"))
}

/// Evaluates a comma separated list of coefficients as a polynomial in
/// `cluster_size`, lowest power first. `None` and the empty string are zero.
pub fn parse_extra_entries(
  poly: Option<&str>,
  cluster_size: usize,
) -> Result<u64, ConfigError> {
  let poly = match poly.map(str::trim) {
    None | Some("") => return Ok(0),
    Some(p) => p,
  };
  let err = || ConfigError::ExtraEntries(poly.to_string());
  let mut sum = 0u64;
  let mut power = 1u64;
  for (i, coefficient) in poly.split(',').enumerate() {
    if i > 0 {
      power = power.checked_mul(cluster_size as u64).ok_or_else(err)?;
    }
    let c = coefficient.trim().parse::<u64>().map_err(|_| err())?;
    sum = c
      .checked_mul(power)
      .and_then(|term| sum.checked_add(term))
      .ok_or_else(err)?;
  }
  Ok(sum)
}

/// Runs the check-data stage against the worker's node.
///
/// Scanning failures and unexpected counts are reported in a
/// [`AckResult::Tally`] with an error; otherwise the node's sizes are
/// reported, after waiting for them to converge if `live_workers_hint` is
/// set.
pub fn check_data_on_worker(
  config: &CheckDataConfig,
  topology: &ClusterTopology,
  store: &dyn Store,
  value_check: Option<&ValueCheck>,
) -> Result<AckResult, ConfigError> {
  let mut tally = None;
  if !config.size_only {
    let check = value_check.cloned().unwrap_or(ValueCheck::Generated {
      generator: config.value_generator,
      entry_size: config.entry_size,
    });
    let plan = config.scan_plan(topology.worker_index);
    let scanner =
      RangeScanner::new(store, &config.key_generator, &check, &plan);
    let pool = match CheckPool::new(config.check_threads) {
      Ok(pool) => pool,
      Err(e) => return Ok(failed_check(CheckTally::default(), e.to_string())),
    };
    let checked = match pool.run(config.num_entries, |r| scanner.scan(r)) {
      Ok(t) => t,
      Err(failure) => {
        return Ok(failed_check(failure.tally, failure.to_string()))
      }
    };
    info!("Worker {} checked entries: {}", topology.worker_index, checked);
    if let Some(msg) = found_mismatch(config, &checked) {
      return Ok(AckResult::Tally(TallyAck {
        tally: checked,
        error: Some(msg),
      }));
    }
    tally = Some(checked);
  }

  if let Some(hint) = config.live_workers_hint {
    let expected_owned =
      config.expected_owned_size(topology.cluster_size)? / hint as u64;
    let factor = replica_factor(store.num_replicas(), topology.cluster_size);
    let waiter = ConvergenceWaiter::new(&config.convergence);
    waiter.wait(&[
      SizeMetric::new("Owned size", expected_owned, || store.owned_size()),
      SizeMetric::new("Locally stored size", expected_owned * factor, || {
        store.locally_stored_size()
      }),
    ]);
  }

  let ack = SizeAck {
    owned_size: store.owned_size(),
    locally_stored_size: store.locally_stored_size(),
    total_size: store.total_size(),
    segment_sizes: store.segment_sizes(),
    num_replicas: store.num_replicas(),
    tally: tally,
  };
  debug!(
    "Worker {} reports owned size {}, local size {}, total size {:?}",
    topology.worker_index,
    ack.owned_size,
    ack.locally_stored_size,
    ack.total_size
  );
  Ok(AckResult::Size(ack))
}

fn failed_check(tally: CheckTally, msg: String) -> AckResult {
  AckResult::Tally(TallyAck {
    tally: tally,
    error: Some(format!("Failed to check entries: {}", msg)),
  })
}

fn found_mismatch(
  config: &CheckDataConfig,
  tally: &CheckTally,
) -> Option<String> {
  if config.deleted {
    if tally.found > 0 {
      return Some(format!(
        "Found {} entries while these should be deleted.",
        tally.found
      ));
    }
  } else if tally.found != config.num_entries {
    return Some(format!(
      "Found {} entries while {} should be loaded.",
      tally.found, config.num_entries
    ));
  }
  None
}

#[test]
fn test_extra_entries_polynomial() {
  assert_eq!(parse_extra_entries(Some("1,2"), 4).unwrap(), 9);
  assert_eq!(parse_extra_entries(Some("1, 2, 3"), 4).unwrap(), 57);
  assert_eq!(parse_extra_entries(Some("5"), 100).unwrap(), 5);
  assert_eq!(parse_extra_entries(None, 4).unwrap(), 0);
  assert_eq!(parse_extra_entries(Some(" "), 4).unwrap(), 0);
  assert!(parse_extra_entries(Some("1,-2"), 4).is_err());
  assert!(parse_extra_entries(Some("1,x"), 4).is_err());
}

#[test]
fn test_check_data_config_validation() {
  let mut config = CheckDataConfig::default();
  assert!(config.validate().is_ok());
  config.extra_entries = Some("1,two".to_string());
  assert!(config.validate().is_err());
  config.extra_entries = None;
  config.check_entry_count = 5;
  config.step_entry_count = 2;
  assert!(config.validate().is_err());
  config.step_entry_count = 10;
  assert!(config.validate().is_ok());
  config.live_workers_hint = Some(0);
  assert!(config.validate().is_err());
}

#[test]
fn test_worker_index_offset_wins() {
  let config = CheckDataConfig {
    first_entry_offset: 7,
    first_entry_offset_worker_index: 1000,
    ..CheckDataConfig::default()
  };
  assert_eq!(config.first_index(3), 3000);
  let config = CheckDataConfig {
    first_entry_offset: 7,
    ..CheckDataConfig::default()
  };
  assert_eq!(config.first_index(3), 7);
}
