use crate::check::IndexRange;
use crate::core::{
  ClusterTopology, KeyGenerator, ProbeError, Store, ValueGenerator,
};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use validator::Validate;

/// Writes (or removes) generated entries so that check stages have
/// something to check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoadConfig {
  /// Entries loaded by the whole cluster. default: `100`
  pub num_entries: u64,
  /// Index of the first key. default: `0`
  pub first_entry_offset: u64,
  /// default: `1000`
  pub entry_size: usize,
  pub key_generator: KeyGenerator,
  pub value_generator: ValueGenerator,
  /// Loader threads per worker. default: `10`
  #[validate(range(min = 1))]
  pub load_threads: usize,
  /// Every worker loads every key instead of its share. default: `false`
  pub load_all_keys: bool,
  /// Remove the entries instead of writing them. default: `false`
  pub remove: bool,
  /// Attempts per entry before the stage fails. default: `10`
  #[validate(range(min = 1))]
  pub max_load_attempts: u32,
  /// Pause after a failed attempt. default: `1 s`
  pub wait_on_error: Duration,
}
impl Default for LoadConfig {
  fn default() -> Self {
    LoadConfig {
      num_entries: 100,
      first_entry_offset: 0,
      entry_size: 1000,
      key_generator: KeyGenerator::default(),
      value_generator: ValueGenerator::default(),
      load_threads: 10,
      load_all_keys: false,
      remove: false,
      max_load_attempts: 10,
      wait_on_error: Duration::from_secs(1),
    }
  }
}
impl LoadConfig {
  /// The key ranges this worker's loader threads are responsible for.
  pub fn worker_ranges(&self, topology: &ClusterTopology) -> Vec<IndexRange> {
    let (total, base) = if self.load_all_keys {
      (self.load_threads, 0)
    } else {
      match topology.live_position() {
        Some(pos) => (
          topology.live_workers.len() * self.load_threads,
          pos * self.load_threads,
        ),
        None => return Vec::new(),
      }
    };
    (base..base + self.load_threads)
      .map(|thread| {
        IndexRange::divide(self.num_entries, total, thread)
          .shift(self.first_entry_offset)
      })
      .collect()
  }
}

/// Loads this worker's share of the entries. Returns how many entries were
/// written or removed.
pub fn load_on_worker(
  config: &LoadConfig,
  topology: &ClusterTopology,
  store: &dyn Store,
) -> Result<u64, ProbeError> {
  let ranges = config.worker_ranges(topology);
  let pool = ThreadPoolBuilder::new()
    .num_threads(config.load_threads)
    .thread_name(|i| format!("loader-{}", i))
    .build()
    .map_err(|e| ProbeError::Failed(format!("cannot start loaders: {}", e)))?;
  let loaded = pool.install(|| {
    ranges
      .par_iter()
      .map(|range| load_range(config, store, *range))
      .collect::<Result<Vec<u64>, ProbeError>>()
  })?;
  let loaded: u64 = loaded.iter().sum();
  info!(
    "Finished {} {} entries on worker {}",
    if config.remove { "removing" } else { "loading" },
    loaded,
    topology.worker_index
  );
  Ok(loaded)
}

fn load_range(
  config: &LoadConfig,
  store: &dyn Store,
  range: IndexRange,
) -> Result<u64, ProbeError> {
  debug!("Loading range {}", range);
  for index in range.indices() {
    let key = config.key_generator.generate(index);
    let mut last = None;
    for attempt in 1..=config.max_load_attempts {
      let res = if config.remove {
        store.remove(&key).map(|_| ())
      } else {
        let value = config.value_generator.generate(index, config.entry_size);
        store.put(&key, value)
      };
      match res {
        Ok(()) => {
          last = None;
          break;
        }
        Err(e) => {
          warn!(
            "Attempt {}/{} on {} failed, waiting {:?} before next attempt: {}",
            attempt, config.max_load_attempts, key, config.wait_on_error, e
          );
          last = Some(e);
          thread::sleep(config.wait_on_error);
        }
      }
    }
    if let Some(e) = last {
      return Err(ProbeError::Failed(format!(
        "Failed to {} entry {} {} times: {}",
        if config.remove { "remove" } else { "insert" },
        key,
        config.max_load_attempts,
        e
      )));
    }
  }
  Ok(range.len())
}

#[test]
fn test_worker_ranges_split_by_thread() {
  let config = LoadConfig {
    num_entries: 10,
    first_entry_offset: 100,
    load_threads: 2,
    ..LoadConfig::default()
  };
  let topo = ClusterTopology::new(2, 1);
  assert_eq!(
    config.worker_ranges(&topo),
    vec![IndexRange::new(106, 108), IndexRange::new(108, 110)]
  );
  let all = LoadConfig {
    load_all_keys: true,
    ..config.clone()
  };
  assert_eq!(
    all.worker_ranges(&topo),
    vec![IndexRange::new(100, 105), IndexRange::new(105, 110)]
  );
  let outsider = ClusterTopology::with_live(3, 2, vec![0, 1]);
  assert!(config.worker_ranges(&outsider).is_empty());
}
