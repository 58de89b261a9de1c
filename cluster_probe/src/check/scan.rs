use crate::check::{CheckTally, IndexRange};
use crate::core::{KeyGenerator, Store, Value, ValueGenerator};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, trace};

/// Injected value check: `(index, value) -> matches`.
pub type ValueCheckFn = Arc<dyn Fn(u64, &Value) -> bool + Send + Sync>;

/// How a scanner decides whether a present value is the right one.
#[derive(Clone)]
pub enum ValueCheck {
  /// The value must be exactly what the generator produces for the index.
  Generated {
    generator: ValueGenerator,
    entry_size: usize,
  },
  /// Anything else, e.g. values that carry the tag of the site that wrote
  /// them.
  Custom(ValueCheckFn),
}
impl ValueCheck {
  pub fn custom<F>(f: F) -> ValueCheck
  where
    F: Fn(u64, &Value) -> bool + Send + Sync + 'static,
  {
    ValueCheck::Custom(Arc::new(f))
  }

  pub fn matches(&self, index: u64, value: &Value) -> bool {
    match self {
      ValueCheck::Generated {
        generator,
        entry_size,
      } => generator.check(index, value, *entry_size),
      ValueCheck::Custom(f) => f(index, value),
    }
  }
}
impl fmt::Debug for ValueCheck {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ValueCheck::Generated {
        generator,
        entry_size,
      } => f
        .debug_struct("Generated")
        .field("generator", generator)
        .field("entry_size", entry_size)
        .finish(),
      ValueCheck::Custom(_) => f.write_str("Custom(..)"),
    }
  }
}

/// Why a range scan stopped before reaching the end of its range.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ScanError {
  /// `fail_on_null` was set and `key` had no value. `tally` counts
  /// everything checked up to and including that key.
  #[error("key {key} has no value, checked so far: {tally}")]
  NullEntry { key: String, tally: CheckTally },
  #[error("scan of {range} panicked: {message}")]
  Panicked { range: IndexRange, message: String },
  #[error("cannot start checking threads: {0}")]
  Pool(String),
}

/// Which keys a scanner visits and how it reacts to what it finds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanPlan {
  /// Index of the first key.
  pub offset: u64,
  /// Distance between the first keys of two consecutive batches.
  pub step_entry_count: u64,
  /// Consecutive keys checked per batch.
  pub check_entry_count: u64,
  /// Expect every key to be absent rather than present.
  pub deleted: bool,
  /// Stop the scan at the first missing key.
  pub fail_on_null: bool,
  /// Log the store's diagnostics for every missing key.
  pub debug_null: bool,
  /// Log progress every so many checked keys.
  pub log_checks_count: u64,
}
impl ScanPlan {
  /// Key index of the `k`-th checked entry: batches of `check_entry_count`
  /// consecutive keys, `step_entry_count` apart. A zero batch size counts
  /// as one.
  pub fn index_of(&self, k: u64) -> u64 {
    let check = self.check_entry_count.max(1);
    self.offset + (k / check) * self.step_entry_count + k % check
  }
}
impl Default for ScanPlan {
  fn default() -> Self {
    ScanPlan {
      offset: 0,
      step_entry_count: 1,
      check_entry_count: 1,
      deleted: false,
      fail_on_null: false,
      debug_null: false,
      log_checks_count: 10000,
    }
  }
}

/// Reads and classifies the keys of one index range.
pub struct RangeScanner<'a> {
  store: &'a dyn Store,
  keys: &'a KeyGenerator,
  check: &'a ValueCheck,
  plan: &'a ScanPlan,
}
impl<'a> RangeScanner<'a> {
  pub fn new(
    store: &'a dyn Store,
    keys: &'a KeyGenerator,
    check: &'a ValueCheck,
    plan: &'a ScanPlan,
  ) -> RangeScanner<'a> {
    RangeScanner {
      store: store,
      keys: keys,
      check: check,
      plan: plan,
    }
  }

  /// Checks the `range.len()` entries of `range`, counted in checked
  /// entries rather than key indices. With `step = 10, check = 1` the range
  /// `[5, 8)` visits indices 50, 60 and 70. How `[0, n)` is split across
  /// scanners does not change which keys are visited.
  pub fn scan(&self, range: IndexRange) -> Result<CheckTally, ScanError> {
    let mut tally = CheckTally::default();
    for k in range.indices() {
      self.check_key(self.plan.index_of(k), &mut tally)?;
    }
    Ok(tally)
  }

  fn check_key(
    &self,
    index: u64,
    tally: &mut CheckTally,
  ) -> Result<(), ScanError> {
    let key = self.keys.generate(index);
    let proceed = match self.store.get(&key) {
      Ok(value) => self.classify(index, &key, value, tally),
      Err(e) => {
        if tally.exceptions == 0 {
          error!("Error retrieving value for key {}: {}", key, e);
        } else {
          trace!("Error retrieving value for key {}: {}", key, e);
        }
        tally.exceptions += 1;
        true
      }
    };
    tally.checked += 1;
    if tally.checked % self.plan.log_checks_count.max(1) == 0 {
      debug!("Checked so far: {}", tally);
    }
    if proceed {
      Ok(())
    } else {
      Err(ScanError::NullEntry {
        key: key,
        tally: *tally,
      })
    }
  }

  // Returns false if the scan must stop.
  fn classify(
    &self,
    index: u64,
    key: &str,
    value: Option<Value>,
    tally: &mut CheckTally,
  ) -> bool {
    match value {
      Some(v) if self.plan.deleted => {
        tally.found += 1;
        trace!("Key {} still has value {}", key, v);
      }
      None if self.plan.deleted => tally.null_values += 1,
      Some(v) if self.check.matches(index, &v) => tally.found += 1,
      Some(v) => {
        tally.invalid_values += 1;
        trace!("Key {} has unexpected value {}", key, v);
      }
      None => {
        tally.null_values += 1;
        if self.plan.debug_null {
          match self.store.debug_key(key) {
            Some(info) => info!("Debug info for null key {}: {}", key, info),
            None => info!("No debug info for null key {}", key),
          }
        }
        trace!("Key {} has unexpected value null", key);
        return !self.plan.fail_on_null;
      }
    }
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::{
    BasicOperations, CacheInformation, SegmentId, StoreError, Transaction,
    Transactional,
  };
  use crate::testkit::{NodeStore, SimulatedCluster, SimulatedConfig};
  use parking_lot::Mutex;
  use std::collections::BTreeMap;

  /// Remembers every key the scanner asked diagnostics for.
  struct Recording {
    inner: NodeStore,
    asked: Mutex<Vec<String>>,
  }
  impl BasicOperations for Recording {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
      self.inner.get(key)
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
      self.inner.put(key, value)
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
      self.inner.remove(key)
    }
  }
  impl Transactional for Recording {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StoreError> {
      self.inner.begin()
    }
  }
  impl CacheInformation for Recording {
    fn owned_size(&self) -> u64 {
      self.inner.owned_size()
    }

    fn locally_stored_size(&self) -> u64 {
      self.inner.locally_stored_size()
    }

    fn total_size(&self) -> Option<u64> {
      self.inner.total_size()
    }

    fn num_replicas(&self) -> i32 {
      self.inner.num_replicas()
    }

    fn segment_sizes(&self) -> BTreeMap<SegmentId, u64> {
      self.inner.segment_sizes()
    }
  }
  impl Store for Recording {
    fn debug_key(&self, key: &str) -> Option<String> {
      self.asked.lock().push(key.to_string());
      self.inner.debug_key(key)
    }
  }

  fn loaded(num_entries: u64) -> Recording {
    let cluster = SimulatedCluster::new(SimulatedConfig {
      nodes: 1,
      num_replicas: 1,
      ..SimulatedConfig::default()
    });
    let node = cluster.node(0);
    for i in 0..num_entries {
      let key = KeyGenerator::default().generate(i);
      node.put(&key, ValueGenerator::Bytes.generate(i, 8)).unwrap();
    }
    Recording {
      inner: node,
      asked: Mutex::new(Vec::new()),
    }
  }

  fn generated() -> ValueCheck {
    ValueCheck::Generated {
      generator: ValueGenerator::Bytes,
      entry_size: 8,
    }
  }

  #[test]
  fn test_index_of_batches() {
    let plan = ScanPlan {
      offset: 100,
      step_entry_count: 3,
      check_entry_count: 2,
      ..ScanPlan::default()
    };
    let indices = (0..6).map(|k| plan.index_of(k)).collect::<Vec<_>>();
    assert_eq!(indices, vec![100, 101, 103, 104, 106, 107]);
    let degenerate = ScanPlan {
      check_entry_count: 0,
      step_entry_count: 5,
      ..ScanPlan::default()
    };
    assert_eq!(degenerate.index_of(2), 10);
  }

  #[test]
  fn test_split_scans_visit_the_same_keys() {
    let store = loaded(14);
    let keys = KeyGenerator::default();
    let check = generated();
    let plan = ScanPlan {
      step_entry_count: 3,
      check_entry_count: 2,
      ..ScanPlan::default()
    };
    let scanner = RangeScanner::new(&store, &keys, &check, &plan);
    let whole = scanner.scan(IndexRange::new(0, 9)).unwrap();
    let split = scanner.scan(IndexRange::new(0, 4)).unwrap()
      + scanner.scan(IndexRange::new(4, 5)).unwrap()
      + scanner.scan(IndexRange::new(5, 9)).unwrap();
    assert_eq!(whole, split);
    assert_eq!(whole.found, 9);
  }

  #[test]
  fn test_null_entries_ask_the_store_for_diagnostics() {
    let store = loaded(3);
    let keys = KeyGenerator::default();
    let check = generated();
    let plan = ScanPlan {
      debug_null: true,
      log_checks_count: 0,
      ..ScanPlan::default()
    };
    let scanner = RangeScanner::new(&store, &keys, &check, &plan);
    let tally = scanner.scan(IndexRange::new(0, 5)).unwrap();
    assert_eq!(tally.found, 3);
    assert_eq!(tally.null_values, 2);
    assert_eq!(*store.asked.lock(), vec!["key_3", "key_4"]);

    let quiet = ScanPlan {
      debug_null: false,
      ..plan
    };
    let scanner = RangeScanner::new(&store, &keys, &check, &quiet);
    scanner.scan(IndexRange::new(0, 5)).unwrap();
    assert_eq!(store.asked.lock().len(), 2);
  }
}
