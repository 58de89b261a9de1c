use crate::check::{partition, CheckTally, IndexRange, ScanError};
use crate::core::panic_message;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

/// Some ranges could not be scanned to completion.
#[derive(Clone, Debug, Error, PartialEq)]
#[error(
  "{} checking task(s) failed ({}), checked so far: {tally}",
  .errors.len(),
  .errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
)]
pub struct PoolFailure {
  /// Merged tallies of every range, including the partial tallies of ranges
  /// that stopped early.
  pub tally: CheckTally,
  pub errors: Vec<ScanError>,
}

/// A fixed number of threads scanning disjoint ranges of entry indices.
pub struct CheckPool {
  pool: ThreadPool,
  threads: usize,
}
impl CheckPool {
  /// A pool of `threads` threads, or one per CPU if `threads` is zero.
  pub fn new(threads: usize) -> Result<CheckPool, ScanError> {
    let threads = if threads == 0 {
      num_cpus::get()
    } else {
      threads
    };
    let pool = ThreadPoolBuilder::new()
      .num_threads(threads)
      .thread_name(|i| format!("check-data-{}", i))
      .build()
      .map_err(|e| ScanError::Pool(e.to_string()))?;
    Ok(CheckPool {
      pool: pool,
      threads: threads,
    })
  }

  pub fn threads(&self) -> usize {
    self.threads
  }

  /// Splits `[0, num_entries)` into one range per thread and runs `task` on
  /// each. Every range is run to completion even if a sibling fails, and
  /// the tallies of all ranges are merged either way.
  pub fn run<F>(
    &self,
    num_entries: u64,
    task: F,
  ) -> Result<CheckTally, PoolFailure>
  where
    F: Fn(IndexRange) -> Result<CheckTally, ScanError> + Sync,
  {
    let ranges = partition(num_entries, self.threads);
    let results = self.pool.install(|| {
      ranges
        .par_iter()
        .map(|range| {
          panic::catch_unwind(AssertUnwindSafe(|| task(*range))).unwrap_or_else(
            |p| {
              Err(ScanError::Panicked {
                range: *range,
                message: panic_message(&*p),
              })
            },
          )
        })
        .collect::<Vec<_>>()
    });
    let mut tally = CheckTally::default();
    let mut errors = Vec::new();
    for res in results {
      match res {
        Ok(t) => tally += t,
        Err(e) => {
          if let ScanError::NullEntry { tally: partial, .. } = &e {
            tally += *partial;
          }
          errors.push(e);
        }
      }
    }
    if errors.is_empty() {
      Ok(tally)
    } else {
      Err(PoolFailure {
        tally: tally,
        errors: errors,
      })
    }
  }
}

#[test]
fn test_pool_survives_panicking_range() {
  let pool = CheckPool::new(4).unwrap();
  let res = pool.run(100, |range| {
    if range.from == 0 {
      panic!("boom");
    }
    Ok(CheckTally {
      checked: range.len(),
      found: range.len(),
      ..CheckTally::default()
    })
  });
  let failure = res.unwrap_err();
  assert_eq!(failure.tally.checked, 75);
  assert_eq!(failure.errors.len(), 1);
  assert!(matches!(
    &failure.errors[0],
    ScanError::Panicked { message, .. } if message == "boom"
  ));
}

#[test]
fn test_pool_zero_means_cpus() {
  assert_eq!(CheckPool::new(0).unwrap().threads(), num_cpus::get());
}
