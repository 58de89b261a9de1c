//! Checking that generated entries are where they should be.
//!
//! On every worker a [`CheckPool`] splits `[0, num_entries)` into one
//! [`IndexRange`] per thread and runs a [`RangeScanner`] on each, every
//! thread accumulating its own [`CheckTally`]. Tallies are merged once all
//! threads are done. After the scan the worker optionally waits for its node
//! sizes to settle ([`ConvergenceWaiter`]) and reports them. The master then
//! cross-checks the reported sizes in [`check_data_on_master`].

mod aggregate;
mod convergence;
mod pool;
mod range;
mod scan;
mod stage;
mod tally;

#[rustfmt::skip]
pub use {
  aggregate::check_data_on_master,
  convergence::Convergence,
  convergence::ConvergenceConfig,
  convergence::ConvergenceWaiter,
  convergence::SizeMetric,
  pool::CheckPool,
  pool::PoolFailure,
  range::partition,
  range::IndexRange,
  scan::RangeScanner,
  scan::ScanError,
  scan::ScanPlan,
  scan::ValueCheck,
  scan::ValueCheckFn,
  stage::check_data_on_worker,
  stage::parse_extra_entries,
  stage::CheckDataConfig,
  tally::CheckTally,
};
