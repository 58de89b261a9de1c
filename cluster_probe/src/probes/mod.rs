//! Probes that run on every worker for a stage and the master-side checks
//! that judge their results.
//!
//! The isolation and write skew probes deliberately point many threads at
//! one hot key. Those threads run under [`run_for`], which stops them after
//! a wall-clock duration and joins every one of them before the worker
//! answers, even when some fail.

pub mod cluster_validation;
pub mod isolation;
pub mod load;
pub mod single_tx;
mod threads;
pub mod write_skew;

#[rustfmt::skip]
pub use {
  cluster_validation::ClusterValidationConfig,
  isolation::IsolationConfig,
  isolation::IsolationLevel,
  load::LoadConfig,
  single_tx::SingleTxCheckConfig,
  single_tx::SingleTxLoadConfig,
  threads::run_for,
  threads::ProbeBody,
  threads::ProbeControl,
  threads::ProbePhase,
  write_skew::WriteSkewConfig,
};
