//! Everything needed to run stages without a real cluster: a simulated
//! replicated store with optimistic transactions and fault injection, and
//! logging setup for tests and the `local-cluster` binary.

mod failure_config;
mod logging;
mod node_ring;
mod simulated;

#[rustfmt::skip]
pub(crate) use {
  node_ring::hash_code,
};

#[rustfmt::skip]
pub use {
  failure_config::FailureConfig,
  failure_config::FailureConfigMap,
  logging::init_logging,
  logging::LogLevel,
  node_ring::NodeRing,
  node_ring::Owners,
  simulated::NodeStore,
  simulated::SimulatedCluster,
  simulated::SimulatedConfig,
  simulated::StoreIsolation,
};
