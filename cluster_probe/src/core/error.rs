use std::any::Any;
use thiserror::Error;

/// Failures reported by a store adapter.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
  /// The operation failed but a retry may succeed.
  #[error("transient store error: {0}")]
  Transient(String),
  /// The node cannot serve requests at all.
  #[error("store unavailable: {0}")]
  Unavailable(String),
}

/// Failures that end a probe on one worker.
#[derive(Debug, Error)]
pub enum ProbeError {
  #[error(transparent)]
  Store(#[from] StoreError),
  /// The store returned something outside the domain the probe wrote.
  #[error("protocol violation: {0}")]
  ProtocolViolation(String),
  #[error("thread {thread} panicked: {message}")]
  ThreadPanicked { thread: String, message: String },
  #[error("worker {worker} hasn't confirmed the replication")]
  Unconfirmed { worker: usize },
  #[error("{0}")]
  Failed(String),
}

/// Failures encoding or decoding a packet.
#[derive(Debug, Error)]
pub enum PacketError {
  #[error("cannot encode packet: {0}")]
  Encode(#[source] serde_cbor::Error),
  #[error("cannot decode packet: {0}")]
  Decode(#[source] serde_cbor::Error),
}

/// A stage configuration that cannot be executed.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("invalid configuration: {0}")]
  Invalid(#[from] validator::ValidationErrors),
  #[error("cannot parse extra entries '{0}'")]
  ExtraEntries(String),
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic payload".to_string()
  }
}
