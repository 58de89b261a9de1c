use crate::core::{StoreError, Value};
use std::collections::BTreeMap;

/// Opaque identifier of a store-internal partition of the keyspace.
pub type SegmentId = String;

/// Single-key, non-transactional access to one node of the store.
pub trait BasicOperations: Send + Sync {
  /// Reads the value under `key`, `None` if absent.
  fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
  /// Writes `value` under `key`.
  fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;
  /// Removes `key`, returning whether it was present.
  fn remove(&self, key: &str) -> Result<bool, StoreError>;
}

/// Whether a transaction's writes were applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
  /// The writes are visible to later transactions.
  Committed,
  /// The store rejected the commit because of a concurrent modification.
  /// Nothing was applied.
  Conflict,
}

/// One open transaction. Dropping it without committing discards its writes.
pub trait Transaction {
  /// Reads `key` within the transaction.
  fn get(&mut self, key: &str) -> Result<Option<Value>, StoreError>;
  /// Writes `key` within the transaction.
  fn put(&mut self, key: &str, value: Value) -> Result<(), StoreError>;
  /// Removes `key` within the transaction.
  fn remove(&mut self, key: &str) -> Result<(), StoreError>;
  /// Attempts to apply the transaction's writes.
  fn commit(self: Box<Self>) -> Result<CommitOutcome, StoreError>;
  /// Discards the transaction's writes.
  fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Starts transactions against one node of the store.
pub trait Transactional: Send + Sync {
  /// Begins a new transaction.
  fn begin(&self) -> Result<Box<dyn Transaction + '_>, StoreError>;
}

/// Size and replication metadata reported by one node.
pub trait CacheInformation: Send + Sync {
  /// Number of entries this node is the primary owner of.
  fn owned_size(&self) -> u64;
  /// Number of entries physically held by this node, backups included.
  fn locally_stored_size(&self) -> u64;
  /// Number of entries in the whole cluster, if the node can tell.
  fn total_size(&self) -> Option<u64>;
  /// Copies kept of every entry. Negative values mean "every node", see
  /// [`replica_factor`](crate::core::replica_factor).
  fn num_replicas(&self) -> i32;
  /// Entries held by this node, per segment. Segments the node holds but
  /// which are empty may be reported with a size of zero.
  fn segment_sizes(&self) -> BTreeMap<SegmentId, u64>;
}

/// Everything a worker needs from its node of the store under test.
pub trait Store: BasicOperations + Transactional + CacheInformation {
  /// Store-specific diagnostics about where `key` lives, logged when a
  /// check finds the key missing and `debug_null` is set.
  fn debug_key(&self, _key: &str) -> Option<String> {
    None
  }
}
