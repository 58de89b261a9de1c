//! An in-process replicated store.
//!
//! All nodes share one versioned map; what differs between nodes is which
//! entries they hold. Keys hash into segments, and every segment is owned by
//! `replica_factor` nodes picked from a [`NodeRing`], the first of which is
//! the primary. Replicas can be dropped from single nodes with
//! [`SimulatedCluster::evict`] to produce under-replicated segments.

use crate::core::{
  replica_factor, BasicOperations, CacheInformation, CommitOutcome,
  SegmentId, Store, StoreError, Transaction, Transactional, Value,
};
use crate::testkit::{hash_code, FailureConfigMap, NodeRing, Owners};
use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// What a transaction may observe of other transactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreIsolation {
  /// Writes are applied the moment they are made; rollback undoes them.
  ReadUncommitted,
  /// Every read sees the latest committed value.
  ReadCommitted,
  /// The first read of a key fixes its value for the rest of the
  /// transaction.
  RepeatableRead,
}

#[derive(Clone, Debug)]
pub struct SimulatedConfig {
  /// default: `4`
  pub nodes: usize,
  /// What nodes report as their replica count. Negative values replicate to
  /// every node. default: `2`
  pub num_replicas: i32,
  /// default: `32`
  pub segments: u32,
  /// Points per node on the ownership ring. default: `16`
  pub vnodes: u32,
  /// default: `StoreIsolation::RepeatableRead`
  pub isolation: StoreIsolation,
  /// Reject commits whose read keys were overwritten concurrently.
  /// default: `true`
  pub write_skew_check: bool,
  /// Whether nodes can tell the size of the whole cluster. default: `true`
  pub report_total_size: bool,
  pub failures: FailureConfigMap,
}
impl Default for SimulatedConfig {
  fn default() -> Self {
    SimulatedConfig {
      nodes: 4,
      num_replicas: 2,
      segments: 32,
      vnodes: 16,
      isolation: StoreIsolation::RepeatableRead,
      write_skew_check: true,
      report_total_size: true,
      failures: FailureConfigMap::default(),
    }
  }
}

#[derive(Clone, Debug)]
struct Entry {
  value: Value,
  version: u64,
}

struct ClusterState {
  config: SimulatedConfig,
  ring: NodeRing,
  data: RwLock<HashMap<String, Entry>>,
  /// `(node, key)` pairs whose copy on `node` was dropped.
  evicted: RwLock<HashSet<(usize, String)>>,
  failures: RwLock<FailureConfigMap>,
  version: AtomicU64,
}
impl ClusterState {
  fn segment(&self, key: &str) -> u32 {
    (hash_code(&key) % self.config.segments as u64) as u32
  }

  fn owners_of_segment(&self, segment: u32) -> Owners {
    let copies = replica_factor(self.config.num_replicas, self.config.nodes);
    let copies = std::cmp::min(copies as usize, self.config.nodes);
    self.ring.owners(&segment, copies)
  }

  fn owners(&self, key: &str) -> Owners {
    self.owners_of_segment(self.segment(key))
  }

  fn holds(
    &self,
    evicted: &HashSet<(usize, String)>,
    node: usize,
    key: &str,
    owners: &Owners,
  ) -> bool {
    owners.contains(&node) && !evicted.contains(&(node, key.to_string()))
  }

  /// Keys with at least one copy left.
  fn live_count(&self) -> u64 {
    let data = self.data.read();
    let evicted = self.evicted.read();
    data
      .keys()
      .filter(|k| {
        let owners = self.owners(k);
        owners.iter().any(|n| self.holds(&evicted, *n, k, &owners))
      })
      .count() as u64
  }

  fn next_version(&self) -> u64 {
    self.version.fetch_add(1, Ordering::SeqCst) + 1
  }

  fn read(&self, key: &str) -> Option<Entry> {
    let owners = self.owners(key);
    let data = self.data.read();
    let entry = data.get(key)?;
    let evicted = self.evicted.read();
    owners
      .iter()
      .any(|n| !evicted.contains(&(*n, key.to_string())))
      .then(|| entry.clone())
  }

  fn delete(&self, key: &str) {
    self.data.write().remove(key);
    self.evicted.write().retain(|(_, k)| k != key);
  }

  fn write(&self, key: &str, value: Value) {
    let version = self.next_version();
    self.data.write().insert(
      key.to_string(),
      Entry {
        value: value,
        version: version,
      },
    );
    self.evicted.write().retain(|(_, k)| k != key);
  }
}

/// A simulated cluster. Cloning is cheap and every clone sees the same data.
#[derive(Clone)]
pub struct SimulatedCluster {
  state: Arc<ClusterState>,
}
impl SimulatedCluster {
  pub fn new(config: SimulatedConfig) -> SimulatedCluster {
    let ring = NodeRing::with_nodes(config.nodes, config.vnodes);
    let failures = config.failures.clone();
    SimulatedCluster {
      state: Arc::new(ClusterState {
        config: config,
        ring: ring,
        data: RwLock::new(HashMap::new()),
        evicted: RwLock::new(HashSet::new()),
        failures: RwLock::new(failures),
        version: AtomicU64::new(0),
      }),
    }
  }

  pub fn nodes(&self) -> usize {
    self.state.config.nodes
  }

  /// The store adapter of one node.
  pub fn node(&self, index: usize) -> NodeStore {
    NodeStore {
      index: index,
      state: self.state.clone(),
    }
  }

  /// One store adapter per node, ready to hand to a master.
  pub fn stores(&self) -> Vec<Arc<dyn Store>> {
    (0..self.nodes())
      .map(|i| Arc::new(self.node(i)) as Arc<dyn Store>)
      .collect()
  }

  /// Drops the copy of `key` held by `node`. Returns whether there was one.
  pub fn evict(&self, node: usize, key: &str) -> bool {
    let owners = self.state.owners(key);
    let present = self.state.data.read().contains_key(key);
    present
      && owners.contains(&node)
      && self.state.evicted.write().insert((node, key.to_string()))
  }

  /// Owners of `key`, primary first.
  pub fn owners(&self, key: &str) -> Owners {
    self.state.owners(key)
  }

  pub fn set_failures(&self, failures: FailureConfigMap) {
    *self.state.failures.write() = failures;
  }

  /// Number of distinct keys with at least one copy left.
  pub fn len(&self) -> usize {
    self.state.live_count() as usize
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// One node of a [`SimulatedCluster`].
#[derive(Clone)]
pub struct NodeStore {
  index: usize,
  state: Arc<ClusterState>,
}
impl NodeStore {
  fn maybe_fail(&self, op: &str) -> Result<(), StoreError> {
    let failure = *self.state.failures.read().get(self.index);
    if failure.inject(&mut rand::thread_rng()) {
      Err(StoreError::Transient(format!(
        "injected failure of {} on node {}",
        op, self.index
      )))
    } else {
      Ok(())
    }
  }

  /// `(owned, local)` counts of this node.
  fn sizes(&self) -> (u64, u64) {
    let data = self.state.data.read();
    let evicted = self.state.evicted.read();
    let mut owned = 0;
    let mut local = 0;
    for key in data.keys() {
      let owners = self.state.owners(key);
      if self.state.holds(&evicted, self.index, key, &owners) {
        local += 1;
        if owners[0] == self.index {
          owned += 1;
        }
      }
    }
    (owned, local)
  }
}
impl BasicOperations for NodeStore {
  fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
    self.maybe_fail("get")?;
    Ok(self.state.read(key).map(|e| e.value))
  }

  fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
    self.maybe_fail("put")?;
    self.state.write(key, value);
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<bool, StoreError> {
    self.maybe_fail("remove")?;
    let present = self.state.read(key).is_some();
    self.state.delete(key);
    Ok(present)
  }
}
impl Transactional for NodeStore {
  fn begin(&self) -> Result<Box<dyn Transaction + '_>, StoreError> {
    self.maybe_fail("begin")?;
    Ok(Box::new(SimTransaction {
      state: &*self.state,
      snapshot: HashMap::new(),
      read_versions: HashMap::new(),
      writes: HashMap::new(),
      undo: Vec::new(),
    }))
  }
}
impl CacheInformation for NodeStore {
  fn owned_size(&self) -> u64 {
    self.sizes().0
  }

  fn locally_stored_size(&self) -> u64 {
    self.sizes().1
  }

  fn total_size(&self) -> Option<u64> {
    if !self.state.config.report_total_size {
      return None;
    }
    Some(self.state.live_count())
  }

  fn num_replicas(&self) -> i32 {
    self.state.config.num_replicas
  }

  fn segment_sizes(&self) -> BTreeMap<SegmentId, u64> {
    let mut sizes = (0..self.state.config.segments)
      .filter(|s| self.state.owners_of_segment(*s).contains(&self.index))
      .map(|s| (segment_id(s), 0))
      .collect::<BTreeMap<_, _>>();
    let data = self.state.data.read();
    let evicted = self.state.evicted.read();
    for key in data.keys() {
      let owners = self.state.owners(key);
      if self.state.holds(&evicted, self.index, key, &owners) {
        *sizes.entry(segment_id(self.state.segment(key))).or_insert(0) += 1;
      }
    }
    sizes
  }
}
impl Store for NodeStore {
  fn debug_key(&self, key: &str) -> Option<String> {
    let segment = self.state.segment(key);
    Some(format!(
      "asked node {}, key in segment {} owned by {:?}, stored: {}",
      self.index,
      segment_id(segment),
      self.state.owners_of_segment(segment),
      self.state.data.read().contains_key(key)
    ))
  }
}

fn segment_id(segment: u32) -> SegmentId {
  format!("seg-{}", segment)
}

struct SimTransaction<'a> {
  state: &'a ClusterState,
  /// Values fixed by the first read, for repeatable read.
  snapshot: HashMap<String, Option<Value>>,
  /// Version of every key when it was first read, zero if absent.
  read_versions: HashMap<String, u64>,
  /// Pending writes, `None` for removals.
  writes: HashMap<String, Option<Value>>,
  /// Previous entries of keys written through, for read uncommitted.
  undo: Vec<(String, Option<Entry>)>,
}
impl<'a> SimTransaction<'a> {
  fn restore(&mut self) {
    let mut data = self.state.data.write();
    for (key, prior) in self.undo.drain(..).rev() {
      match prior {
        Some(entry) => data.insert(key, entry),
        None => data.remove(&key),
      };
    }
  }
}
impl<'a> Transaction for SimTransaction<'a> {
  fn get(&mut self, key: &str) -> Result<Option<Value>, StoreError> {
    if let Some(v) = self.writes.get(key) {
      return Ok(v.clone());
    }
    let isolation = self.state.config.isolation;
    if isolation == StoreIsolation::RepeatableRead {
      if let Some(v) = self.snapshot.get(key) {
        return Ok(v.clone());
      }
    }
    let entry = self.state.read(key);
    self
      .read_versions
      .entry(key.to_string())
      .or_insert_with(|| entry.as_ref().map_or(0, |e| e.version));
    let value = entry.map(|e| e.value);
    if isolation == StoreIsolation::RepeatableRead {
      self.snapshot.insert(key.to_string(), value.clone());
    }
    Ok(value)
  }

  fn put(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
    if self.state.config.isolation == StoreIsolation::ReadUncommitted {
      let prior = self.state.data.read().get(key).cloned();
      self.undo.push((key.to_string(), prior));
      self.state.write(key, value.clone());
    }
    self.writes.insert(key.to_string(), Some(value));
    Ok(())
  }

  fn remove(&mut self, key: &str) -> Result<(), StoreError> {
    if self.state.config.isolation == StoreIsolation::ReadUncommitted {
      let prior = self.state.data.read().get(key).cloned();
      self.undo.push((key.to_string(), prior));
      self.state.delete(key);
    }
    self.writes.insert(key.to_string(), None);
    Ok(())
  }

  fn commit(mut self: Box<Self>) -> Result<CommitOutcome, StoreError> {
    let state = self.state;
    if state.config.isolation == StoreIsolation::ReadUncommitted {
      self.undo.clear();
      return Ok(CommitOutcome::Committed);
    }
    let mut data = state.data.write();
    if state.config.write_skew_check {
      for key in self.writes.keys() {
        if let Some(seen) = self.read_versions.get(key) {
          let now = data.get(key).map_or(0, |e| e.version);
          if now != *seen {
            trace!("{} changed from version {} to {}", key, seen, now);
            return Ok(CommitOutcome::Conflict);
          }
        }
      }
    }
    let mut evicted = state.evicted.write();
    for (key, value) in self.writes.drain() {
      evicted.retain(|(_, k)| *k != key);
      match value {
        Some(value) => {
          let version = state.next_version();
          data.insert(
            key,
            Entry {
              value: value,
              version: version,
            },
          );
        }
        None => {
          data.remove(&key);
        }
      }
    }
    Ok(CommitOutcome::Committed)
  }

  fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
    self.restore();
    Ok(())
  }
}
impl<'a> Drop for SimTransaction<'a> {
  fn drop(&mut self) {
    if !self.undo.is_empty() {
      self.restore();
    }
  }
}
