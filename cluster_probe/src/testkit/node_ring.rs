use itertools::Itertools;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use wyhash::{wyrng, WyHash};

/// Owners of one item, primary first.
pub type Owners = SmallVec<[usize; 4]>;

/// Consistent hash ring over node indices. Every node occupies `vnodes`
/// points on the ring; an item is owned by the first distinct nodes found
/// walking clockwise from the item's hash.
pub struct NodeRing {
  ring: BTreeMap<u64, usize>,
  vnodes: u32,
}
impl NodeRing {
  pub fn new(vnodes: u32) -> NodeRing {
    NodeRing {
      ring: BTreeMap::new(),
      vnodes: std::cmp::max(1, vnodes),
    }
  }

  pub fn with_nodes(nodes: usize, vnodes: u32) -> NodeRing {
    let mut ring = NodeRing::new(vnodes);
    for node in 0..nodes {
      ring.insert(node);
    }
    ring
  }

  pub fn insert(&mut self, node: usize) {
    let mut key = hash_code(&node);
    self.ring.insert(key, node);
    for _ in 1..self.vnodes {
      key = wyrng(&mut key);
      self.ring.insert(key, node);
    }
  }

  /// Removes every point of `node`. On a partial removal, returns how many
  /// points were found.
  pub fn remove(&mut self, node: usize) -> Result<(), u32> {
    let mut key = hash_code(&node);
    let mut removed = 0u32;
    for i in 0..self.vnodes {
      if i > 0 {
        key = wyrng(&mut key);
      }
      removed += self.ring.remove(&key).is_some() as u32;
    }
    if removed == self.vnodes {
      Ok(())
    } else {
      Err(removed)
    }
  }

  pub fn owners<H: Hash>(&self, item: &H, num: usize) -> Owners {
    let key = hash_code(item);
    self
      .ring
      .range(key..)
      .chain(self.ring.range(..key))
      .map(|(_, node)| *node)
      .unique()
      .take(num)
      .collect()
  }

  pub fn is_empty(&self) -> bool {
    self.ring.is_empty()
  }
}

pub(crate) fn hash_code<H: Hash>(item: &H) -> u64 {
  let mut hasher = WyHash::with_seed(0);
  item.hash(&mut hasher);
  hasher.finish()
}

#[test]
fn test_node_ring() {
  let mut ring = NodeRing::with_nodes(5, 4);
  for item in 0..200u32 {
    let owners = ring.owners(&item, 3);
    assert_eq!(owners.len(), 3);
    assert_eq!(owners.iter().unique().count(), 3);
    assert_eq!(owners, ring.owners(&item, 3));
    assert_eq!(ring.owners(&item, 9).len(), 5);
  }
  let before = ring.owners(&"some key", 2);
  ring.remove(4).unwrap();
  assert!(ring.owners(&"some key", 5).iter().all(|n| *n != 4));
  ring.insert(4);
  assert_eq!(before, ring.owners(&"some key", 2));
  for node in 0..5 {
    ring.remove(node).unwrap();
  }
  assert!(ring.is_empty());
  assert_eq!(ring.remove(0), Err(0));
}
