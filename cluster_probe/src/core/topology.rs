use serde::{Deserialize, Serialize};

/// The shape of the cluster as one worker sees it for one stage execution.
///
/// The master builds a fresh topology for every dispatch, so
/// [`live_workers`](ClusterTopology::live_workers) never contains a worker
/// that was excluded before the stage started.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterTopology {
  /// The configured number of workers, dead or alive.
  pub cluster_size: usize,
  /// The index of the worker this topology was built for.
  pub worker_index: usize,
  /// The indices of every worker taking part in the stage, in ascending
  /// order. Includes [`worker_index`](ClusterTopology::worker_index).
  pub live_workers: Vec<usize>,
}
impl ClusterTopology {
  /// A topology in which all `cluster_size` workers take part.
  pub fn new(cluster_size: usize, worker_index: usize) -> ClusterTopology {
    ClusterTopology {
      cluster_size: cluster_size,
      worker_index: worker_index,
      live_workers: (0..cluster_size).collect(),
    }
  }

  /// A topology restricted to the given participants.
  pub fn with_live(
    cluster_size: usize,
    worker_index: usize,
    mut live: Vec<usize>,
  ) -> ClusterTopology {
    live.sort_unstable();
    live.dedup();
    ClusterTopology {
      cluster_size: cluster_size,
      worker_index: worker_index,
      live_workers: live,
    }
  }

  /// Every participating worker except this one.
  pub fn peers(&self) -> impl Iterator<Item = usize> + '_ {
    let me = self.worker_index;
    self.live_workers.iter().copied().filter(move |w| *w != me)
  }

  /// Position of this worker among the participants, used to hand out
  /// disjoint slices of work.
  pub fn live_position(&self) -> Option<usize> {
    self.live_workers.binary_search(&self.worker_index).ok()
  }
}

/// Number of copies of every entry held across the cluster.
///
/// A non-negative `num_replicas` is the owner count itself. A negative value
/// encodes "replicated to every node" as `-ownersPerGroup * groupCount`, which
/// expands to `-num_replicas * cluster_size` copies.
pub fn replica_factor(num_replicas: i32, cluster_size: usize) -> u64 {
  if num_replicas >= 0 {
    num_replicas as u64
  } else {
    (-(num_replicas as i64)) as u64 * cluster_size as u64
  }
}

#[test]
fn test_replica_factor() {
  assert_eq!(replica_factor(2, 4), 2);
  assert_eq!(replica_factor(0, 4), 0);
  assert_eq!(replica_factor(-1, 4), 4);
  assert_eq!(replica_factor(-2, 3), 6);
}

#[test]
fn test_peers_skip_self() {
  let topo = ClusterTopology::with_live(5, 2, vec![4, 0, 2, 3]);
  assert_eq!(topo.peers().collect::<Vec<_>>(), vec![0, 3, 4]);
  assert_eq!(topo.live_position(), Some(1));
  let stranger = ClusterTopology::with_live(5, 1, vec![0, 2]);
  assert_eq!(stranger.live_position(), None);
}
