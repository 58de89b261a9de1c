use im::HashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Faults injected into every operation on a simulated node.
#[derive(Default, Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct FailureConfig {
  /// Probability that an operation fails with a transient error.
  pub error_prob: f64,
  /// Bounds of a uniformly random delay added to every operation.
  pub delay: Option<(Duration, Duration)>,
}
impl FailureConfig {
  /// Sleeps for the configured delay, then decides whether the operation
  /// fails.
  pub fn inject<R: Rng>(&self, rng: &mut R) -> bool {
    if let Some((min, max)) = self.delay {
      let delay = if min < max { rng.gen_range(min..max) } else { min };
      thread::sleep(delay);
    }
    self.error_prob > 0.0 && rng.gen_bool(self.error_prob.min(1.0))
  }
}

#[derive(Clone, Default, Serialize, Deserialize, Debug)]
pub struct FailureConfigMap {
  pub cluster_wide: FailureConfig,
  pub node_wide: HashMap<usize, FailureConfig>,
}
impl FailureConfigMap {
  pub fn get(&self, node: usize) -> &FailureConfig {
    self.node_wide.get(&node).unwrap_or(&self.cluster_wide)
  }
}

#[test]
fn test_node_wide_overrides_cluster_wide() {
  let mut map = FailureConfigMap::default();
  map.cluster_wide.error_prob = 0.5;
  map.node_wide.insert(
    2,
    FailureConfig {
      error_prob: 1.0,
      delay: None,
    },
  );
  assert_eq!(map.get(0).error_prob, 0.5);
  assert_eq!(map.get(2).error_prob, 1.0);
  let mut rng = rand::thread_rng();
  assert!(map.get(2).inject(&mut rng));
  assert!(!FailureConfig::default().inject(&mut rng));
}
