use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use validator::{Validate, ValidationError};

/// How long to wait for node sizes to settle before reporting them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_band"))]
pub struct ConvergenceConfig {
  /// Lowest acceptable `observed / expected` ratio. default: `0.9`
  #[validate(range(min = 0.0))]
  pub min_ratio: f64,
  /// Highest acceptable `observed / expected` ratio. default: `1.1`
  #[validate(range(min = 0.0))]
  pub max_ratio: f64,
  /// Polls before giving up. default: `5`
  #[validate(range(min = 1))]
  pub max_attempts: u32,
  /// Sleep between two polls. default: `30 s`
  pub interval: Duration,
}
impl Default for ConvergenceConfig {
  fn default() -> Self {
    ConvergenceConfig {
      min_ratio: 0.9,
      max_ratio: 1.1,
      max_attempts: 5,
      interval: Duration::from_secs(30),
    }
  }
}

fn validate_band(config: &ConvergenceConfig) -> Result<(), ValidationError> {
  if config.min_ratio <= config.max_ratio {
    Ok(())
  } else {
    Err(ValidationError::new("min_ratio_above_max_ratio"))
  }
}

/// A size that should reach `expected` once replication has settled.
pub struct SizeMetric<'a> {
  pub name: &'static str,
  pub expected: u64,
  observe: Box<dyn Fn() -> u64 + 'a>,
}
impl<'a> SizeMetric<'a> {
  pub fn new<F>(name: &'static str, expected: u64, observe: F) -> SizeMetric<'a>
  where
    F: Fn() -> u64 + 'a,
  {
    SizeMetric {
      name: name,
      expected: expected,
      observe: Box::new(observe),
    }
  }
}

/// Result of [`ConvergenceWaiter::wait`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Convergence {
  /// Polls made, at least one.
  pub attempts: u32,
  /// Whether every metric was inside the band on the last poll.
  pub converged: bool,
  /// Values observed on the last poll, in metric order.
  pub observed: Vec<u64>,
}

/// Polls size metrics until all of them fall inside the tolerance band.
///
/// Never fails: if the band is not reached the caller reports whatever was
/// last observed and leaves the verdict to the master.
pub struct ConvergenceWaiter<'a> {
  config: &'a ConvergenceConfig,
  sleep: Box<dyn Fn(Duration) + 'a>,
}
impl<'a> ConvergenceWaiter<'a> {
  pub fn new(config: &'a ConvergenceConfig) -> ConvergenceWaiter<'a> {
    ConvergenceWaiter::with_sleep(config, thread::sleep)
  }

  /// A waiter that pauses with `sleep` instead of blocking the thread.
  pub fn with_sleep<F>(
    config: &'a ConvergenceConfig,
    sleep: F,
  ) -> ConvergenceWaiter<'a>
  where
    F: Fn(Duration) + 'a,
  {
    ConvergenceWaiter {
      config: config,
      sleep: Box::new(sleep),
    }
  }

  pub fn in_band(&self, observed: u64, expected: u64) -> bool {
    if expected == 0 {
      return observed == 0;
    }
    let ratio = observed as f64 / expected as f64;
    self.config.min_ratio <= ratio && ratio <= self.config.max_ratio
  }

  pub fn wait(&self, metrics: &[SizeMetric<'_>]) -> Convergence {
    let mut attempt = 0;
    loop {
      attempt += 1;
      let observed = metrics.iter().map(|m| (m.observe)()).collect::<Vec<_>>();
      let diverging = metrics
        .iter()
        .zip(observed.iter())
        .find(|(m, o)| !self.in_band(**o, m.expected));
      match diverging {
        None => {
          debug!("Sizes {:?} converged after {} attempt(s)", observed, attempt);
          return Convergence {
            attempts: attempt,
            converged: true,
            observed: observed,
          };
        }
        Some(_) if attempt >= self.config.max_attempts => {
          warn!(
            "Sizes {:?} did not converge after {} attempts, reporting them anyway",
            observed, attempt
          );
          return Convergence {
            attempts: attempt,
            converged: false,
            observed: observed,
          };
        }
        Some((metric, o)) => {
          warn!(
            "{} ({}) differs substantially from expected size ({}), waiting {:?} to let it replicate",
            metric.name, o, metric.expected, self.config.interval
          );
          (self.sleep)(self.config.interval);
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::Cell;

  #[test]
  fn test_exact_match_does_not_sleep() {
    let config = ConvergenceConfig::default();
    let sleeps = Cell::new(0);
    let waiter = ConvergenceWaiter::with_sleep(&config, |_| {
      sleeps.set(sleeps.get() + 1)
    });
    let res = waiter.wait(&[
      SizeMetric::new("Owned size", 100, || 100),
      SizeMetric::new("Locally stored size", 200, || 200),
    ]);
    assert!(res.converged);
    assert_eq!(res.attempts, 1);
    assert_eq!(sleeps.get(), 0);
  }

  #[test]
  fn test_waits_until_both_metrics_settle() {
    let config = ConvergenceConfig::default();
    let polls = Cell::new(0u64);
    let slept = Cell::new(Duration::from_secs(0));
    let waiter = ConvergenceWaiter::with_sleep(&config, |d| {
      slept.set(slept.get() + d)
    });
    let owned = || {
      polls.set(polls.get() + 1);
      100
    };
    // Local size only reaches the band on the third poll.
    let local = || if polls.get() >= 3 { 195 } else { 120 };
    let res = waiter.wait(&[
      SizeMetric::new("Owned size", 100, owned),
      SizeMetric::new("Locally stored size", 200, local),
    ]);
    assert!(res.converged);
    assert_eq!(res.attempts, 3);
    assert_eq!(res.observed, vec![100, 195]);
    assert_eq!(slept.get(), Duration::from_secs(60));
  }

  #[test]
  fn test_gives_up_after_max_attempts() {
    let config = ConvergenceConfig {
      max_attempts: 3,
      ..ConvergenceConfig::default()
    };
    let sleeps = Cell::new(0);
    let waiter = ConvergenceWaiter::with_sleep(&config, |_| {
      sleeps.set(sleeps.get() + 1)
    });
    let res = waiter.wait(&[SizeMetric::new("Owned size", 0, || 3)]);
    assert!(!res.converged);
    assert_eq!(res.attempts, 3);
    assert_eq!(res.observed, vec![3]);
    assert_eq!(sleeps.get(), 2);
  }

  #[test]
  fn test_band_validation() {
    let config = ConvergenceConfig {
      min_ratio: 1.2,
      ..ConvergenceConfig::default()
    };
    assert!(config.validate().is_err());
    assert!(ConvergenceConfig::default().validate().is_ok());
  }
}
