use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Counters accumulated by one scanning thread.
///
/// A tally is owned by exactly one thread while it scans; tallies are only
/// combined after their threads have finished.
#[derive(
  Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct CheckTally {
  /// Keys looked up.
  pub checked: u64,
  /// Keys holding the expected value. In deletion mode: keys still present.
  pub found: u64,
  /// Keys with no value.
  pub null_values: u64,
  /// Keys holding something other than the expected value.
  pub invalid_values: u64,
  /// Lookups that failed with a store error.
  pub exceptions: u64,
}
impl CheckTally {
  pub fn merge(&mut self, other: &CheckTally) {
    self.checked += other.checked;
    self.found += other.found;
    self.null_values += other.null_values;
    self.invalid_values += other.invalid_values;
    self.exceptions += other.exceptions;
  }
}
impl Add for CheckTally {
  type Output = CheckTally;

  fn add(mut self, rhs: CheckTally) -> CheckTally {
    self.merge(&rhs);
    self
  }
}
impl AddAssign for CheckTally {
  fn add_assign(&mut self, rhs: CheckTally) {
    self.merge(&rhs);
  }
}
impl Sum for CheckTally {
  fn sum<I: Iterator<Item = CheckTally>>(iter: I) -> CheckTally {
    iter.fold(CheckTally::default(), Add::add)
  }
}
impl<'a> Sum<&'a CheckTally> for CheckTally {
  fn sum<I: Iterator<Item = &'a CheckTally>>(iter: I) -> CheckTally {
    iter.fold(CheckTally::default(), |acc, t| acc + *t)
  }
}
impl fmt::Display for CheckTally {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "[checked={}, found={}, nullValues={}, invalidValues={}, exceptions={}]",
      self.checked,
      self.found,
      self.null_values,
      self.invalid_values,
      self.exceptions
    )
  }
}

#[test]
fn test_tally_merge_keeps_fields_apart() {
  let a = CheckTally {
    checked: 10,
    found: 7,
    null_values: 1,
    invalid_values: 2,
    exceptions: 0,
  };
  let b = CheckTally {
    checked: 5,
    found: 0,
    null_values: 0,
    invalid_values: 0,
    exceptions: 5,
  };
  let sum: CheckTally = vec![a, b].into_iter().sum();
  assert_eq!(sum.checked, 15);
  assert_eq!(sum.invalid_values, 2);
  assert_eq!(sum.exceptions, 5);
  assert_eq!(sum, b + a);
}
