use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Half-open interval of entry indices, `[from, to)`.
#[derive(
  Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct IndexRange {
  pub from: u64,
  pub to: u64,
}
impl IndexRange {
  pub fn new(from: u64, to: u64) -> IndexRange {
    debug_assert!(from <= to, "inverted range [{}, {})", from, to);
    IndexRange { from: from, to: to }
  }

  pub fn len(&self) -> u64 {
    self.to - self.from
  }

  pub fn is_empty(&self) -> bool {
    self.from == self.to
  }

  pub fn contains(&self, index: u64) -> bool {
    self.from <= index && index < self.to
  }

  pub fn indices(&self) -> Range<u64> {
    self.from..self.to
  }

  /// The same range moved up by `offset`.
  pub fn shift(self, offset: u64) -> IndexRange {
    IndexRange::new(self.from + offset, self.to + offset)
  }

  /// Part `part` of `[0, num_entries)` split into `parts` contiguous pieces.
  /// The first `num_entries % parts` pieces are one longer than the rest.
  pub fn divide(num_entries: u64, parts: usize, part: usize) -> IndexRange {
    assert!(part < parts, "part {} of {}", part, parts);
    let parts = parts as u64;
    let part = part as u64;
    let base = num_entries / parts + 1;
    let rem = num_entries % parts;
    if part < rem {
      let start = part * base;
      IndexRange::new(start, start + base)
    } else {
      let start = base * rem + (part - rem) * (base - 1);
      IndexRange::new(start, start + base - 1)
    }
  }
}
impl fmt::Display for IndexRange {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}, {})", self.from, self.to)
  }
}

/// Splits `[0, num_entries)` into `parts` contiguous, disjoint ranges whose
/// lengths differ by at most one. Zero parts yield no ranges.
pub fn partition(num_entries: u64, parts: usize) -> Vec<IndexRange> {
  (0..parts)
    .map(|p| IndexRange::divide(num_entries, parts, p))
    .collect()
}

#[test]
fn test_divide_range() {
  assert_eq!(
    partition(10, 3),
    vec![
      IndexRange::new(0, 4),
      IndexRange::new(4, 7),
      IndexRange::new(7, 10)
    ]
  );
  assert_eq!(
    partition(2, 4),
    vec![
      IndexRange::new(0, 1),
      IndexRange::new(1, 2),
      IndexRange::new(2, 2),
      IndexRange::new(2, 2)
    ]
  );
  assert_eq!(partition(0, 2), vec![IndexRange::new(0, 0); 2]);
  assert!(partition(5, 0).is_empty());
  assert_eq!(IndexRange::new(3, 5).shift(10), IndexRange::new(13, 15));
}
