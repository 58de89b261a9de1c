use cluster_probe::check::{parse_extra_entries, partition, CheckTally};
use proptest::prelude::*;

fn tally() -> impl Strategy<Value = CheckTally> {
  (0..1000u64, 0..1000u64, 0..1000u64, 0..1000u64, 0..1000u64).prop_map(
    |(checked, found, null_values, invalid_values, exceptions)| CheckTally {
      checked: checked,
      found: found,
      null_values: null_values,
      invalid_values: invalid_values,
      exceptions: exceptions,
    },
  )
}

proptest! {
  #[test]
  fn partition_covers_every_index_once(
    num_entries in 0u64..10_000,
    parts in 1usize..64,
  ) {
    let ranges = partition(num_entries, parts);
    prop_assert_eq!(ranges.len(), parts);
    let mut next = 0;
    for range in ranges.iter() {
      prop_assert_eq!(range.from, next);
      prop_assert!(range.from <= range.to);
      next = range.to;
    }
    prop_assert_eq!(next, num_entries);
    let lens = ranges.iter().map(|r| r.len()).collect::<Vec<_>>();
    let min = *lens.iter().min().unwrap();
    let max = *lens.iter().max().unwrap();
    prop_assert!(max - min <= 1);
  }

  #[test]
  fn tally_merge_ignores_order(
    mut tallies in prop::collection::vec(tally(), 0..16),
    seed in any::<u64>(),
  ) {
    let forward: CheckTally = tallies.iter().sum();
    let len = tallies.len();
    if len > 1 {
      tallies.rotate_left((seed as usize) % len);
      tallies.swap(0, len - 1);
    }
    let shuffled: CheckTally = tallies.iter().sum();
    prop_assert_eq!(forward, shuffled);
    prop_assert_eq!(
      forward.checked,
      tallies.iter().map(|t| t.checked).sum::<u64>()
    );
    prop_assert_eq!(
      forward.exceptions,
      tallies.iter().map(|t| t.exceptions).sum::<u64>()
    );
  }

  #[test]
  fn tally_merge_is_associative(a in tally(), b in tally(), c in tally()) {
    prop_assert_eq!((a + b) + c, a + (b + c));
    prop_assert_eq!(a + b, b + a);
  }

  #[test]
  fn extra_entries_is_a_polynomial(
    c0 in 0u64..1000,
    c1 in 0u64..1000,
    c2 in 0u64..1000,
    n in 1usize..100,
  ) {
    let poly = format!("{}, {},{}", c0, c1, c2);
    let n64 = n as u64;
    prop_assert_eq!(
      parse_extra_entries(Some(&poly), n).unwrap(),
      c0 + c1 * n64 + c2 * n64 * n64
    );
  }
}

#[test]
fn test_extra_entries_edge_cases() {
  assert_eq!(parse_extra_entries(None, 4).unwrap(), 0);
  assert_eq!(parse_extra_entries(Some("  "), 4).unwrap(), 0);
  assert_eq!(parse_extra_entries(Some("1,2"), 4).unwrap(), 9);
  assert!(parse_extra_entries(Some("1,-2"), 4).is_err());
  assert!(parse_extra_entries(Some("1,x"), 4).is_err());
}
