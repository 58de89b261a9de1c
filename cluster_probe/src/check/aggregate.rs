use crate::check::{CheckDataConfig, CheckTally};
use crate::core::{
  replica_factor, AckResult, AckSet, SegmentId, SizeAck, Verdict,
};
use itertools::Itertools;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Reduces the check-data acks of every worker into one verdict.
///
/// Every check runs regardless of earlier failures. Error acks themselves
/// are reported by the caller; here they only contribute their tallies.
pub fn check_data_on_master(
  config: &CheckDataConfig,
  acks: &AckSet,
) -> Verdict {
  let mut verdict = Verdict::pass();
  let mut sizes = SizeSums::default();
  let mut tallies = Vec::new();
  for ack in acks.iter() {
    match &ack.result {
      AckResult::Size(info) => {
        debug!(
          "Worker {} has owned size {}, local size {} and total size {:?}",
          ack.worker, info.owned_size, info.locally_stored_size, info.total_size
        );
        tallies.extend(info.tally);
        sizes.add(ack.worker, info, config, &mut verdict);
      }
      AckResult::Tally(t) => tallies.push(t.tally),
      _ => {}
    }
  }
  sizes.check_totals(&mut verdict);

  let factor = sizes
    .num_replicas
    .map(|n| replica_factor(n, acks.cluster_size));
  if config.check_subparts_are_replicas {
    if let Some(factor) = factor {
      for (segment, holders) in sizes.segments.iter() {
        if holders.len() as u64 != factor {
          verdict.fail(format!(
            "Segment {} was found on workers {:?}, should have {} replicas.",
            segment,
            holders.keys().collect::<Vec<_>>(),
            factor
          ));
        }
      }
    }
  }

  if !config.size_only {
    let tally: CheckTally = tallies.iter().sum();
    if config.deleted && tally.found > 0 {
      verdict.fail(format!(
        "Found {} entries in the cluster while all should be deleted, {}",
        tally.found, tally
      ));
    }
  }

  if config.ignore_sum {
    verdict.note(format!(
      "The sum of owned sizes is {}, sum of local sizes is {}",
      sizes.owned, sizes.local
    ));
    return verdict;
  }
  let expected_owned = match config.expected_owned_size(acks.cluster_size) {
    Ok(n) => n,
    Err(e) => {
      verdict.fail(e.to_string());
      return verdict;
    }
  };
  if let (Some(factor), Some(num_replicas)) = (factor, sizes.num_replicas) {
    let expected_local = expected_owned * factor;
    if expected_local != sizes.local {
      verdict.fail(format!(
        "The cluster should hold {} entries (including backups, {} replicas) \
         but holds {} entries.",
        expected_local, num_replicas, sizes.local
      ));
    } else {
      trace!("The sum of local sizes is {} entries as expected", sizes.local);
    }
  }
  if expected_owned != sizes.owned {
    verdict.fail(format!(
      "The cluster should hold {} entries but holds {} entries.",
      expected_owned, sizes.owned
    ));
  } else {
    trace!("The sum of owned sizes is {} entries as expected", sizes.owned);
  }
  if let Some(total) = sizes.total {
    if expected_owned != total {
      verdict.fail(format!(
        "The cluster should hold {} entries but total size is {}.",
        expected_owned, total
      ));
    }
  }
  verdict
}

#[derive(Default)]
struct SizeSums {
  owned: u64,
  local: u64,
  /// The first total reported, and who reported it.
  total: Option<u64>,
  total_reporters: BTreeMap<usize, u64>,
  silent_on_total: Vec<usize>,
  num_replicas: Option<i32>,
  /// Non-empty segments and their size on every worker holding them.
  segments: BTreeMap<SegmentId, BTreeMap<usize, u64>>,
}
impl SizeSums {
  fn add(
    &mut self,
    worker: usize,
    info: &SizeAck,
    config: &CheckDataConfig,
    verdict: &mut Verdict,
  ) {
    self.owned += info.owned_size;
    self.local += info.locally_stored_size;
    match info.total_size {
      Some(total) => {
        self.total.get_or_insert(total);
        self.total_reporters.insert(worker, total);
      }
      None => self.silent_on_total.push(worker),
    }
    match self.num_replicas {
      None => self.num_replicas = Some(info.num_replicas),
      Some(n) if n != info.num_replicas => verdict.fail(format!(
        "Worker {} reports {} replicas but other workers reported {} replicas",
        worker, info.num_replicas, n
      )),
      Some(_) => {}
    }

    let mut sum_segments = 0;
    for (segment, &size) in info.segment_sizes.iter() {
      trace!("Worker {}: segment {} = {}", worker, segment, size);
      if size == 0 {
        continue;
      }
      sum_segments += size;
      let holders = self.segments.entry(segment.clone()).or_default();
      if config.check_subparts_equal {
        for (other, other_size) in holders.iter() {
          if *other_size != size {
            verdict.fail(format!(
              "Worker {} reports segment {} = {} but worker {} reported size {}",
              worker, segment, size, other, other_size
            ));
          }
        }
      }
      holders.insert(worker, size);
    }
    if config.check_subparts_sum_local
      && sum_segments != info.locally_stored_size
    {
      verdict.fail(format!(
        "On worker {} sum of segment sizes ({}) is not the same as local size \
         ({})",
        worker, sum_segments, info.locally_stored_size
      ));
    }
  }

  fn check_totals(&self, verdict: &mut Verdict) {
    if self.total_reporters.is_empty() {
      return;
    }
    if !self.silent_on_total.is_empty() {
      verdict.fail(format!(
        "Workers {:?} do not report any total size but other workers reported \
         {:?}",
        self.silent_on_total,
        self.total_reporters.values().unique().collect::<Vec<_>>()
      ));
    }
    let distinct = self.total_reporters.values().unique().count();
    if distinct > 1 {
      verdict.fail(format!(
        "Workers disagree on the total size: {}",
        self
          .total_reporters
          .iter()
          .map(|(w, t)| format!("worker {} reports {}", w, t))
          .join(", ")
      ));
    }
  }
}
