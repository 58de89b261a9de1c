use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info};

/// Pass/fail outcome of a stage with every diagnostic gathered on the way.
///
/// Checks record failures with [`fail`](Verdict::fail) and keep going, so a
/// single run lists every violated invariant rather than the first one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
  failed: bool,
  diagnostics: Vec<String>,
}
impl Verdict {
  /// A passing verdict with no diagnostics.
  pub fn pass() -> Verdict {
    Verdict::default()
  }

  pub fn passed(&self) -> bool {
    !self.failed
  }

  /// Marks the verdict as failed and records why.
  pub fn fail<S: Into<String>>(&mut self, msg: S) {
    let msg = msg.into();
    error!("{}", msg);
    self.failed = true;
    self.diagnostics.push(msg);
  }

  /// Records an informational line without affecting the outcome.
  pub fn note<S: Into<String>>(&mut self, msg: S) {
    let msg = msg.into();
    info!("{}", msg);
    self.diagnostics.push(msg);
  }

  pub fn diagnostics(&self) -> &[String] {
    &self.diagnostics
  }

  /// Folds another verdict into this one.
  pub fn merge(&mut self, other: Verdict) {
    self.failed |= other.failed;
    self.diagnostics.extend(other.diagnostics);
  }

  /// Whether any diagnostic contains `needle`. Handy in tests.
  pub fn mentions(&self, needle: &str) -> bool {
    self.diagnostics.iter().any(|d| d.contains(needle))
  }
}
impl fmt::Display for Verdict {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "{}", if self.failed { "FAILED" } else { "PASSED" })?;
    for line in &self.diagnostics {
      writeln!(f, "  {}", line)?;
    }
    Ok(())
  }
}

#[test]
fn test_verdict_keeps_every_failure() {
  let mut v = Verdict::pass();
  v.note("sizes look fine");
  assert!(v.passed());
  v.fail("first");
  v.fail("second");
  let mut other = Verdict::pass();
  other.note("third");
  v.merge(other);
  assert!(!v.passed());
  assert_eq!(v.diagnostics().len(), 4);
  assert!(v.mentions("second"));
}
