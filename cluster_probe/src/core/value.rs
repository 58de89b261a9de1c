use serde::{Deserialize, Serialize};
use std::fmt;

/// A value stored under a key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
  /// A signed counter or marker.
  Long(i64),
  /// A textual payload.
  Text(String),
  /// An opaque payload.
  Bytes(Vec<u8>),
}
impl Value {
  /// The numeric content, if this is a [`Value::Long`].
  pub fn as_long(&self) -> Option<i64> {
    match self {
      Value::Long(l) => Some(*l),
      _ => None,
    }
  }

  /// Payload length in bytes. Longs count as eight.
  pub fn size(&self) -> usize {
    match self {
      Value::Long(_) => 8,
      Value::Text(s) => s.len(),
      Value::Bytes(b) => b.len(),
    }
  }
}
impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Long(l) => write!(f, "{}", l),
      Value::Text(s) if s.chars().count() > 32 => {
        write!(f, "\"{}...\"", s.chars().take(32).collect::<String>())
      }
      Value::Text(s) => write!(f, "\"{}\"", s),
      Value::Bytes(b) => write!(f, "byte[{}]", b.len()),
    }
  }
}
