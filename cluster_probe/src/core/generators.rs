use crate::core::Value;
use serde::{Deserialize, Serialize};
use wyhash::wyrng;

const TEXT_ALPHABET: &[u8] =
  b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SEED_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// Turns an entry index into the key it is stored under.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyGenerator {
  /// `"{prefix}{index}"`
  Prefixed(String),
  /// The decimal index itself.
  Numeric,
}
impl KeyGenerator {
  /// The key for entry `index`.
  pub fn generate(&self, index: u64) -> String {
    match self {
      KeyGenerator::Prefixed(prefix) => format!("{}{}", prefix, index),
      KeyGenerator::Numeric => index.to_string(),
    }
  }
}
impl Default for KeyGenerator {
  fn default() -> Self {
    KeyGenerator::Prefixed("key_".to_string())
  }
}

/// Produces the value stored for an entry index and recognises it again.
///
/// Generation is a pure function of `(index, size)`: two workers generating
/// the same index always agree, which is what lets any worker check data
/// loaded by any other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueGenerator {
  /// `size` pseudo-random bytes seeded by the index.
  Bytes,
  /// `"value{index}:"` padded with pseudo-random letters up to `size`.
  Text,
  /// The index as a [`Value::Long`]. Ignores `size`.
  Long,
}
impl ValueGenerator {
  /// The value for entry `index`.
  pub fn generate(&self, index: u64, size: usize) -> Value {
    match self {
      ValueGenerator::Bytes => {
        let mut seed = index ^ SEED_MIX;
        let mut bytes = Vec::with_capacity(size);
        while bytes.len() < size {
          let word = wyrng(&mut seed).to_le_bytes();
          let take = std::cmp::min(word.len(), size - bytes.len());
          bytes.extend_from_slice(&word[..take]);
        }
        Value::Bytes(bytes)
      }
      ValueGenerator::Text => {
        let mut text = format!("value{}:", index);
        let mut seed = index ^ SEED_MIX;
        while text.len() < size {
          let pick = wyrng(&mut seed) % TEXT_ALPHABET.len() as u64;
          text.push(TEXT_ALPHABET[pick as usize] as char);
        }
        Value::Text(text)
      }
      ValueGenerator::Long => Value::Long(index as i64),
    }
  }

  /// Whether `value` is exactly what [`generate`](Self::generate) produces
  /// for `index`.
  pub fn check(&self, index: u64, value: &Value, size: usize) -> bool {
    match (self, value) {
      (ValueGenerator::Bytes, Value::Bytes(b)) if b.len() != size => false,
      (ValueGenerator::Long, Value::Long(l)) => *l == index as i64,
      (ValueGenerator::Long, _) => false,
      _ => *value == self.generate(index, size),
    }
  }
}
impl Default for ValueGenerator {
  fn default() -> Self {
    ValueGenerator::Bytes
  }
}

#[test]
fn test_generated_values_check() {
  for gen in [ValueGenerator::Bytes, ValueGenerator::Text, ValueGenerator::Long]
    .iter()
  {
    for index in [0u64, 1, 17, 99_999].iter() {
      let value = gen.generate(*index, 37);
      assert!(gen.check(*index, &value, 37), "{:?} {}", gen, index);
      assert!(!gen.check(*index + 1, &value, 37), "{:?} {}", gen, index);
    }
  }
  assert_eq!(ValueGenerator::Bytes.generate(3, 37).size(), 37);
  assert_eq!(ValueGenerator::Text.generate(3, 37).size(), 37);
  assert!(!ValueGenerator::Bytes.check(3, &Value::Long(3), 8));
  let text = ValueGenerator::Text.generate(3, 10);
  assert!(!ValueGenerator::Text.check(3, &text, 11));
}

#[test]
fn test_key_generators() {
  assert_eq!(KeyGenerator::default().generate(42), "key_42");
  assert_eq!(KeyGenerator::Numeric.generate(7), "7");
}
