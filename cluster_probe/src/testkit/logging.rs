use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::level_filters::LevelFilter;

#[derive(
  Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum LogLevel {
  Trace,
  Debug,
  Info,
  Warn,
  Error,
  Fatal,
  Off,
}
impl LogLevel {
  pub const MIN: LogLevel = LogLevel::Trace;

  pub fn filter(&self) -> LevelFilter {
    match self {
      LogLevel::Trace => LevelFilter::TRACE,
      LogLevel::Debug => LevelFilter::DEBUG,
      LogLevel::Info => LevelFilter::INFO,
      LogLevel::Warn => LevelFilter::WARN,
      LogLevel::Error | LogLevel::Fatal => LevelFilter::ERROR,
      LogLevel::Off => LevelFilter::OFF,
    }
  }
}
impl FromStr for LogLevel {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "trace" => Ok(LogLevel::Trace),
      "debug" => Ok(LogLevel::Debug),
      "info" => Ok(LogLevel::Info),
      "warn" => Ok(LogLevel::Warn),
      "error" => Ok(LogLevel::Error),
      "fatal" => Ok(LogLevel::Fatal),
      "off" => Ok(LogLevel::Off),
      _ => Err(format!("unknown log level: {}", s)),
    }
  }
}

/// Installs a global fmt subscriber printing events at `level` and above.
/// Only the first call in a process has an effect.
pub fn init_logging(level: LogLevel) {
  let _ = tracing_subscriber::fmt()
    .with_max_level(level.filter())
    .with_thread_names(true)
    .try_init();
}

#[test]
fn test_log_level_order() {
  assert!(LogLevel::MIN < LogLevel::Info);
  assert!(LogLevel::Fatal < LogLevel::Off);
  assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warn));
  assert_eq!(LogLevel::Fatal.filter(), LevelFilter::ERROR);
}
