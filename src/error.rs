//! Construction-time errors.
//!
//! Nothing that happens while ingesting bars or evaluating an instrument is
//! fatal. The only hard failures are misconfigurations caught when the store,
//! the builder or the pipeline is created.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("buffer capacity must be positive")]
    ZeroCapacity,
    #[error("base period must be positive (got {0} minutes)")]
    InvalidBasePeriod(u32),
    #[error("{period} minute timeframe is not a multiple of the {base} minute base period")]
    UnalignedTimeframe { period: u32, base: u32 },
    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),
    #[error("unknown exchange timezone: {0}")]
    UnknownTimezone(String),
}
