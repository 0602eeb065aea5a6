// Library crate - exports the decision core and its replay stream

pub mod error;
pub mod types;
pub mod trading_core;
pub mod streams;

// Re-export commonly used types
pub use error::ConfigError;
pub use types::{Bias, Direction};
