//! Trading Core - bar aggregation and trade decisions
//!
//! This module contains the decision engine components:
//! - Bar storage and multi-timeframe aggregation
//! - Indicators and market analyzers (volume, volatility, liquidity, VWAP,
//!   higher-timeframe bias, regime, price action, levels)
//! - Breakout and pullback signal detection
//! - The gate-and-score decision pipeline
//! - Feed parsing and orchestration

pub mod bars;
pub mod bar_store;
pub mod mtf;
pub mod indicators;
pub mod volume;
pub mod volatility;
pub mod liquidity;
pub mod vwap;
pub mod htf_bias;
pub mod market_regime;
pub mod price_action;
pub mod levels;
pub mod signals;
pub mod breakout;
pub mod pullback;
pub mod config;
pub mod decision;
pub mod context;
pub mod pipeline;
pub mod feed;
pub mod orchestrator;

// Re-export commonly used types
pub use bars::{Bar, BarSeries};
pub use bar_store::BarStore;
pub use mtf::{AggregateCandle, MtfBuilder, MtfConfidence, MtfContext};
pub use signals::{Signal, SignalClass, SignalDetector, SignalKind};
pub use config::{CoreConfig, DetectorKind, EngineConfig, GateMode, HtfAlignment, PipelineConfig};
pub use decision::{DecisionResult, ScoreBreakdown, TradeState};
pub use context::EngineContext;
pub use pipeline::DecisionPipeline;
pub use feed::{FeedMessage, FeedUpdate};
pub use orchestrator::{ExecutionHandler, LoggingExecutor, Orchestrator, OrchestratorStats};
