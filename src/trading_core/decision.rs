//! Decision pipeline output

use chrono::NaiveDateTime;
use serde::Serialize;

use super::htf_bias::BiasLabel;
use super::market_regime::RegimeState;
use super::mtf::MtfConfidence;
use super::signals::{SignalClass, SignalKind};
use super::vwap::Acceptance;
use crate::types::{Bias, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeState {
    Ignore,
    PrepareLong,
    PrepareShort,
    ExecuteLong,
    ExecuteShort,
}

impl TradeState {
    pub fn prepare(direction: Direction) -> Self {
        match direction {
            Direction::Long => Self::PrepareLong,
            Direction::Short => Self::PrepareShort,
        }
    }

    pub fn execute(direction: Direction) -> Self {
        match direction {
            Direction::Long => Self::ExecuteLong,
            Direction::Short => Self::ExecuteShort,
        }
    }

    pub fn is_execute(&self) -> bool {
        matches!(self, Self::ExecuteLong | Self::ExecuteShort)
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            Self::Ignore => None,
            Self::PrepareLong | Self::ExecuteLong => Some(Direction::Long),
            Self::PrepareShort | Self::ExecuteShort => Some(Direction::Short),
        }
    }
}

impl std::fmt::Display for TradeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ignore => write!(f, "IGNORE"),
            Self::PrepareLong => write!(f, "PREPARE_LONG"),
            Self::PrepareShort => write!(f, "PREPARE_SHORT"),
            Self::ExecuteLong => write!(f, "EXECUTE_LONG"),
            Self::ExecuteShort => write!(f, "EXECUTE_SHORT"),
        }
    }
}

/// Points contributed by each stage, already signed for the trade direction
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ScoreBreakdown {
    pub regime: f64,
    pub htf: f64,
    pub vwap: f64,
    /// Soft VWAP gate penalty (zero or negative)
    pub vwap_penalty: f64,
    pub structure: f64,
    pub volume: f64,
    pub volatility: f64,
    pub liquidity: f64,
    pub price_action: f64,
    pub location: f64,
    /// RSI penalty (zero or negative)
    pub momentum: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.regime
            + self.htf
            + self.vwap
            + self.vwap_penalty
            + self.structure
            + self.volume
            + self.volatility
            + self.liquidity
            + self.price_action
            + self.location
            + self.momentum
    }
}

/// Context read along the way, for logs
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ContextNotes {
    pub mtf_direction: Option<Bias>,
    pub mtf_strength: Option<f64>,
    pub mtf_confidence: Option<MtfConfidence>,
    pub regime: Option<RegimeState>,
    pub regime_strength: Option<f64>,
    pub htf_direction: Option<Bias>,
    pub htf_label: Option<BiasLabel>,
    pub vwap: Option<f64>,
    pub vwap_acceptance: Option<Acceptance>,
    pub signal_kind: Option<SignalKind>,
    pub signal_class: Option<SignalClass>,
    pub signal_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionResult {
    pub instrument: String,
    /// Start of the newest base bar
    pub timestamp: NaiveDateTime,
    pub state: TradeState,
    /// 0 ..= 10, two decimals
    pub score: f64,
    /// Set exactly when the state is not IGNORE
    pub direction: Option<Direction>,
    pub breakdown: ScoreBreakdown,
    pub reason: String,
    pub notes: ContextNotes,
}

impl DecisionResult {
    pub fn new(
        instrument: &str,
        timestamp: NaiveDateTime,
        state: TradeState,
        score: f64,
        breakdown: ScoreBreakdown,
        reason: impl Into<String>,
        notes: ContextNotes,
    ) -> Self {
        Self {
            instrument: instrument.to_string(),
            timestamp,
            state,
            score,
            direction: state.direction(),
            breakdown,
            reason: reason.into(),
            notes,
        }
    }

    pub fn ignore(
        instrument: &str,
        timestamp: NaiveDateTime,
        reason: impl Into<String>,
        breakdown: ScoreBreakdown,
        notes: ContextNotes,
    ) -> Self {
        Self::new(instrument, timestamp, TradeState::Ignore, 0.0, breakdown, reason, notes)
    }
}
