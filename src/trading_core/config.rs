//! Configuration for the engine and the decision pipeline

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::bar_store::DEFAULT_CAPACITY;
use super::breakout::BreakoutConfig;
use super::htf_bias::HtfBiasConfig;
use super::liquidity::LiquidityConfig;
use super::market_regime::RegimeConfig;
use super::mtf::DEFAULT_MAX_BASE_BARS;
use super::pullback::PullbackConfig;
use super::volume::VolumeConfig;
use crate::error::ConfigError;

/// How a failed context check is applied
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// Reject the candidate outright
    Veto,
    /// Keep the candidate but subtract this many points
    Penalty(f64),
}

/// What the HTF bias must say about the MTF direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HtfAlignment {
    /// Bias direction must equal the MTF direction (neutral rejects)
    MustMatch,
    /// Only an opposite bias rejects
    MustNotOppose,
}

/// Structure detector feeding the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Breakout,
    Pullback,
}

impl std::fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Breakout => write!(f, "breakout"),
            Self::Pullback => write!(f, "pullback"),
        }
    }
}

/// Point values added or removed by the scoring stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Regime bonus base for TRENDING
    pub trending_bonus: f64,
    /// Regime bonus base for EARLY_TREND
    pub early_trend_bonus: f64,
    /// HTF bonus for a STRONG bias (WEAK earns two thirds)
    pub htf_bonus: f64,
    /// Score reported with a POTENTIAL signal
    pub potential_score: f64,
    /// Added for a CONFIRMED signal
    pub structure_bonus: f64,
    pub price_action_weight: f64,
    pub location_weight: f64,
    /// Subtracted when RSI argues against the trade
    pub momentum_penalty: f64,
    pub rsi_period: usize,
    /// Longs below this RSI are penalized
    pub rsi_long_floor: f64,
    /// Shorts above this RSI are penalized
    pub rsi_short_ceiling: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            trending_bonus: 1.2,
            early_trend_bonus: 0.8,
            htf_bonus: 1.2,
            potential_score: 1.0,
            structure_bonus: 3.0,
            price_action_weight: 1.0,
            location_weight: 0.9,
            momentum_penalty: 0.5,
            rsi_period: 14,
            rsi_long_floor: 40.0,
            rsi_short_ceiling: 60.0,
        }
    }
}

/// Configuration for the decision pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Base bars required before evaluating at all
    pub min_bars: usize,

    /// Fast higher timeframe in minutes
    pub fast_period_minutes: u32,

    /// Slow higher timeframe in minutes
    pub slow_period_minutes: u32,

    /// Candles per timeframe inspected for persistence
    pub mtf_lookback: usize,

    pub detector: DetectorKind,

    pub htf_alignment: HtfAlignment,

    /// Price accepted on the wrong side of VWAP
    pub vwap_gate: GateMode,

    /// Negative liquidity score
    pub liquidity_gate: GateMode,

    /// Score at or above which the state is EXECUTE
    pub execute_threshold: f64,

    /// Score at or above which the state is PREPARE
    pub prepare_threshold: f64,

    /// Furthest S/R level considered for location scoring (fraction of price)
    pub location_max_pct: f64,

    /// Instrument whose regime nudges every other instrument's regime strength
    pub index_instrument: Option<String>,

    pub weights: ScoringWeights,
    pub volume: VolumeConfig,
    pub liquidity: LiquidityConfig,
    pub regime: RegimeConfig,
    pub htf: HtfBiasConfig,
    pub breakout: BreakoutConfig,
    pub pullback: PullbackConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_bars: 30,
            fast_period_minutes: 15,
            slow_period_minutes: 30,
            mtf_lookback: 3,
            detector: DetectorKind::Breakout,
            htf_alignment: HtfAlignment::MustNotOppose,
            vwap_gate: GateMode::Veto,
            liquidity_gate: GateMode::Veto,
            execute_threshold: 6.0,
            prepare_threshold: 3.5,
            location_max_pct: 0.018,
            index_instrument: None,
            weights: ScoringWeights::default(),
            volume: VolumeConfig::default(),
            liquidity: LiquidityConfig::default(),
            regime: RegimeConfig::default(),
            htf: HtfBiasConfig::default(),
            breakout: BreakoutConfig::default(),
            pullback: PullbackConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Strict breakout policy (the default)
    pub fn breakout() -> Self {
        Self::default()
    }

    /// Softer pullback policy: HTF must agree, VWAP and liquidity only cost points
    pub fn pullback() -> Self {
        Self {
            min_bars: 35,
            detector: DetectorKind::Pullback,
            htf_alignment: HtfAlignment::MustMatch,
            vwap_gate: GateMode::Penalty(1.0),
            liquidity_gate: GateMode::Penalty(0.0),
            execute_threshold: 5.5,
            prepare_threshold: 4.0,
            ..Default::default()
        }
    }

    pub fn for_detector(kind: DetectorKind) -> Self {
        match kind {
            DetectorKind::Breakout => Self::breakout(),
            DetectorKind::Pullback => Self::pullback(),
        }
    }

    pub fn validate(&self, base_period_minutes: u32) -> Result<(), ConfigError> {
        if base_period_minutes == 0 {
            return Err(ConfigError::InvalidBasePeriod(base_period_minutes));
        }
        for period in [self.fast_period_minutes, self.slow_period_minutes] {
            if period == 0 || period % base_period_minutes != 0 {
                return Err(ConfigError::UnalignedTimeframe {
                    period,
                    base: base_period_minutes,
                });
            }
        }
        if !(0.0..=10.0).contains(&self.execute_threshold) || !(0.0..=10.0).contains(&self.prepare_threshold) {
            return Err(ConfigError::InvalidThreshold(format!(
                "thresholds must lie in [0, 10], got execute {} prepare {}",
                self.execute_threshold, self.prepare_threshold
            )));
        }
        if self.prepare_threshold > self.execute_threshold {
            return Err(ConfigError::InvalidThreshold(format!(
                "prepare threshold {} above execute threshold {}",
                self.prepare_threshold, self.execute_threshold
            )));
        }
        for gate in [self.vwap_gate, self.liquidity_gate] {
            if let GateMode::Penalty(p) = gate {
                if !p.is_finite() || p < 0.0 {
                    return Err(ConfigError::InvalidThreshold(format!("gate penalty must be >= 0, got {p}")));
                }
            }
        }
        self.pullback.validate()
    }
}

/// Store, timeframe and session settings for an engine instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base bars kept per instrument
    pub store_capacity: usize,
    /// Base bar period in minutes
    pub base_period_minutes: u32,
    /// Base bars kept per instrument by the timeframe builder
    pub mtf_max_base_bars: usize,
    /// IANA zone of the exchange, used to date wall-clock events
    pub timezone: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_capacity: DEFAULT_CAPACITY,
            base_period_minutes: 5,
            mtf_max_base_bars: DEFAULT_MAX_BASE_BARS,
            timezone: "Asia/Kolkata".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }
}

/// Engine settings plus the pipeline policy, as loaded from a JSON file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub engine: EngineConfig,
    pub pipeline: PipelineConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        assert!(PipelineConfig::breakout().validate(5).is_ok());
        assert!(PipelineConfig::pullback().validate(5).is_ok());
        assert_eq!(PipelineConfig::pullback().detector, DetectorKind::Pullback);
        assert_eq!(PipelineConfig::pullback().min_bars, 35);
    }

    #[test]
    fn test_unaligned_timeframe_rejected() {
        assert_eq!(
            PipelineConfig::default().validate(7),
            Err(ConfigError::UnalignedTimeframe { period: 15, base: 7 })
        );
        assert!(PipelineConfig::default().validate(0).is_err());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let config = PipelineConfig {
            prepare_threshold: 7.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(5), Err(ConfigError::InvalidThreshold(_))));
    }

    #[test]
    fn test_partial_json_override() {
        let json = r#"{"pipeline": {"execute_threshold": 7.0, "vwap_gate": {"penalty": 0.5}}}"#;
        let config: CoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.pipeline.execute_threshold, 7.0);
        assert_eq!(config.pipeline.vwap_gate, GateMode::Penalty(0.5));
        assert_eq!(config.pipeline.prepare_threshold, 3.5);
        assert_eq!(config.engine.base_period_minutes, 5);
    }

    #[test]
    fn test_timezone() {
        assert!(EngineConfig::default().tz().is_ok());
        let bad = EngineConfig {
            timezone: "Mars/Olympus".to_string(),
            ..Default::default()
        };
        assert!(bad.tz().is_err());
    }
}
