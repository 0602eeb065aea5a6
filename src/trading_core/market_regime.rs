//! Market Regime Detection
//!
//! Classifies the structural state of an instrument (fresh expansion,
//! established trend, exhaustion, compression or chop) from ADX and the
//! relation between the last two 10-bar ranges, and maps it to a trading mode.

use serde::{Deserialize, Serialize};

use super::indicators::{adx, atr};

/// Structural regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeState {
    /// Range expanding out of a quiet period with momentum building
    EarlyTrend,
    /// Established directional move
    Trending,
    /// Strong ADX but shrinking ranges and low volatility
    Exhaustion,
    /// Ranges contracting
    Compression,
    /// Low momentum, mixed structure
    Weak,
}

impl std::fmt::Display for RegimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegimeState::EarlyTrend => write!(f, "EARLY_TREND"),
            RegimeState::Trending => write!(f, "TRENDING"),
            RegimeState::Exhaustion => write!(f, "EXHAUSTION"),
            RegimeState::Compression => write!(f, "COMPRESSION"),
            RegimeState::Weak => write!(f, "WEAK"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingMode {
    TrendDay,
    RangeDay,
}

/// Configuration for regime detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// Bars required before anything but WEAK is reported (default: 25)
    pub min_bars: usize,
    /// ADX / ATR period (default: 14)
    pub period: usize,
    /// Bars per range window; the previous window is the same length (default: 10)
    pub range_window: usize,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            min_bars: 25,
            period: 14,
            range_window: 10,
        }
    }
}

/// Result of regime analysis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketRegime {
    pub state: RegimeState,
    pub mode: TradingMode,
    /// Confidence in the state, 0 ..= 10
    pub strength: f64,
    /// ATR / average recent close
    pub volatility: f64,
    pub adx: Option<f64>,
    pub comment: String,
}

impl MarketRegime {
    fn weak(comment: &str) -> Self {
        Self {
            state: RegimeState::Weak,
            mode: TradingMode::RangeDay,
            strength: 0.5,
            volatility: 0.0,
            adx: None,
            comment: comment.to_string(),
        }
    }

    /// Nudge strength by the broader index regime
    fn apply_index(&mut self, index: &MarketRegime) {
        if index.mode == TradingMode::TrendDay {
            self.strength = cap(self.strength + (index.strength * 0.15).min(1.2));
            self.comment.push_str(" | index trending");
        } else {
            self.strength = cap(self.strength - 0.7);
            self.comment.push_str(" | index not trending");
        }
    }
}

fn cap(x: f64) -> f64 {
    x.clamp(0.0, 10.0)
}

fn span(highs: &[f64], lows: &[f64]) -> f64 {
    let hi = highs.iter().cloned().fold(f64::MIN, f64::max);
    let lo = lows.iter().cloned().fold(f64::MAX, f64::min);
    hi - lo
}

/// Detect the regime of the latest bar, optionally adjusted by the regime of
/// a reference index.
pub fn detect_market_regime(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    index: Option<&MarketRegime>,
    config: &RegimeConfig,
) -> MarketRegime {
    let n = highs.len().min(lows.len()).min(closes.len());
    let window = config.range_window.max(1);
    if n < config.min_bars.max(2 * window) {
        return MarketRegime::weak("insufficient data");
    }
    let (highs, lows, closes) = (&highs[highs.len() - n..], &lows[lows.len() - n..], &closes[closes.len() - n..]);

    let (Some(adx_value), Some(atr_value)) = (
        adx(highs, lows, closes, config.period),
        atr(highs, lows, closes, config.period),
    ) else {
        return MarketRegime::weak("indicators unavailable");
    };
    if !adx_value.is_finite() || !atr_value.is_finite() {
        return MarketRegime::weak("indicators unavailable");
    }

    let avg_price = closes[n - window..].iter().sum::<f64>() / window as f64;
    let volatility = if avg_price > 0.0 { atr_value / avg_price } else { 0.0 };

    let recent_range = span(&highs[n - window..], &lows[n - window..]);
    let mut prev_range = span(&highs[n - 2 * window..n - window], &lows[n - 2 * window..n - window]);
    if prev_range <= 0.0 {
        prev_range = (recent_range * 0.8).max(1e-9);
    }

    let (state, strength, comment) = if adx_value >= 15.0 && recent_range > prev_range * 1.3 {
        (
            RegimeState::EarlyTrend,
            cap(4.5 + (adx_value - 15.0) * 0.2),
            "fresh expansion with momentum",
        )
    } else if adx_value > 28.0 && recent_range < prev_range * 0.85 && volatility < 0.008 {
        (
            RegimeState::Exhaustion,
            cap(3.5 + (adx_value - 28.0) * 0.1),
            "trend losing energy",
        )
    } else if adx_value >= 22.0 {
        (
            RegimeState::Trending,
            cap(6.5 + (adx_value - 22.0) * 0.15),
            "established directional trend",
        )
    } else if recent_range < prev_range * 0.7 {
        (
            RegimeState::Compression,
            cap(2.5 + (prev_range - recent_range) / prev_range),
            "volatility contraction",
        )
    } else {
        (RegimeState::Weak, cap(1.5 + adx_value / 30.0 * 1.2), "low momentum, mixed structure")
    };

    let mode = match state {
        RegimeState::EarlyTrend | RegimeState::Trending => TradingMode::TrendDay,
        _ => TradingMode::RangeDay,
    };

    let mut regime = MarketRegime {
        state,
        mode,
        strength,
        volatility,
        adx: Some(adx_value),
        comment: comment.to_string(),
    };
    if let Some(index) = index {
        regime.apply_index(index);
    }
    regime
}
