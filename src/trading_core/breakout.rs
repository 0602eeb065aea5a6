//! Range breakout detector
//!
//! Direction comes only from the last close leaving the range of the 20
//! completed closes before it. A breakout is CONFIRMED only with ATR
//! expansion or a volume spike behind it.

use serde::{Deserialize, Serialize};

use super::bars::BarSeries;
use super::indicators::{atr, round_to};
use super::signals::{reason, BreakoutComponents, Signal, SignalClass, SignalComponents, SignalDetector, SignalKind, SignalLevels};
use super::volatility::{atr_expansion, ATR_PERIOD};
use super::volume::volume_spike_confirmed;
use crate::types::{Bias, Direction};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakoutConfig {
    pub min_bars: usize,
    /// Completed closes forming the reference range (default: 20)
    pub range_lookback: usize,
    /// Recent/previous range ratio below which the base counts as compressed
    pub compression_ratio: f64,
    /// ATRs the last close-to-close move must cover
    pub atr_multiplier: f64,
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            min_bars: 25,
            range_lookback: 20,
            compression_ratio: 0.65,
            atr_multiplier: 1.0,
        }
    }
}

/// Recent range tighter than `ratio` x the range before it
pub fn detect_compression(closes: &[f64], lookback: usize, ratio: f64) -> bool {
    if lookback == 0 || closes.len() < lookback * 2 {
        return false;
    }
    let span = |w: &[f64]| {
        w.iter().cloned().fold(f64::MIN, f64::max) - w.iter().cloned().fold(f64::MAX, f64::min)
    };
    let n = closes.len();
    let recent = span(&closes[n - lookback..]);
    let previous = span(&closes[n - 2 * lookback..n - lookback]);
    previous > 0.0 && recent < previous * ratio
}

#[derive(Debug, Clone, Default)]
pub struct BreakoutDetector {
    pub config: BreakoutConfig,
}

impl BreakoutDetector {
    pub fn new(config: BreakoutConfig) -> Self {
        Self { config }
    }
}

impl SignalDetector for BreakoutDetector {
    fn kind(&self) -> SignalKind {
        SignalKind::Breakout
    }

    fn detect(&self, series: &BarSeries, mtf_direction: Bias) -> Option<Signal> {
        let closes = &series.closes;
        let lookback = self.config.range_lookback.max(1);
        if closes.len() < self.config.min_bars.max(lookback + 1) {
            return None;
        }

        let n = closes.len();
        let last = closes[n - 1];
        let base = &closes[n - 1 - lookback..n - 1];
        let high = base.iter().cloned().fold(f64::MIN, f64::max);
        let low = base.iter().cloned().fold(f64::MAX, f64::min);

        let direction = if last > high {
            Direction::Long
        } else if last < low {
            Direction::Short
        } else {
            return None;
        };
        if mtf_direction.direction() != Some(direction) {
            return None;
        }

        let mut components = BreakoutComponents::default();
        if detect_compression(closes, lookback, self.config.compression_ratio) {
            components.compression = 1.0;
        }

        let atr_value = atr(&series.highs, &series.lows, closes, ATR_PERIOD);
        let atr_ok = atr_expansion(last - closes[n - 2], atr_value, self.config.atr_multiplier);
        if atr_ok {
            components.atr_expansion = 1.5;
        }

        let volume_ok = volume_spike_confirmed(&series.volumes);
        if volume_ok {
            components.volume = 1.2;
        }

        let class = if atr_ok || volume_ok {
            SignalClass::Confirmed
        } else {
            SignalClass::Potential
        };

        Some(Signal {
            kind: SignalKind::Breakout,
            class,
            direction,
            score: round_to(components.total(), 2),
            components: SignalComponents::Breakout(components),
            levels: SignalLevels::Range { high, low },
            reason: reason(class, direction),
        })
    }
}
