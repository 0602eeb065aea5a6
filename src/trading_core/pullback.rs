//! Pullback-to-level detector
//!
//! LONG when price sits near support under a bullish higher timeframe, SHORT
//! near resistance under a bearish one. The signal is graded by how well the
//! location, reaction, participation and momentum line up; an extended move
//! into the level is penalized rather than vetoed.

use serde::{Deserialize, Serialize};

use super::bars::BarSeries;
use super::indicators::{atr, round_to};
use super::levels::{compute_levels, nearest_level, LevelKind};
use super::price_action::rejection;
use super::signals::{reason, PullbackComponents, Signal, SignalClass, SignalComponents, SignalDetector, SignalKind, SignalLevels};
use super::volatility::{analyze_volatility, VolatilityState, ATR_PERIOD};
use super::volume::{analyze_volume, VolumeConfig};
use crate::error::ConfigError;
use crate::types::{Bias, Direction};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PullbackConfig {
    pub min_bars: usize,
    /// Furthest a level may be from price, as a fraction (default: 0.018)
    pub max_proximity: f64,
    pub confirmed_threshold: f64,
    pub potential_threshold: f64,
}

impl Default for PullbackConfig {
    fn default() -> Self {
        Self {
            min_bars: 35,
            max_proximity: 0.018,
            confirmed_threshold: 4.2,
            potential_threshold: 2.8,
        }
    }
}

impl PullbackConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_proximity > 0.0) {
            return Err(ConfigError::InvalidThreshold(format!(
                "pullback max_proximity must be positive, got {}",
                self.max_proximity
            )));
        }
        if self.potential_threshold > self.confirmed_threshold {
            return Err(ConfigError::InvalidThreshold(format!(
                "pullback potential threshold {} above confirmed threshold {}",
                self.potential_threshold, self.confirmed_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PullbackDetector {
    pub config: PullbackConfig,
}

impl PullbackDetector {
    pub fn new(config: PullbackConfig) -> Self {
        Self { config }
    }
}

impl SignalDetector for PullbackDetector {
    fn kind(&self) -> SignalKind {
        SignalKind::Pullback
    }

    fn detect(&self, series: &BarSeries, mtf_direction: Bias) -> Option<Signal> {
        let n = series.len();
        if n < self.config.min_bars.max(6) {
            return None;
        }
        let closes = &series.closes;
        let last = closes[n - 1];

        let levels = compute_levels(&series.highs, &series.lows);
        let nearest = nearest_level(last, &levels, self.config.max_proximity)?;

        let direction = match (nearest.kind, mtf_direction) {
            (LevelKind::Support, Bias::Bullish) => Direction::Long,
            (LevelKind::Resistance, Bias::Bearish) => Direction::Short,
            _ => return None,
        };
        let sign = direction.sign();

        let atr_value = atr(&series.highs, &series.lows, closes, ATR_PERIOD);
        let mut components = PullbackComponents {
            location: ((self.config.max_proximity - nearest.distance) * 60.0).clamp(0.0, 2.0),
            ..Default::default()
        };

        let reacted = rejection(series.opens[n - 1], series.highs[n - 1], series.lows[n - 1], last)
            .is_some_and(|r| r.supports(direction))
            || (last - closes[n - 3]) * sign > 0.0;
        if reacted {
            components.price_action = 2.0;
        } else if let Some(a) = atr_value {
            let hi = series.highs[n - 3..].iter().cloned().fold(f64::MIN, f64::max);
            let lo = series.lows[n - 3..].iter().cloned().fold(f64::MAX, f64::min);
            if hi - lo < 0.5 * a {
                components.price_action = 1.0;
            }
        }

        let volume = analyze_volume(&series.volumes, Some(closes), &VolumeConfig::default());
        if volume.score >= 0.6 {
            components.volume = 1.5;
        }

        let volatility = analyze_volatility(last - closes[n - 2], atr_value, &[]);
        components.volatility = match volatility.state {
            VolatilityState::Expanding => 1.2,
            VolatilityState::Building => 0.6,
            VolatilityState::Exhaustion => -1.0,
            _ => 0.0,
        };

        if (last - closes[n - 5]) * sign > 0.0 {
            components.momentum = 1.3;
        }

        if let Some(a) = atr_value {
            if (last - closes[n - 6]).abs() > a * 1.6 {
                components.extension = -1.5;
            }
        }

        let score = round_to(components.total(), 2);
        let class = if score >= self.config.confirmed_threshold {
            SignalClass::Confirmed
        } else if score >= self.config.potential_threshold {
            SignalClass::Potential
        } else {
            return None;
        };

        Some(Signal {
            kind: SignalKind::Pullback,
            class,
            direction,
            score,
            components: SignalComponents::Pullback(components),
            levels: SignalLevels::Level(nearest),
            reason: reason(class, direction),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rising staircase with a swing high at 106.5, a dip, then a retest of
    /// that high from above.
    fn retest(last_close: f64, last_open: f64, last_low: f64, last_volume: f64) -> BarSeries {
        let mut s = BarSeries::default();
        let mut push = |o: f64, h: f64, l: f64, c: f64, v: f64| {
            s.opens.push(o);
            s.highs.push(h);
            s.lows.push(l);
            s.closes.push(c);
            s.volumes.push(v);
        };
        for i in 0..30 {
            let c = 100.0 + i as f64 * 0.2;
            push(c - 0.1, c + 0.3, c - 0.3, c, 1000.0);
        }
        // swing high at 106.5 then a shallow dip
        push(105.9, 106.5, 105.8, 106.2, 1000.0);
        push(106.2, 106.3, 105.9, 106.0, 1000.0);
        push(106.0, 106.1, 105.7, 105.8, 1000.0);
        push(105.8, 106.0, 105.6, 105.9, 1000.0);
        push(105.9, 106.2, 105.8, 106.0, 1000.0);
        push(last_open, last_close.max(last_open) + 0.05, last_low, last_close, last_volume);
        s
    }

    #[test]
    fn test_support_under_bullish_bias_gives_long() {
        let s = retest(106.6, 106.55, 106.0, 1000.0);
        let signal = PullbackDetector::default().detect(&s, Bias::Bullish).unwrap();
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.kind, SignalKind::Pullback);
        let SignalComponents::Pullback(c) = signal.components else {
            panic!("wrong components");
        };
        assert_eq!(c.price_action, 2.0);
        assert_eq!(c.momentum, 1.3);
        assert!(c.location > 0.0);
    }

    #[test]
    fn test_rising_volume_adds_participation() {
        let quiet = PullbackDetector::default()
            .detect(&retest(106.6, 106.55, 106.0, 1000.0), Bias::Bullish)
            .unwrap();
        let loud = PullbackDetector::default()
            .detect(&retest(106.6, 106.55, 106.0, 1600.0), Bias::Bullish)
            .unwrap();
        assert!(loud.is_confirmed());
        assert!((loud.score - quiet.score - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_bias_must_match_level_side() {
        let s = retest(106.6, 106.55, 106.0, 1000.0);
        assert!(PullbackDetector::default().detect(&s, Bias::Bearish).is_none());
        assert!(PullbackDetector::default().detect(&s, Bias::Neutral).is_none());
    }

    #[test]
    fn test_classification_follows_thresholds() {
        let s = retest(106.6, 106.55, 106.0, 1000.0);
        let detector = PullbackDetector::default();
        let signal = detector.detect(&s, Bias::Bullish).unwrap();
        let confirmed = signal.score >= detector.config.confirmed_threshold;
        assert_eq!(signal.is_confirmed(), confirmed);

        let strict = PullbackDetector::new(PullbackConfig {
            confirmed_threshold: 50.0,
            potential_threshold: 40.0,
            ..Default::default()
        });
        assert!(strict.detect(&s, Bias::Bullish).is_none());
    }

    #[test]
    fn test_short_history_is_none() {
        let mut s = retest(106.6, 106.55, 106.0, 1000.0);
        for col in [&mut s.opens, &mut s.highs, &mut s.lows, &mut s.closes, &mut s.volumes] {
            col.drain(..10);
        }
        assert!(PullbackDetector::default().detect(&s, Bias::Bullish).is_none());
    }

    #[test]
    fn test_config_validation() {
        assert!(PullbackConfig::default().validate().is_ok());
        let bad = PullbackConfig {
            potential_threshold: 5.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
