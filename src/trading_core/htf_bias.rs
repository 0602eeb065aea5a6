//! Higher-timeframe directional bias from EMA structure

use serde::{Deserialize, Serialize};

use super::indicators::{ema, round_to};
use crate::types::Bias;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BiasLabel {
    Strong,
    Weak,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HtfBiasConfig {
    pub short_period: usize,
    pub long_period: usize,
    /// Fractional distance from VWAP treated as "near" (default: 0.008)
    pub vwap_tolerance: f64,
}

impl Default for HtfBiasConfig {
    fn default() -> Self {
        Self {
            short_period: 14,
            long_period: 34,
            vwap_tolerance: 0.008,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HtfBias {
    pub direction: Bias,
    /// 0.8 ..= 10
    pub strength: f64,
    pub label: BiasLabel,
    /// Whether the EMA relation five bars ago agreed; `None` when too little data
    pub persistent: Option<bool>,
    pub comment: String,
}

impl HtfBias {
    fn neutral(strength: f64, comment: &str) -> Self {
        Self {
            direction: Bias::Neutral,
            strength,
            label: BiasLabel::Neutral,
            persistent: None,
            comment: comment.to_string(),
        }
    }
}

fn ema_diff(prices: &[f64], config: &HtfBiasConfig) -> Option<f64> {
    Some(ema(prices, config.short_period)? - ema(prices, config.long_period)?)
}

pub fn htf_bias(prices: &[f64], vwap: Option<f64>, config: &HtfBiasConfig) -> HtfBias {
    if prices.len() < config.long_period + 5 || prices.iter().any(|p| !p.is_finite()) {
        return HtfBias::neutral(0.8, "insufficient HTF data");
    }

    let Some(diff) = ema_diff(prices, config) else {
        return HtfBias::neutral(0.8, "EMA unavailable");
    };

    let price = prices[prices.len() - 1];
    let direction = if diff.abs() <= price.abs() * 1e-12 {
        return HtfBias::neutral(1.0, "flat EMA");
    } else if diff > 0.0 {
        Bias::Bullish
    } else {
        Bias::Bearish
    };
    let sign = if direction == Bias::Bullish { 1.0 } else { -1.0 };

    let recent = &prices[prices.len().saturating_sub(20)..];
    let hi = recent.iter().cloned().fold(f64::MIN, f64::max);
    let lo = recent.iter().cloned().fold(f64::MAX, f64::min);
    let range = hi - lo;

    let mut strength = if range > 0.0 {
        (diff.abs() / range * 10.0).min(6.0)
    } else {
        1.5
    };
    let mut notes = vec!["EMA alignment"];

    let persistent = if prices.len() >= config.long_period + 10 {
        ema_diff(&prices[..prices.len() - 5], config).map(|past| past * sign > 0.0)
    } else {
        None
    };
    if persistent == Some(true) {
        strength += 1.0;
        notes.push("trend holding");
    }

    if let Some(vwap) = vwap.filter(|v| v.is_finite() && *v > 0.0) {
        let dist = (price - vwap) / vwap * sign;
        if dist > config.vwap_tolerance {
            strength += 1.0;
            notes.push("VWAP side agrees");
        } else if dist < -config.vwap_tolerance {
            strength -= 1.0;
            notes.push("VWAP side disagrees");
        } else {
            notes.push("near VWAP");
        }
    }

    let strength = round_to(strength, 2).clamp(0.8, 10.0);
    let label = if strength >= 6.0 {
        BiasLabel::Strong
    } else {
        BiasLabel::Weak
    };

    HtfBias {
        direction,
        strength,
        label,
        persistent,
        comment: notes.join(" | "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rising(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64 * 0.5).collect()
    }

    #[test]
    fn test_insufficient_is_neutral() {
        let bias = htf_bias(&rising(30), None, &HtfBiasConfig::default());
        assert_eq!(bias.direction, Bias::Neutral);
        assert_eq!(bias.strength, 0.8);
        assert_eq!(bias.persistent, None);
    }

    #[test]
    fn test_flat_is_neutral() {
        let bias = htf_bias(&vec![100.0; 50], None, &HtfBiasConfig::default());
        assert_eq!(bias.direction, Bias::Neutral);
        assert_eq!(bias.strength, 1.0);
    }

    #[test]
    fn test_rising_is_bullish_and_persistent() {
        let prices = rising(60);
        let bias = htf_bias(&prices, None, &HtfBiasConfig::default());
        assert_eq!(bias.direction, Bias::Bullish);
        assert_eq!(bias.persistent, Some(true));
        assert!(bias.strength >= 0.8 && bias.strength <= 10.0);
    }

    #[test]
    fn test_persistence_needs_history() {
        // 40 values: enough for a bias, not for the five-bar lookback
        let bias = htf_bias(&rising(40), None, &HtfBiasConfig::default());
        assert_eq!(bias.direction, Bias::Bullish);
        assert_eq!(bias.persistent, None);
    }

    #[test]
    fn test_vwap_side_adjusts_strength() {
        let prices = rising(60);
        let config = HtfBiasConfig::default();
        let base = htf_bias(&prices, None, &config).strength;
        let above = htf_bias(&prices, Some(100.0), &config).strength;
        let below = htf_bias(&prices, Some(200.0), &config).strength;
        assert!(above > base);
        assert!(below < base);
    }

    #[test]
    fn test_falling_is_bearish() {
        let prices: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        let bias = htf_bias(&prices, None, &HtfBiasConfig::default());
        assert_eq!(bias.direction, Bias::Bearish);
    }
}
