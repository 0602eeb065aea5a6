//! Tradability from average traded volume

use serde::{Deserialize, Serialize};

use super::indicators::round_to;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiquidityLevel {
    High,
    Medium,
    Low,
    Illiquid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Stable,
    Unstable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidityConfig {
    /// Average volume floor for a LOW rating (default: 250_000)
    pub min_avg_volume: f64,
    pub lookback: usize,
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            min_avg_volume: 250_000.0,
            lookback: 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquidityContext {
    /// -2.0 ..= 2.0
    pub score: f64,
    pub level: LiquidityLevel,
    pub avg_volume: f64,
    pub consistency: Consistency,
    pub comment: String,
}

pub fn analyze_liquidity(volumes: &[f64], config: &LiquidityConfig) -> LiquidityContext {
    let lookback = config.lookback;
    if lookback == 0 || volumes.len() < lookback {
        return LiquidityContext {
            score: -2.0,
            level: LiquidityLevel::Illiquid,
            avg_volume: 0.0,
            consistency: Consistency::Unstable,
            comment: "insufficient volume history".to_string(),
        };
    }

    let recent = &volumes[volumes.len() - lookback..];
    let avg = recent
        .iter()
        .map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 })
        .sum::<f64>()
        / lookback as f64;

    let min = config.min_avg_volume;
    let (level, base): (LiquidityLevel, f64) = if avg >= min * 4.0 {
        (LiquidityLevel::High, 2.0)
    } else if avg >= min * 2.0 {
        (LiquidityLevel::Medium, 1.2)
    } else if avg >= min {
        (LiquidityLevel::Low, 0.5)
    } else {
        (LiquidityLevel::Illiquid, -1.5)
    };

    let non_zero = recent.iter().filter(|v| v.is_finite() && **v > 0.0).count();
    let ratio = non_zero as f64 / lookback as f64;

    let (consistency, score): (Consistency, f64) = if ratio < 0.8 {
        (Consistency::Unstable, base - 0.8)
    } else {
        (Consistency::Stable, base)
    };

    LiquidityContext {
        score: round_to(score.clamp(-2.0, 2.0), 2),
        level,
        avg_volume: avg.round(),
        consistency,
        comment: format!("{:?} average volume, {:?} participation", level, consistency).to_lowercase(),
    }
}
