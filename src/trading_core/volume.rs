//! Volume participation context

use serde::{Deserialize, Serialize};

use super::indicators::round_to;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeStrength {
    Strong,
    Moderate,
    Weak,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeTrend {
    Rising,
    Falling,
    Flat,
}

/// Configuration for volume analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Bars averaged for the relative volume baseline (default: 12)
    pub lookback: usize,
    /// Bars inspected for a strictly rising/falling trend (default: 3)
    pub rising_bars: usize,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            lookback: 12,
            rising_bars: 3,
        }
    }
}

impl VolumeConfig {
    /// Longer window used for breakout spike confirmation
    pub fn spike() -> Self {
        Self {
            lookback: 20,
            rising_bars: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeContext {
    /// -2.0 ..= 2.0
    pub score: f64,
    pub strength: VolumeStrength,
    pub trend: VolumeTrend,
    pub relative_volume: f64,
    pub comment: String,
}

impl VolumeContext {
    fn insufficient() -> Self {
        Self {
            score: 0.0,
            strength: VolumeStrength::None,
            trend: VolumeTrend::Flat,
            relative_volume: 0.0,
            comment: "insufficient volume data".to_string(),
        }
    }
}

/// Score the newest bar's volume against the recent average.
///
/// `closes`, when given, lets heavy volume with no price progress count as
/// absorption rather than confirmation.
pub fn analyze_volume(volumes: &[f64], closes: Option<&[f64]>, config: &VolumeConfig) -> VolumeContext {
    let rising = config.rising_bars.max(2);
    if config.lookback == 0 || volumes.len() < config.lookback + rising {
        return VolumeContext::insufficient();
    }
    if volumes.iter().any(|v| !v.is_finite()) {
        return VolumeContext::insufficient();
    }

    let recent = &volumes[volumes.len() - config.lookback..];
    let avg = recent.iter().sum::<f64>() / config.lookback as f64;
    let current = volumes[volumes.len() - 1];
    let rel = if avg > 0.0 { current / avg } else { 1.0 };

    let (strength, mut score): (VolumeStrength, f64) = if rel >= 1.6 {
        (VolumeStrength::Strong, 2.0)
    } else if rel >= 1.4 {
        (VolumeStrength::Moderate, 1.2)
    } else if rel >= 0.95 {
        (VolumeStrength::Weak, 0.4)
    } else {
        (VolumeStrength::None, -0.5)
    };

    let tail = &volumes[volumes.len() - rising..];
    let trend = if tail.windows(2).all(|w| w[1] > w[0]) {
        score += 0.5;
        VolumeTrend::Rising
    } else if tail.windows(2).all(|w| w[1] < w[0]) {
        score -= 0.5;
        VolumeTrend::Falling
    } else {
        VolumeTrend::Flat
    };

    let comment = match closes {
        Some(c) if c.len() >= rising && c[c.len() - 1].is_finite() => {
            let last = c[c.len() - 1];
            let moved = last - c[c.len() - rising];
            if moved.abs() < 0.002 * last.abs() {
                if matches!(strength, VolumeStrength::Strong | VolumeStrength::Moderate) {
                    score -= 0.7;
                    "absorption suspected"
                } else {
                    "volume without price progress"
                }
            } else {
                "volume supports price move"
            }
        }
        _ => "volume only",
    };

    VolumeContext {
        score: round_to(score.clamp(-2.0, 2.0), 2),
        strength,
        trend,
        relative_volume: round_to(rel, 2),
        comment: comment.to_string(),
    }
}

/// True when the spike-window volume score clears 0.5
pub fn volume_spike_confirmed(volumes: &[f64]) -> bool {
    analyze_volume(volumes, None, &VolumeConfig::spike()).score > 0.5
}
