//! Volatility regime of the latest bar relative to ATR

use serde::{Deserialize, Serialize};

use super::indicators::{atr, round_to};

pub const ATR_PERIOD: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityState {
    Contracting,
    Building,
    Expanding,
    Exhaustion,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolatilityContext {
    pub state: VolatilityState,
    /// -1.0 ..= 1.5
    pub score: f64,
    pub atr: f64,
    /// |move| / ATR
    pub move_atr_ratio: f64,
    pub comment: String,
}

/// Classify `current_move` against the ATR.
///
/// `atr_history` is oldest first; with at least 5 values, an ATR higher than
/// two readings ago adds a small bonus to expansion.
pub fn analyze_volatility(current_move: f64, atr_value: Option<f64>, atr_history: &[f64]) -> VolatilityContext {
    let atr_value = match atr_value {
        Some(a) if a.is_finite() && a > 0.0 && current_move.is_finite() => a,
        _ => {
            return VolatilityContext {
                state: VolatilityState::Unknown,
                score: 0.0,
                atr: 0.0,
                move_atr_ratio: 0.0,
                comment: "ATR unavailable".to_string(),
            }
        }
    };

    let ratio = current_move.abs() / atr_value;

    let (state, score, comment) = if ratio < 0.75 {
        (VolatilityState::Contracting, -0.6, "too quiet".to_string())
    } else if ratio < 1.2 {
        (VolatilityState::Building, 0.2, "volatility building".to_string())
    } else if ratio < 1.6 {
        let n = atr_history.len();
        if n >= 5 && atr_history[n - 1] > atr_history[n - 3] {
            (VolatilityState::Expanding, 1.3, "healthy expansion, ATR rising".to_string())
        } else {
            (VolatilityState::Expanding, 1.1, "healthy expansion".to_string())
        }
    } else {
        (VolatilityState::Exhaustion, -1.0, "spike, exhaustion risk".to_string())
    };

    VolatilityContext {
        state,
        score,
        atr: round_to(atr_value, 6),
        move_atr_ratio: round_to(ratio, 2),
        comment,
    }
}

/// ATR(14) evaluated at each of the last `count` bar ends, oldest first
pub fn atr_history(highs: &[f64], lows: &[f64], closes: &[f64], count: usize) -> Vec<f64> {
    let n = highs.len().min(lows.len()).min(closes.len());
    (0..count)
        .rev()
        .filter_map(|back| {
            let end = n.checked_sub(back)?;
            atr(&highs[..end], &lows[..end], &closes[..end], ATR_PERIOD)
        })
        .collect()
}

/// Volatility context for the last close-to-close move of a bar series
pub fn analyze_bar_volatility(highs: &[f64], lows: &[f64], closes: &[f64]) -> VolatilityContext {
    let current_move = match closes {
        [.., prev, last] => last - prev,
        _ => 0.0,
    };
    analyze_volatility(
        current_move,
        atr(highs, lows, closes, ATR_PERIOD),
        &atr_history(highs, lows, closes, 5),
    )
}

/// Strict expansion check: |move| at least `multiplier` ATRs
pub fn atr_expansion(current_move: f64, atr_value: Option<f64>, multiplier: f64) -> bool {
    match atr_value {
        Some(a) if a > 0.0 => current_move.abs() >= a * multiplier,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bands() {
        assert_eq!(analyze_volatility(0.5, Some(1.0), &[]).state, VolatilityState::Contracting);
        assert_eq!(analyze_volatility(-1.0, Some(1.0), &[]).state, VolatilityState::Building);

        let expanding = analyze_volatility(1.4, Some(1.0), &[]);
        assert_eq!(expanding.state, VolatilityState::Expanding);
        assert_eq!(expanding.score, 1.1);

        let exhausted = analyze_volatility(2.0, Some(1.0), &[]);
        assert_eq!(exhausted.state, VolatilityState::Exhaustion);
        assert_eq!(exhausted.score, -1.0);
    }

    #[test]
    fn test_rising_atr_bonus() {
        let ctx = analyze_volatility(1.4, Some(1.0), &[0.8, 0.85, 0.9, 0.95, 1.0]);
        assert_eq!(ctx.score, 1.3);
    }

    #[test]
    fn test_unknown_without_atr() {
        let ctx = analyze_volatility(1.0, None, &[]);
        assert_eq!(ctx.state, VolatilityState::Unknown);
        assert_eq!(ctx.score, 0.0);
        assert_eq!(analyze_volatility(1.0, Some(0.0), &[]).state, VolatilityState::Unknown);
        assert_eq!(analyze_volatility(f64::NAN, Some(1.0), &[]).state, VolatilityState::Unknown);
    }

    #[test]
    fn test_bar_series() {
        let highs = vec![101.0; 20];
        let lows = vec![99.0; 20];
        let mut closes = vec![100.0; 20];
        closes[19] = 100.5;
        // ATR 2.0, move 0.5
        let ctx = analyze_bar_volatility(&highs, &lows, &closes);
        assert_eq!(ctx.state, VolatilityState::Contracting);
        assert_eq!(atr_history(&highs, &lows, &closes, 5).len(), 5);
        assert!(atr_expansion(2.5, Some(2.0), 1.0));
        assert!(!atr_expansion(2.5, None, 1.0));
    }
}
