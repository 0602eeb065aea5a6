//! Price action timing: shallow pullbacks inside a trend and rejection wicks

use serde::{Deserialize, Serialize};

use super::indicators::{ema, round_to};
use crate::types::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PullbackKind {
    /// Dip below the recent high in an up trend
    Up,
    /// Bounce above the recent low in a down trend
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionKind {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rejection {
    pub kind: RejectionKind,
    /// 0.05 ..= 1.0
    pub score: f64,
}

impl Rejection {
    pub fn supports(&self, direction: Direction) -> bool {
        matches!(
            (self.kind, direction),
            (RejectionKind::Bullish, Direction::Long) | (RejectionKind::Bearish, Direction::Short)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pullback {
    pub kind: PullbackKind,
    /// Fraction of the swing price
    pub depth: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceActionContext {
    pub pullback: Option<Pullback>,
    pub rejection: Option<Rejection>,
    /// -1.0 ..= 1.0, positive supports a long
    pub score: f64,
    pub comment: String,
}

impl PriceActionContext {
    pub fn directional_score(&self, direction: Direction) -> f64 {
        self.score * direction.sign()
    }
}

/// Swing lookback for pullback depth
const PULLBACK_LOOKBACK: usize = 4;
const MAX_PULLBACK_DEPTH: f64 = 0.001;

/// Shallow pullback of the last close against the previous four closes.
///
/// `trend_up` is the EMA trend (`None` when unknown), in which case the depth
/// limit is tightened to 80%.
pub fn detect_pullback(closes: &[f64], trend_up: Option<bool>) -> Option<Pullback> {
    if closes.len() < PULLBACK_LOOKBACK + 1 {
        return None;
    }
    let last = closes[closes.len() - 1];
    let window = &closes[closes.len() - 1 - PULLBACK_LOOKBACK..closes.len() - 1];
    let high = window.iter().cloned().fold(f64::MIN, f64::max);
    let low = window.iter().cloned().fold(f64::MAX, f64::min);
    if high <= 0.0 || low <= 0.0 || !last.is_finite() {
        return None;
    }

    let up_depth = (high - last) / high;
    let down_depth = (last - low) / low;
    let shallow = |depth: f64, limit: f64| depth > 0.0 && depth <= limit;

    let up = Pullback {
        kind: PullbackKind::Up,
        depth: round_to(up_depth, 6),
    };
    let down = Pullback {
        kind: PullbackKind::Down,
        depth: round_to(down_depth, 6),
    };

    match trend_up {
        Some(true) => shallow(up_depth, MAX_PULLBACK_DEPTH).then_some(up),
        Some(false) => shallow(down_depth, MAX_PULLBACK_DEPTH).then_some(down),
        None => {
            let limit = MAX_PULLBACK_DEPTH * 0.8;
            if shallow(up_depth, limit) {
                Some(up)
            } else if shallow(down_depth, limit) {
                Some(down)
            } else {
                None
            }
        }
    }
}

/// Rejection wick on a single bar. A wick must outweigh the body by 1.5x and
/// cover more than 12% of the range; weak scores are dropped.
pub fn rejection(open: f64, high: f64, low: f64, close: f64) -> Option<Rejection> {
    if ![open, high, low, close].iter().all(|v| v.is_finite()) {
        return None;
    }
    let range = (high - low).max(1e-9);
    let body = (close - open).abs() / range;
    let upper = (high - open.max(close)).max(0.0) / range;
    let lower = (open.min(close) - low).max(0.0) / range;

    let (kind, rel) = if lower > body * 1.5 && lower > 0.12 {
        (RejectionKind::Bullish, lower)
    } else if upper > body * 1.5 && upper > 0.12 {
        (RejectionKind::Bearish, upper)
    } else {
        return None;
    };

    let score = ((rel - 0.12) / 0.6).min(1.0);
    if score < 0.05 {
        return None;
    }
    Some(Rejection {
        kind,
        score: round_to(score, 3),
    })
}

/// Combined pullback / rejection read of the latest bar with EMA(9)/EMA(21)
/// as the trend filter.
pub fn price_action_context(opens: &[f64], highs: &[f64], lows: &[f64], closes: &[f64]) -> PriceActionContext {
    let n = opens.len().min(highs.len()).min(lows.len()).min(closes.len());
    if n < 6 {
        return PriceActionContext {
            pullback: None,
            rejection: None,
            score: 0.0,
            comment: "insufficient data".to_string(),
        };
    }

    let trend_up = match (ema(closes, 9), ema(closes, 21)) {
        (Some(s), Some(l)) if s > l => Some(true),
        (Some(s), Some(l)) if s < l => Some(false),
        _ => None,
    };

    let pullback = detect_pullback(closes, trend_up);
    let rejection = rejection(opens[n - 1], highs[n - 1], lows[n - 1], closes[n - 1]);

    let mut score = 0.0;
    let mut notes = Vec::new();

    match pullback.map(|p| p.kind) {
        Some(PullbackKind::Up) => {
            score += 0.25;
            notes.push("pullback up".to_string());
        }
        Some(PullbackKind::Down) => {
            score -= 0.25;
            notes.push("pullback down".to_string());
        }
        None => {}
    }

    if let Some(r) = rejection {
        let signed = match r.kind {
            RejectionKind::Bullish => 0.4 * r.score,
            RejectionKind::Bearish => -0.4 * r.score,
        };
        score += signed;
        notes.push(format!("{:?} rejection {:.3}", r.kind, r.score).to_lowercase());
    }

    let rejection_kind = rejection.map(|r| r.kind);
    match trend_up {
        Some(true) => {
            if pullback.map(|p| p.kind) == Some(PullbackKind::Up) || rejection_kind == Some(RejectionKind::Bullish) {
                score += 0.15;
                notes.push("EMA aligned bullish".to_string());
            }
            if rejection_kind == Some(RejectionKind::Bearish) {
                score -= 0.2;
                notes.push("bearish rejection against EMA".to_string());
            }
        }
        Some(false) => {
            if pullback.map(|p| p.kind) == Some(PullbackKind::Down) || rejection_kind == Some(RejectionKind::Bearish) {
                score -= 0.15;
                notes.push("EMA aligned bearish".to_string());
            }
            if rejection_kind == Some(RejectionKind::Bullish) {
                score += 0.2;
                notes.push("bullish rejection against EMA".to_string());
            }
        }
        None => {}
    }

    PriceActionContext {
        pullback,
        rejection,
        score: round_to(score.clamp(-1.0, 1.0), 3),
        comment: if notes.is_empty() {
            "no price action".to_string()
        } else {
            notes.join(" | ")
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hammer_is_bullish_rejection() {
        // body 0.1, lower wick 0.8
        let r = rejection(10.8, 10.95, 10.0, 10.9).unwrap();
        assert_eq!(r.kind, RejectionKind::Bullish);
        assert!(r.score > 0.9);
        assert!(r.supports(Direction::Long));
        assert!(!r.supports(Direction::Short));
    }

    #[test]
    fn test_marubozu_has_no_rejection() {
        assert!(rejection(10.0, 11.0, 10.0, 11.0).is_none());
        assert!(rejection(10.0, 10.0, 10.0, 10.0).is_none());
    }

    #[test]
    fn test_shallow_pullback_in_uptrend() {
        let closes = [100.0, 100.2, 100.4, 100.6, 100.55];
        let pb = detect_pullback(&closes, Some(true)).unwrap();
        assert_eq!(pb.kind, PullbackKind::Up);
        assert!(pb.depth > 0.0 && pb.depth <= 0.001);

        // too deep
        let closes = [100.0, 100.2, 100.4, 100.6, 100.0];
        assert!(detect_pullback(&closes, Some(true)).is_none());
        // wrong trend
        assert!(detect_pullback(&[100.0, 100.2, 100.4, 100.6, 100.55], Some(false)).is_none());
    }

    #[test]
    fn test_context_scores_long_setup() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 0.1).chain([102.88]).collect();
        let opens: Vec<f64> = closes.iter().map(|c| c - 0.05).collect();
        let highs: Vec<f64> = closes.iter().map(|c| c + 0.1).collect();
        let mut lows: Vec<f64> = closes.iter().map(|c| c - 0.1).collect();
        let n = closes.len();
        lows[n - 1] = 102.3;

        let ctx = price_action_context(&opens, &highs, &lows, &closes);
        assert_eq!(ctx.pullback.map(|p| p.kind), Some(PullbackKind::Up));
        assert_eq!(ctx.rejection.map(|r| r.kind), Some(RejectionKind::Bullish));
        assert!(ctx.score > 0.5);
        assert!(ctx.directional_score(Direction::Short) < 0.0);
    }

    #[test]
    fn test_context_insufficient() {
        let ctx = price_action_context(&[1.0; 3], &[1.0; 3], &[1.0; 3], &[1.0; 3]);
        assert_eq!(ctx.score, 0.0);
        assert!(ctx.pullback.is_none());
    }
}
