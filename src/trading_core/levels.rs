//! Support / resistance from fractal swing points

use serde::{Deserialize, Serialize};

use crate::types::Direction;

/// Bars scanned for swing points
pub const LEVEL_LOOKBACK: usize = 60;
/// Bars each side a swing high/low must dominate
const PIVOT_WINDOW: usize = 2;
/// Levels closer than this fraction are merged
const MERGE_PCT: f64 = 0.0015;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LevelKind {
    Support,
    Resistance,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NearestLevel {
    pub price: f64,
    pub kind: LevelKind,
    /// |price - level| / price
    pub distance: f64,
}

impl NearestLevel {
    /// Support under a long, resistance over a short
    pub fn favours(&self, direction: Direction) -> bool {
        matches!(
            (self.kind, direction),
            (LevelKind::Support, Direction::Long) | (LevelKind::Resistance, Direction::Short)
        )
    }
}

fn is_pivot(values: &[f64], i: usize, higher: bool) -> bool {
    let v = values[i];
    let beats = |other: f64| if higher { v >= other } else { v <= other };
    let strictly = |other: f64| if higher { v > other } else { v < other };

    (i - PIVOT_WINDOW..i).all(|j| strictly(values[j])) && (i + 1..=i + PIVOT_WINDOW).all(|j| beats(values[j]))
}

/// Swing highs and swing lows of the last 60 bars, merged within 0.15% and
/// sorted ascending.
pub fn compute_levels(highs: &[f64], lows: &[f64]) -> Vec<f64> {
    let n = highs.len().min(lows.len());
    let highs = &highs[highs.len() - n..];
    let lows = &lows[lows.len() - n..];
    let start = n.saturating_sub(LEVEL_LOOKBACK);
    let (highs, lows) = (&highs[start..], &lows[start..]);

    let mut raw = Vec::new();
    if highs.len() > 2 * PIVOT_WINDOW {
        for i in PIVOT_WINDOW..highs.len() - PIVOT_WINDOW {
            if is_pivot(highs, i, true) {
                raw.push(highs[i]);
            }
            if is_pivot(lows, i, false) {
                raw.push(lows[i]);
            }
        }
    }
    raw.retain(|v| v.is_finite() && *v > 0.0);
    raw.sort_by(|a, b| a.total_cmp(b));

    let mut merged: Vec<(f64, usize)> = Vec::new();
    for level in raw {
        match merged.last_mut() {
            Some((sum, count)) if (level - *sum / *count as f64) / level <= MERGE_PCT => {
                *sum += level;
                *count += 1;
            }
            _ => merged.push((level, 1)),
        }
    }

    merged.into_iter().map(|(sum, count)| sum / count as f64).collect()
}

/// Closest level within `max_pct` of `price`
pub fn nearest_level(price: f64, levels: &[f64], max_pct: f64) -> Option<NearestLevel> {
    if !price.is_finite() || price <= 0.0 {
        return None;
    }

    levels
        .iter()
        .map(|&level| (level, (price - level).abs() / price))
        .filter(|(_, d)| *d <= max_pct)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(level, distance)| NearestLevel {
            price: level,
            kind: if level <= price {
                LevelKind::Support
            } else {
                LevelKind::Resistance
            },
            distance,
        })
}

/// Location quality for a trade: up to +1.5 next to a favourable level,
/// down to -0.75 next to an adverse one, fading to zero at `max_pct`.
pub fn location_score(nearest: Option<&NearestLevel>, direction: Direction, max_pct: f64) -> f64 {
    let Some(level) = nearest else {
        return 0.0;
    };
    if max_pct <= 0.0 {
        return 0.0;
    }
    let closeness = (1.0 - level.distance / max_pct).max(0.0);
    if level.favours(direction) {
        1.5 * closeness
    } else {
        -0.75 * closeness
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swing_points() {
        let highs = [10.0, 11.0, 12.0, 11.0, 10.5, 10.8, 11.2, 10.4, 10.1];
        let lows = [9.0, 10.0, 11.0, 10.0, 9.2, 9.8, 10.2, 9.5, 9.6];
        let levels = compute_levels(&highs, &lows);
        assert_eq!(levels, vec![9.2, 11.2, 12.0]);
    }

    #[test]
    fn test_close_levels_merge() {
        let highs = [10.0, 11.0, 100.0, 11.0, 10.0, 11.0, 100.1, 11.0, 10.0];
        let lows = [9.0; 9];
        let levels = compute_levels(&highs, &lows);
        assert_eq!(levels.len(), 1);
        assert!((levels[0] - 100.05).abs() < 1e-9);
    }

    #[test]
    fn test_nearest_level_roles() {
        let levels = [95.0, 99.5, 101.0];
        let nearest = nearest_level(100.0, &levels, 0.018).unwrap();
        assert_eq!(nearest.price, 99.5);
        assert_eq!(nearest.kind, LevelKind::Support);
        assert!(nearest.favours(Direction::Long));

        assert!(nearest_level(100.0, &[90.0], 0.018).is_none());
    }

    #[test]
    fn test_location_score_bounds() {
        let at_support = NearestLevel {
            price: 100.0,
            kind: LevelKind::Support,
            distance: 0.0,
        };
        assert_eq!(location_score(Some(&at_support), Direction::Long, 0.018), 1.5);
        assert_eq!(location_score(Some(&at_support), Direction::Short, 0.018), -0.75);
        assert_eq!(location_score(None, Direction::Long, 0.018), 0.0);
    }
}
