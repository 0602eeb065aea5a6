//! Session VWAP with acceptance/pressure context
//!
//! The only analyzer that carries state between evaluations: running
//! price*volume and volume sums plus a short history of computed VWAPs for
//! the slope. One calculator per instrument, reset at session boundaries.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::indicators::round_to;
use crate::types::Direction;

/// Acceptance band around VWAP, in percent
const ACCEPTANCE_BAND_PCT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Acceptance {
    Above,
    Below,
    Near,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Pressure {
    Buying,
    Selling,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VwapContext {
    pub vwap: Option<f64>,
    /// (price - vwap) / vwap * 100
    pub distance_pct: f64,
    pub slope: f64,
    pub acceptance: Acceptance,
    pub pressure: Pressure,
    /// -1.2 ..= 1.5 from the long side
    pub score: f64,
    pub comment: String,
}

impl VwapContext {
    fn unavailable() -> Self {
        Self {
            vwap: None,
            distance_pct: 0.0,
            slope: 0.0,
            acceptance: Acceptance::Near,
            pressure: Pressure::Neutral,
            score: 0.0,
            comment: "VWAP not available".to_string(),
        }
    }

    /// Score from the perspective of a trade in `direction`.
    ///
    /// Shorts see the mirror image: selling pressure earns what buying pressure
    /// earns a long, and vice versa.
    pub fn directional_score(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Long => self.score,
            Direction::Short => match self.pressure {
                Pressure::Selling => 1.5,
                Pressure::Buying => -1.2,
                Pressure::Neutral => self.score,
            },
        }
    }

    /// Price is accepted on the side of VWAP that argues against `direction`
    pub fn opposes(&self, direction: Direction) -> bool {
        matches!(
            (direction, self.acceptance),
            (Direction::Long, Acceptance::Below) | (Direction::Short, Acceptance::Above)
        )
    }
}

#[derive(Debug, Clone)]
pub struct VwapCalculator {
    window: Option<usize>,
    slope_window: usize,
    pv_sum: f64,
    volume_sum: f64,
    /// (price * volume, volume) per update, only kept for windowed VWAP
    samples: VecDeque<(f64, f64)>,
    history: VecDeque<f64>,
}

impl Default for VwapCalculator {
    fn default() -> Self {
        Self::new(None, 3)
    }
}

impl VwapCalculator {
    /// `window` = `None` accumulates the whole session; `Some(n)` rolls over
    /// the last n updates.
    pub fn new(window: Option<usize>, slope_window: usize) -> Self {
        Self {
            window: window.filter(|w| *w > 0),
            slope_window: slope_window.max(2),
            pv_sum: 0.0,
            volume_sum: 0.0,
            samples: VecDeque::new(),
            history: VecDeque::new(),
        }
    }

    pub fn reset(&mut self) {
        self.pv_sum = 0.0;
        self.volume_sum = 0.0;
        self.samples.clear();
        self.history.clear();
    }

    /// Add one observation. Non-finite prices and non-positive volumes are
    /// rejected without touching any state.
    pub fn update(&mut self, price: f64, volume: f64) -> Option<f64> {
        if !price.is_finite() || price <= 0.0 || !volume.is_finite() || volume <= 0.0 {
            return None;
        }

        match self.window {
            Some(window) => {
                self.samples.push_back((price * volume, volume));
                while self.samples.len() > window {
                    self.samples.pop_front();
                }
                self.pv_sum = self.samples.iter().map(|(pv, _)| pv).sum();
                self.volume_sum = self.samples.iter().map(|(_, v)| v).sum();
            }
            None => {
                self.pv_sum += price * volume;
                self.volume_sum += volume;
            }
        }

        let vwap = self.vwap()?;
        self.history.push_back(vwap);
        while self.history.len() > self.slope_window {
            self.history.pop_front();
        }
        Some(vwap)
    }

    pub fn vwap(&self) -> Option<f64> {
        if self.volume_sum <= 0.0 {
            return None;
        }
        Some(self.pv_sum / self.volume_sum)
    }

    /// Newest minus oldest VWAP in the slope window
    pub fn slope(&self) -> f64 {
        match (self.history.front(), self.history.back()) {
            (Some(first), Some(last)) if self.history.len() >= 2 => last - first,
            _ => 0.0,
        }
    }

    pub fn context(&self, price: f64) -> VwapContext {
        let vwap = match self.vwap() {
            Some(v) if price.is_finite() && v > 0.0 => v,
            _ => return VwapContext::unavailable(),
        };

        let distance_pct = (price - vwap) / vwap * 100.0;
        let slope = self.slope();

        let acceptance = if distance_pct > ACCEPTANCE_BAND_PCT {
            Acceptance::Above
        } else if distance_pct < -ACCEPTANCE_BAND_PCT {
            Acceptance::Below
        } else {
            Acceptance::Near
        };

        let (pressure, score, comment) = match acceptance {
            Acceptance::Above if slope > 0.0 => (Pressure::Buying, 1.5, "accepted above rising VWAP"),
            Acceptance::Below if slope < 0.0 => (Pressure::Selling, -1.2, "accepted below falling VWAP"),
            Acceptance::Near => (Pressure::Neutral, 0.0, "near VWAP"),
            _ => (Pressure::Neutral, -0.3, "price and VWAP slope disagree"),
        };

        VwapContext {
            vwap: Some(round_to(vwap, 6)),
            distance_pct: round_to(distance_pct, 3),
            slope: round_to(slope, 6),
            acceptance,
            pressure,
            score,
            comment: comment.to_string(),
        }
    }
}
