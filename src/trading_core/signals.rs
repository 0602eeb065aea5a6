//! Structure signals shared by the detectors
//!
//! A detector moves through NONE -> POTENTIAL -> CONFIRMED; NONE is
//! represented by returning `None`.

use serde::{Deserialize, Serialize};

use super::bars::BarSeries;
use super::levels::NearestLevel;
use crate::types::{Bias, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    Breakout,
    Pullback,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Breakout => write!(f, "breakout"),
            SignalKind::Pullback => write!(f, "pullback"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalClass {
    Potential,
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BreakoutComponents {
    pub compression: f64,
    pub atr_expansion: f64,
    pub volume: f64,
}

impl BreakoutComponents {
    pub fn total(&self) -> f64 {
        self.compression + self.atr_expansion + self.volume
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PullbackComponents {
    pub location: f64,
    pub price_action: f64,
    pub volume: f64,
    pub volatility: f64,
    pub momentum: f64,
    /// Zero or negative: penalty for chasing an extended move
    pub extension: f64,
}

impl PullbackComponents {
    pub fn total(&self) -> f64 {
        self.location + self.price_action + self.volume + self.volatility + self.momentum + self.extension
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalComponents {
    Breakout(BreakoutComponents),
    Pullback(PullbackComponents),
}

/// Price structure the signal refers to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalLevels {
    /// Reference range that was broken
    Range { high: f64, low: f64 },
    /// Level the pullback is leaning on
    Level(NearestLevel),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub class: SignalClass,
    pub direction: Direction,
    pub score: f64,
    pub components: SignalComponents,
    pub levels: SignalLevels,
    pub reason: String,
}

impl Signal {
    pub fn is_confirmed(&self) -> bool {
        self.class == SignalClass::Confirmed
    }
}

/// Looks for one kind of structure in a bar series, gated by the
/// higher-timeframe direction
pub trait SignalDetector: Send + Sync {
    fn kind(&self) -> SignalKind;

    fn detect(&self, series: &BarSeries, mtf_direction: Bias) -> Option<Signal>;
}

pub(crate) fn reason(class: SignalClass, direction: Direction) -> String {
    let class = match class {
        SignalClass::Potential => "POTENTIAL",
        SignalClass::Confirmed => "CONFIRMED",
    };
    format!("{class}_{direction}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_totals() {
        let b = BreakoutComponents {
            compression: 1.0,
            atr_expansion: 1.5,
            volume: 0.0,
        };
        assert_eq!(b.total(), 2.5);

        let p = PullbackComponents {
            location: 1.0,
            price_action: 2.0,
            extension: -1.5,
            ..Default::default()
        };
        assert_eq!(p.total(), 1.5);
        assert_eq!(reason(SignalClass::Confirmed, Direction::Long), "CONFIRMED_LONG");
    }
}
