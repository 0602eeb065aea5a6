//! Multi-timeframe candle builder
//!
//! Derives higher-period candles (15m, 30m, ...) by folding blocks of base
//! bars the builder already holds. No extra data access: the builder keeps
//! its own bounded base buffer per instrument so aggregation cadence is
//! independent of the bar store.

use chrono::{Duration, NaiveDateTime};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

use super::bars::{floor_to_period, Bar};
use super::indicators::round_to;
use crate::error::ConfigError;
use crate::types::Bias;

/// Default base bars kept per instrument (100 hours of 5m bars)
pub const DEFAULT_MAX_BASE_BARS: usize = 1200;

/// Higher-timeframe candle folded from `bar_count` consecutive buffered base bars
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateCandle {
    pub period_start: NaiveDateTime,
    /// Exclusive: last base bar start + base period
    pub period_end: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub bar_count: usize,
}

impl AggregateCandle {
    /// Fold oldest-first base bars. `None` for an empty block.
    pub fn fold(bars: &[Bar], base_period_minutes: u32) -> Option<Self> {
        let first = bars.first()?;
        let last = bars.last()?;

        Some(Self {
            period_start: first.timestamp,
            period_end: last.timestamp + Duration::minutes(i64::from(base_period_minutes)),
            open: first.open,
            high: bars.iter().map(|b| b.high).fold(f64::MIN, f64::max),
            low: bars.iter().map(|b| b.low).fold(f64::MAX, f64::min),
            close: last.close,
            volume: bars.iter().map(|b| b.volume).sum(),
            bar_count: bars.len(),
        })
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

pub struct MtfBuilder {
    base_period_minutes: u32,
    max_base_bars: usize,
    buffers: RwLock<HashMap<String, Arc<Mutex<VecDeque<Bar>>>>>,
}

impl MtfBuilder {
    pub fn new(base_period_minutes: u32, max_base_bars: usize) -> Result<Self, ConfigError> {
        if base_period_minutes == 0 {
            return Err(ConfigError::InvalidBasePeriod(base_period_minutes));
        }
        if max_base_bars == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        Ok(Self {
            base_period_minutes,
            max_base_bars,
            buffers: RwLock::new(HashMap::new()),
        })
    }

    pub fn base_period_minutes(&self) -> u32 {
        self.base_period_minutes
    }

    /// Base bars per `period_minutes` candle; `None` unless a positive multiple
    pub fn bars_per_period(&self, period_minutes: u32) -> Option<usize> {
        if period_minutes == 0 || period_minutes % self.base_period_minutes != 0 {
            return None;
        }
        Some((period_minutes / self.base_period_minutes) as usize)
    }

    /// Append a base bar (timestamp floored to the base period).
    ///
    /// Returns false when the bar is not newer than the buffer's last bar, so
    /// feeding the same bar twice leaves the buffer unchanged.
    pub fn update(&self, bar: &Bar) -> bool {
        let mut normalized = bar.clone();
        normalized.timestamp = floor_to_period(bar.timestamp, self.base_period_minutes);

        let existing = self.buffers.read().get(&bar.instrument).cloned();
        let buffer = match existing {
            Some(buf) => buf,
            None => self
                .buffers
                .write()
                .entry(bar.instrument.clone())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::with_capacity(self.max_base_bars))))
                .clone(),
        };

        let mut bars = buffer.lock();
        if let Some(last) = bars.back() {
            if normalized.timestamp <= last.timestamp {
                debug!("MTF buffer for {} already has {}", bar.instrument, normalized.timestamp);
                return false;
            }
        }
        bars.push_back(normalized);
        while bars.len() > self.max_base_bars {
            bars.pop_front();
        }
        true
    }

    fn snapshot(&self, instrument: &str) -> Vec<Bar> {
        let Some(buffer) = self.buffers.read().get(instrument).cloned() else {
            return Vec::new();
        };
        let bars = buffer.lock();
        bars.iter().cloned().collect()
    }

    pub fn len(&self, instrument: &str) -> usize {
        self.buffers
            .read()
            .get(instrument)
            .map(|b| b.lock().len())
            .unwrap_or(0)
    }

    /// Candle folded from the most recent `period / base` bars.
    ///
    /// Blocks count buffered bars, not clock periods: a block can span a
    /// session gap or missing bars.
    pub fn latest_aggregate(&self, instrument: &str, period_minutes: u32) -> Option<AggregateCandle> {
        let k = self.bars_per_period(period_minutes)?;
        let bars = self.snapshot(instrument);
        if bars.len() < k {
            return None;
        }
        AggregateCandle::fold(&bars[bars.len() - k..], self.base_period_minutes)
    }

    /// Up to `lookback` consecutive, non-overlapping candles aligned to the
    /// newest bar, oldest first. Blocks reaching past the buffer start are
    /// omitted rather than folded partially.
    pub fn aggregate_history(
        &self,
        instrument: &str,
        period_minutes: u32,
        lookback: usize,
    ) -> Vec<AggregateCandle> {
        let Some(k) = self.bars_per_period(period_minutes) else {
            return Vec::new();
        };
        let bars = self.snapshot(instrument);
        let total = bars.len();

        (1..=lookback)
            .rev()
            .filter_map(|i| {
                let end = total.checked_sub((i - 1) * k)?;
                let start = end.checked_sub(k)?;
                AggregateCandle::fold(&bars[start..end], self.base_period_minutes)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MtfConfidence {
    High,
    Medium,
    Low,
}

/// Directional read of the fast/slow higher timeframes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MtfContext {
    pub direction: Bias,
    /// 0.0 ..= 2.0
    pub strength: f64,
    pub confidence: MtfConfidence,
    /// Fast and slow candles point opposite ways
    pub conflict: bool,
    pub comment: String,
}

/// Signed persistence of the last three candles: +/-0.6 when all share a
/// colour, +/-0.3 for two of three, in that colour's direction.
fn persistence(history: &[AggregateCandle]) -> f64 {
    if history.len() < 2 {
        return 0.0;
    }
    let last = &history[history.len().saturating_sub(3)..];
    let bull = last.iter().filter(|c| c.is_bullish()).count();
    let bear = last.iter().filter(|c| c.is_bearish()).count();

    match (bull, bear) {
        (3, _) => 0.6,
        (_, 3) => -0.6,
        (b, _) if b >= 2 => 0.3,
        (_, b) if b >= 2 => -0.3,
        _ => 0.0,
    }
}

fn vote(candle: Option<&AggregateCandle>, weight: f64) -> f64 {
    match candle {
        Some(c) if c.is_bullish() => weight,
        Some(c) if c.is_bearish() => -weight,
        _ => 0.0,
    }
}

pub fn analyze_mtf(
    fast: Option<&AggregateCandle>,
    slow: Option<&AggregateCandle>,
    fast_history: &[AggregateCandle],
    slow_history: &[AggregateCandle],
) -> MtfContext {
    let fast_vote = vote(fast, 0.8);
    let slow_vote = vote(slow, 1.4);
    let mut score = fast_vote + slow_vote;
    let mut notes = Vec::new();

    if fast_vote != 0.0 {
        notes.push(format!("fast {}", if fast_vote > 0.0 { "bullish" } else { "bearish" }));
    }
    if slow_vote != 0.0 {
        notes.push(format!("slow {}", if slow_vote > 0.0 { "bullish" } else { "bearish" }));
    }

    let conflict = fast_vote * slow_vote < 0.0;
    if conflict {
        score *= 0.7;
        notes.push("fast/slow conflict".to_string());
    }

    for (label, history) in [("fast", fast_history), ("slow", slow_history)] {
        let p = persistence(history);
        if p != 0.0 {
            score += p;
            notes.push(format!("{label} persistence {p:+}"));
        }
    }

    let direction = if score.abs() < 0.4 {
        Bias::Neutral
    } else if score > 0.0 {
        Bias::Bullish
    } else {
        Bias::Bearish
    };

    let strength = round_to(score.abs().min(2.0), 2);
    let confidence = if strength >= 1.1 && !conflict {
        MtfConfidence::High
    } else if strength >= 0.6 {
        MtfConfidence::Medium
    } else {
        MtfConfidence::Low
    };

    MtfContext {
        direction,
        strength,
        confidence,
        conflict,
        comment: if notes.is_empty() {
            "no higher timeframe structure".to_string()
        } else {
            notes.join(" | ")
        },
    }
}
