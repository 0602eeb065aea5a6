//! Bar type shared by the store, the timeframe builder and the analyzers

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Wire format for bar timestamps (exchange-local, no offset)
pub const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One completed OHLCV sample for an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: String,
    /// Period start, exchange-local
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(
        instrument: &str,
        timestamp: NaiveDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            instrument: instrument.to_string(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Bar opened and closed at the same price: O=H=L=C
    pub fn from_tick(instrument: &str, timestamp: NaiveDateTime, price: f64, volume: f64) -> Self {
        Self::new(instrument, timestamp, price, price, price, price, volume)
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn upper_wick(&self) -> f64 {
        (self.high - self.open.max(self.close)).max(0.0)
    }

    pub fn lower_wick(&self) -> f64 {
        (self.open.min(self.close) - self.low).max(0.0)
    }

    /// Finite positive prices, consistent extremes and a non-negative volume
    pub fn is_well_formed(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return false;
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return false;
        }
        self.low <= self.open.min(self.close) && self.high >= self.open.max(self.close)
    }
}

/// Column view of consecutive bars (oldest first), taken under one lock so
/// all columns describe the same bars
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarSeries {
    pub timestamps: Vec<NaiveDateTime>,
    pub opens: Vec<f64>,
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
    pub closes: Vec<f64>,
    pub volumes: Vec<f64>,
}

impl BarSeries {
    pub fn from_bars<'a>(bars: impl IntoIterator<Item = &'a Bar>) -> Self {
        let mut series = Self::default();
        for bar in bars {
            series.timestamps.push(bar.timestamp);
            series.opens.push(bar.open);
            series.highs.push(bar.high);
            series.lows.push(bar.low);
            series.closes.push(bar.close);
            series.volumes.push(bar.volume);
        }
        series
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    /// Close `back` bars before the newest (`close_back(0)` is the last close)
    pub fn close_back(&self, back: usize) -> Option<f64> {
        self.closes.len().checked_sub(back + 1).map(|i| self.closes[i])
    }
}

/// Round a timestamp down to the start of its `period_minutes` bucket.
///
/// Buckets are aligned to the epoch, which for any period dividing a day
/// is the same as aligning to midnight.
pub fn floor_to_period(ts: NaiveDateTime, period_minutes: u32) -> NaiveDateTime {
    let period_secs = i64::from(period_minutes.max(1)) * 60;
    let secs = ts.and_utc().timestamp();
    let floored = secs - secs.rem_euclid(period_secs);
    DateTime::from_timestamp(floored, 0)
        .map(|dt| dt.naive_utc())
        .unwrap_or(ts)
}

/// Parse `YYYY-MM-DDTHH:MM:SS`, tolerating fractional seconds
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, ISO_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_to_period() {
        let ts = parse_timestamp("2025-01-02T09:17:42").unwrap();
        assert_eq!(floor_to_period(ts, 5), parse_timestamp("2025-01-02T09:15:00").unwrap());
        assert_eq!(floor_to_period(ts, 15), parse_timestamp("2025-01-02T09:15:00").unwrap());
        assert_eq!(floor_to_period(ts, 60), parse_timestamp("2025-01-02T09:00:00").unwrap());
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert!(parse_timestamp("2025-01-02T09:15:00").is_some());
        assert!(parse_timestamp("2025-01-02T09:15:00.250").is_some());
        assert!(parse_timestamp("02/01/2025 09:15").is_none());
    }

    #[test]
    fn test_well_formed() {
        let ts = parse_timestamp("2025-01-02T09:15:00").unwrap();
        assert!(Bar::new("X", ts, 10.0, 11.0, 9.5, 10.5, 100.0).is_well_formed());
        // high below close
        assert!(!Bar::new("X", ts, 10.0, 10.2, 9.5, 10.5, 100.0).is_well_formed());
        assert!(!Bar::new("X", ts, 10.0, 11.0, 9.5, f64::NAN, 100.0).is_well_formed());
        assert!(!Bar::new("X", ts, 10.0, 11.0, 9.5, 10.5, -1.0).is_well_formed());
    }

    #[test]
    fn test_series_columns() {
        let ts = parse_timestamp("2025-01-02T09:15:00").unwrap();
        let bars = vec![
            Bar::new("X", ts, 10.0, 11.0, 9.5, 10.5, 100.0),
            Bar::new("X", ts, 10.5, 11.5, 10.0, 11.0, 200.0),
        ];
        let series = BarSeries::from_bars(&bars);
        assert_eq!(series.len(), 2);
        assert_eq!(series.opens, vec![10.0, 10.5]);
        assert_eq!(series.close_back(0), Some(11.0));
        assert_eq!(series.close_back(1), Some(10.5));
        assert_eq!(series.close_back(2), None);
    }

    #[test]
    fn test_wicks() {
        let ts = parse_timestamp("2025-01-02T09:15:00").unwrap();
        let bar = Bar::new("X", ts, 10.0, 10.6, 9.0, 10.4, 1.0);
        assert!((bar.upper_wick() - 0.2).abs() < 1e-9);
        assert!((bar.lower_wick() - 1.0).abs() < 1e-9);
        assert!((bar.body() - 0.4).abs() < 1e-9);
        assert!(bar.is_bullish());
    }
}
