//! Bounded per-instrument history of completed bars
//!
//! One mutex per instrument guards its series; the instrument map itself is
//! only write-locked on first touch. Close callbacks run after the series
//! lock is released, so a callback may query the store again.

use chrono::{Duration, NaiveDateTime};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::bars::{floor_to_period, Bar, BarSeries};
use crate::error::ConfigError;

/// Default number of base bars kept per instrument
pub const DEFAULT_CAPACITY: usize = 400;

/// Invoked with `(instrument, bar)` after a bar is stored
pub type BarCloseCallback = Arc<dyn Fn(&str, &Bar) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`BarStore::register_on_bar_close`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type Series = Arc<Mutex<VecDeque<Bar>>>;

#[derive(Debug, Default)]
struct AlertBook {
    last_alert: HashMap<String, NaiveDateTime>,
    paused_until: HashMap<String, NaiveDateTime>,
}

/// Snapshot of store activity
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHealth {
    pub instruments_tracked: usize,
    /// Ticks folded into bars
    pub bars_received: u64,
    /// Completed bars stored
    pub bars_closed: u64,
    /// Age of the oldest "last bar" across instruments, in seconds
    pub stalest_bar_age_secs: Option<i64>,
}

pub struct BarStore {
    capacity: usize,
    base_period_minutes: u32,
    series: RwLock<HashMap<String, Series>>,
    callbacks: RwLock<Vec<(CallbackId, BarCloseCallback)>>,
    next_callback_id: AtomicU64,
    alerts: Mutex<AlertBook>,
    bars_received: AtomicU64,
    bars_closed: AtomicU64,
}

impl BarStore {
    pub fn new(capacity: usize, base_period_minutes: u32) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if base_period_minutes == 0 {
            return Err(ConfigError::InvalidBasePeriod(base_period_minutes));
        }

        Ok(Self {
            capacity,
            base_period_minutes,
            series: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(Vec::new()),
            next_callback_id: AtomicU64::new(0),
            alerts: Mutex::new(AlertBook::default()),
            bars_received: AtomicU64::new(0),
            bars_closed: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn base_period_minutes(&self) -> u32 {
        self.base_period_minutes
    }

    fn series_for(&self, instrument: &str) -> Series {
        if let Some(series) = self.series.read().get(instrument) {
            return series.clone();
        }
        let mut map = self.series.write();
        map.entry(instrument.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::with_capacity(self.capacity))))
            .clone()
    }

    fn existing(&self, instrument: &str) -> Option<Series> {
        self.series.read().get(instrument).cloned()
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Store a completed bar and notify close callbacks.
    ///
    /// Returns false (and notifies nobody) for malformed bars and for bars
    /// that are not newer than the instrument's last stored bar.
    pub fn append_completed_bar(&self, bar: Bar) -> bool {
        if !bar.is_well_formed() {
            warn!("Rejected malformed bar for {} at {}", bar.instrument, bar.timestamp);
            return false;
        }

        let series = self.series_for(&bar.instrument);
        {
            let mut bars = series.lock();
            if let Some(last) = bars.back() {
                if bar.timestamp <= last.timestamp {
                    debug!(
                        "Ignoring stale bar for {}: {} <= {}",
                        bar.instrument, bar.timestamp, last.timestamp
                    );
                    return false;
                }
            }
            bars.push_back(bar.clone());
            while bars.len() > self.capacity {
                bars.pop_front();
            }
        }

        self.bars_closed.fetch_add(1, Ordering::Relaxed);
        self.dispatch_close(&bar);
        true
    }

    /// Fold a raw tick into the open bar of its base-period bucket.
    ///
    /// Returns the bar this tick closed, if it opened a new bucket. Ticks for
    /// buckets older than the open bar are dropped.
    pub fn append_tick(
        &self,
        instrument: &str,
        timestamp: NaiveDateTime,
        price: f64,
        volume: f64,
    ) -> Option<Bar> {
        if !price.is_finite() || price <= 0.0 || !volume.is_finite() || volume < 0.0 {
            warn!("Rejected malformed tick for {}: price={} volume={}", instrument, price, volume);
            return None;
        }

        let bucket = floor_to_period(timestamp, self.base_period_minutes);
        let series = self.series_for(instrument);

        let closed = {
            let mut bars = series.lock();
            self.bars_received.fetch_add(1, Ordering::Relaxed);

            match bars.back().map(|b| b.timestamp) {
                Some(open_ts) if open_ts == bucket => {
                    if let Some(open) = bars.back_mut() {
                        open.high = open.high.max(price);
                        open.low = open.low.min(price);
                        open.close = price;
                        open.volume += volume;
                    }
                    None
                }
                Some(open_ts) if open_ts > bucket => {
                    debug!("Dropping late tick for {} ({} < {})", instrument, bucket, open_ts);
                    None
                }
                _ => {
                    let closed = bars.back().cloned();
                    bars.push_back(Bar::from_tick(instrument, bucket, price, volume));
                    while bars.len() > self.capacity {
                        bars.pop_front();
                    }
                    closed
                }
            }
        };

        if let Some(bar) = &closed {
            self.bars_closed.fetch_add(1, Ordering::Relaxed);
            self.dispatch_close(bar);
        }
        closed
    }

    fn dispatch_close(&self, bar: &Bar) {
        let callbacks: Vec<BarCloseCallback> =
            self.callbacks.read().iter().map(|(_, cb)| cb.clone()).collect();

        for cb in callbacks {
            match catch_unwind(AssertUnwindSafe(|| cb(&bar.instrument, bar))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Bar close callback failed for {}: {}", bar.instrument, e),
                Err(_) => warn!("Bar close callback panicked for {}", bar.instrument),
            }
        }
    }

    // ------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------

    pub fn register_on_bar_close<F>(&self, cb: F) -> CallbackId
    where
        F: Fn(&str, &Bar) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = CallbackId(self.next_callback_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().push((id, Arc::new(cb)));
        id
    }

    pub fn unregister_on_bar_close(&self, id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(cb_id, _)| *cb_id != id);
        callbacks.len() != before
    }

    // ------------------------------------------------------------------
    // Accessors (all return copies)
    // ------------------------------------------------------------------

    pub fn last_n_bars(&self, instrument: &str, n: usize) -> Vec<Bar> {
        let Some(series) = self.existing(instrument) else {
            return Vec::new();
        };
        let bars = series.lock();
        let skip = bars.len().saturating_sub(n);
        bars.iter().skip(skip).cloned().collect()
    }

    /// Column snapshot of the last `n` bars
    pub fn series(&self, instrument: &str, n: usize) -> BarSeries {
        let Some(series) = self.existing(instrument) else {
            return BarSeries::default();
        };
        let bars = series.lock();
        let skip = bars.len().saturating_sub(n);
        BarSeries::from_bars(bars.iter().skip(skip))
    }

    fn last_n_field(&self, instrument: &str, n: usize, field: impl Fn(&Bar) -> f64) -> Vec<f64> {
        let Some(series) = self.existing(instrument) else {
            return Vec::new();
        };
        let bars = series.lock();
        let skip = bars.len().saturating_sub(n);
        bars.iter().skip(skip).map(field).collect()
    }

    pub fn last_bar(&self, instrument: &str) -> Option<Bar> {
        self.existing(instrument)?.lock().back().cloned()
    }

    pub fn opens(&self, instrument: &str, n: usize) -> Vec<f64> {
        self.last_n_field(instrument, n, |b| b.open)
    }

    pub fn highs(&self, instrument: &str, n: usize) -> Vec<f64> {
        self.last_n_field(instrument, n, |b| b.high)
    }

    pub fn lows(&self, instrument: &str, n: usize) -> Vec<f64> {
        self.last_n_field(instrument, n, |b| b.low)
    }

    pub fn closes(&self, instrument: &str, n: usize) -> Vec<f64> {
        self.last_n_field(instrument, n, |b| b.close)
    }

    pub fn volumes(&self, instrument: &str, n: usize) -> Vec<f64> {
        self.last_n_field(instrument, n, |b| b.volume)
    }

    /// Full close history
    pub fn prices(&self, instrument: &str) -> Vec<f64> {
        self.closes(instrument, self.capacity)
    }

    pub fn len(&self, instrument: &str) -> usize {
        self.existing(instrument).map(|s| s.lock().len()).unwrap_or(0)
    }

    pub fn has_enough_data(&self, instrument: &str, min_bars: usize) -> bool {
        self.len(instrument) >= min_bars
    }

    pub fn active_instruments(&self) -> Vec<String> {
        let mut out: Vec<String> = self.series.read().keys().cloned().collect();
        out.sort();
        out
    }

    // ------------------------------------------------------------------
    // Alert throttling
    // ------------------------------------------------------------------

    /// False while the instrument is paused or still inside `cooldown` of its last alert
    pub fn can_emit_alert(&self, instrument: &str, cooldown: Duration, now: NaiveDateTime) -> bool {
        let book = self.alerts.lock();
        if let Some(until) = book.paused_until.get(instrument) {
            if now < *until {
                return false;
            }
        }
        match book.last_alert.get(instrument) {
            Some(last) => now - *last >= cooldown,
            None => true,
        }
    }

    pub fn mark_alert_emitted(&self, instrument: &str, now: NaiveDateTime) {
        self.alerts.lock().last_alert.insert(instrument.to_string(), now);
    }

    pub fn pause_alerts(&self, instrument: &str, until: NaiveDateTime) {
        self.alerts.lock().paused_until.insert(instrument.to_string(), until);
    }

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    pub fn health_check(&self, now: NaiveDateTime) -> StoreHealth {
        let map = self.series.read();
        let stalest_bar_age_secs = map
            .values()
            .filter_map(|s| s.lock().back().map(|b| (now - b.timestamp).num_seconds()))
            .max();

        StoreHealth {
            instruments_tracked: map.len(),
            bars_received: self.bars_received.load(Ordering::Relaxed),
            bars_closed: self.bars_closed.load(Ordering::Relaxed),
            stalest_bar_age_secs,
        }
    }
}
