//! Engine context: the bar store, the timeframe builder and the per-instrument
//! VWAP calculators, owned together and handed to the pipeline.

use chrono_tz::Tz;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::bar_store::BarStore;
use super::bars::Bar;
use super::config::EngineConfig;
use super::mtf::MtfBuilder;
use super::vwap::VwapCalculator;
use crate::error::ConfigError;

pub struct EngineContext {
    store: Arc<BarStore>,
    mtf: Arc<MtfBuilder>,
    vwaps: RwLock<HashMap<String, Arc<Mutex<VwapCalculator>>>>,
    tz: Tz,
}

impl EngineContext {
    /// Build the store and the timeframe builder, and subscribe the builder to
    /// bar closes so every stored bar reaches it exactly once.
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        let store = Arc::new(BarStore::new(config.store_capacity, config.base_period_minutes)?);
        let mtf = Arc::new(MtfBuilder::new(config.base_period_minutes, config.mtf_max_base_bars)?);
        let tz = config.tz()?;

        let builder = Arc::clone(&mtf);
        store.register_on_bar_close(move |_, bar| {
            builder.update(bar);
            Ok(())
        });

        info!(
            "Engine context ready: {}m base bars, capacity {}, tz {}",
            config.base_period_minutes, config.store_capacity, tz
        );

        Ok(Self {
            store,
            mtf,
            vwaps: RwLock::new(HashMap::new()),
            tz,
        })
    }

    pub fn store(&self) -> &Arc<BarStore> {
        &self.store
    }

    pub fn mtf(&self) -> &Arc<MtfBuilder> {
        &self.mtf
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Store a completed base bar (and through the close callback, the MTF buffer)
    pub fn ingest_bar(&self, bar: Bar) -> bool {
        self.store.append_completed_bar(bar)
    }

    /// Run `f` on the instrument's VWAP calculator, creating it on first use
    pub fn with_vwap<R>(&self, instrument: &str, f: impl FnOnce(&mut VwapCalculator) -> R) -> R {
        let existing = self.vwaps.read().get(instrument).cloned();
        let calc = match existing {
            Some(calc) => calc,
            None => self
                .vwaps
                .write()
                .entry(instrument.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VwapCalculator::default())))
                .clone(),
        };
        let mut guard = calc.lock();
        f(&mut guard)
    }

    pub fn has_vwap(&self, instrument: &str) -> bool {
        self.vwaps.read().contains_key(instrument)
    }

    pub fn vwap(&self, instrument: &str) -> Option<f64> {
        self.vwaps.read().get(instrument)?.lock().vwap()
    }

    /// Session boundary: every calculator starts over
    pub fn reset_vwaps(&self) {
        let calcs: Vec<_> = self.vwaps.read().values().cloned().collect();
        for calc in calcs {
            calc.lock().reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::bars::parse_timestamp;
    use chrono::Duration;

    #[test]
    fn test_ingest_feeds_timeframe_builder() {
        let ctx = EngineContext::new(&EngineConfig::default()).unwrap();
        let t0 = parse_timestamp("2025-01-02T09:15:00").unwrap();
        for i in 0..3 {
            let bar = Bar::new("A", t0 + Duration::minutes(5 * i), 10.0, 11.0, 9.0, 10.5, 100.0);
            assert!(ctx.ingest_bar(bar));
        }
        // duplicate bar is rejected by the store and never reaches the builder
        let dup = Bar::new("A", t0 + Duration::minutes(10), 10.0, 11.0, 9.0, 10.5, 100.0);
        assert!(!ctx.ingest_bar(dup));

        assert_eq!(ctx.mtf().len("A"), 3);
        assert_eq!(ctx.mtf().latest_aggregate("A", 15).unwrap().volume, 300.0);
    }

    #[test]
    fn test_vwap_registry() {
        let ctx = EngineContext::new(&EngineConfig::default()).unwrap();
        assert!(!ctx.has_vwap("A"));
        ctx.with_vwap("A", |calc| calc.update(100.0, 10.0));
        assert!(ctx.has_vwap("A"));
        assert_eq!(ctx.vwap("A"), Some(100.0));

        ctx.reset_vwaps();
        assert_eq!(ctx.vwap("A"), None);
    }

    #[test]
    fn test_first_vwap_use_from_threads() {
        let ctx = EngineContext::new(&EngineConfig::default()).unwrap();
        std::thread::scope(|s| {
            for (name, price) in [("A", 100.0), ("B", 50.0), ("C", 20.0)] {
                let ctx = &ctx;
                s.spawn(move || {
                    ctx.with_vwap(name, |calc| calc.update(price, 10.0));
                });
            }
        });
        assert_eq!(ctx.vwap("A"), Some(100.0));
        assert_eq!(ctx.vwap("B"), Some(50.0));
        assert_eq!(ctx.vwap("C"), Some(20.0));
    }

    #[test]
    fn test_bad_config_is_fatal() {
        let config = EngineConfig {
            store_capacity: 0,
            ..Default::default()
        };
        assert!(EngineContext::new(&config).is_err());
    }
}
