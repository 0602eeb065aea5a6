//! Decision Pipeline
//!
//! Sequential gate-and-score evaluation of one instrument:
//! data sufficiency, VWAP update, MTF direction, regime, HTF bias, VWAP
//! acceptance, structure, participation, timing, then thresholds.
//! Gates either end the evaluation with IGNORE or adjust the running score.

use tracing::debug;

use super::bars::BarSeries;
use super::breakout::BreakoutDetector;
use super::config::{DetectorKind, GateMode, HtfAlignment, PipelineConfig};
use super::context::EngineContext;
use super::decision::{ContextNotes, DecisionResult, ScoreBreakdown, TradeState};
use super::htf_bias::{htf_bias, BiasLabel};
use super::indicators::{round_to, rsi};
use super::levels::{compute_levels, location_score, nearest_level};
use super::liquidity::analyze_liquidity;
use super::market_regime::{detect_market_regime, MarketRegime, RegimeState};
use super::mtf::analyze_mtf;
use super::price_action::price_action_context;
use super::pullback::PullbackDetector;
use super::signals::{SignalClass, SignalDetector};
use super::volatility::analyze_bar_volatility;
use super::volume::analyze_volume;
use crate::error::ConfigError;
use crate::types::Direction;

pub struct DecisionPipeline {
    config: PipelineConfig,
    detector: Box<dyn SignalDetector>,
}

impl DecisionPipeline {
    /// Validate `config` against the base period and build its detector
    pub fn new(config: PipelineConfig, base_period_minutes: u32) -> Result<Self, ConfigError> {
        let detector: Box<dyn SignalDetector> = match config.detector {
            DetectorKind::Breakout => Box::new(BreakoutDetector::new(config.breakout.clone())),
            DetectorKind::Pullback => Box::new(PullbackDetector::new(config.pullback.clone())),
        };
        Self::with_detector(config, detector, base_period_minutes)
    }

    /// Same as `new` but with a caller-supplied structure detector
    pub fn with_detector(
        config: PipelineConfig,
        detector: Box<dyn SignalDetector>,
        base_period_minutes: u32,
    ) -> Result<Self, ConfigError> {
        config.validate(base_period_minutes)?;
        Ok(Self { config, detector })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn ignore(
        &self,
        instrument: &str,
        series: &BarSeries,
        reason: impl Into<String>,
        breakdown: &ScoreBreakdown,
        notes: &ContextNotes,
    ) -> Option<DecisionResult> {
        let reason = reason.into();
        debug!("{} IGNORE: {}", instrument, reason);
        Some(DecisionResult::ignore(
            instrument,
            *series.timestamps.last()?,
            reason,
            *breakdown,
            notes.clone(),
        ))
    }

    fn index_regime(&self, ctx: &EngineContext, instrument: &str) -> Option<MarketRegime> {
        let index = self.config.index_instrument.as_deref()?;
        if index == instrument {
            return None;
        }
        let store = ctx.store();
        let s = store.series(index, store.capacity());
        if s.len() < self.config.regime.min_bars {
            return None;
        }
        Some(detect_market_regime(&s.highs, &s.lows, &s.closes, None, &self.config.regime))
    }

    /// Evaluate `instrument` at last traded price `ltp`.
    ///
    /// `None` until the instrument has `min_bars` base bars (nothing is touched
    /// in that case) or when `ltp` is unusable.
    pub fn evaluate(&self, ctx: &EngineContext, instrument: &str, ltp: f64) -> Option<DecisionResult> {
        let store = ctx.store();
        if !store.has_enough_data(instrument, self.config.min_bars) {
            return None;
        }
        if !ltp.is_finite() || ltp <= 0.0 {
            debug!("{}: unusable ltp {}", instrument, ltp);
            return None;
        }

        let series = store.series(instrument, store.capacity());
        let timestamp = *series.timestamps.last()?;
        let last_volume = *series.volumes.last()?;
        let weights = &self.config.weights;
        let mut breakdown = ScoreBreakdown::default();
        let mut notes = ContextNotes::default();

        // VWAP
        let vwap = ctx.with_vwap(instrument, |calc| {
            calc.update(ltp, last_volume);
            calc.context(ltp)
        });
        notes.vwap = vwap.vwap;
        notes.vwap_acceptance = Some(vwap.acceptance);

        // MTF direction
        let mtf = ctx.mtf();
        let (fast_period, slow_period) = (self.config.fast_period_minutes, self.config.slow_period_minutes);
        let mtf_ctx = analyze_mtf(
            mtf.latest_aggregate(instrument, fast_period).as_ref(),
            mtf.latest_aggregate(instrument, slow_period).as_ref(),
            &mtf.aggregate_history(instrument, fast_period, self.config.mtf_lookback),
            &mtf.aggregate_history(instrument, slow_period, self.config.mtf_lookback),
        );
        notes.mtf_direction = Some(mtf_ctx.direction);
        notes.mtf_strength = Some(mtf_ctx.strength);
        notes.mtf_confidence = Some(mtf_ctx.confidence);

        if mtf_ctx.conflict {
            return self.ignore(instrument, &series, "MTF conflict", &breakdown, &notes);
        }
        let Some(direction) = mtf_ctx.direction.direction() else {
            return self.ignore(instrument, &series, "MTF neutral", &breakdown, &notes);
        };

        // Regime
        let index = self.index_regime(ctx, instrument);
        let regime = detect_market_regime(
            &series.highs,
            &series.lows,
            &series.closes,
            index.as_ref(),
            &self.config.regime,
        );
        notes.regime = Some(regime.state);
        notes.regime_strength = Some(regime.strength);

        let regime_base = match regime.state {
            RegimeState::Weak | RegimeState::Compression => {
                return self.ignore(instrument, &series, format!("regime {}", regime.state), &breakdown, &notes);
            }
            RegimeState::EarlyTrend => weights.early_trend_bonus,
            RegimeState::Trending => weights.trending_bonus,
            RegimeState::Exhaustion => 0.0,
        };
        breakdown.regime = regime_base * (0.5 + regime.strength / 20.0);

        // HTF bias
        let htf = htf_bias(&series.closes, vwap.vwap, &self.config.htf);
        notes.htf_direction = Some(htf.direction);
        notes.htf_label = Some(htf.label);

        let htf_rejects = match self.config.htf_alignment {
            HtfAlignment::MustMatch => htf.direction != direction.bias(),
            HtfAlignment::MustNotOppose => htf.direction.opposes(direction.bias()),
        };
        if htf_rejects {
            return self.ignore(
                instrument,
                &series,
                format!("HTF {} against {}", htf.direction, direction),
                &breakdown,
                &notes,
            );
        }
        breakdown.htf = match htf.label {
            BiasLabel::Strong => weights.htf_bonus,
            BiasLabel::Weak => weights.htf_bonus * 2.0 / 3.0,
            BiasLabel::Neutral => 0.0,
        };

        // VWAP acceptance
        if vwap.opposes(direction) {
            match self.config.vwap_gate {
                GateMode::Veto => {
                    return self.ignore(
                        instrument,
                        &series,
                        format!("price accepted {:?} VWAP", vwap.acceptance).to_lowercase(),
                        &breakdown,
                        &notes,
                    );
                }
                GateMode::Penalty(p) => breakdown.vwap_penalty = -p,
            }
        }
        breakdown.vwap = vwap.directional_score(direction);

        // Structure
        let Some(signal) = self.detector.detect(&series, mtf_ctx.direction) else {
            return self.ignore(
                instrument,
                &series,
                format!("no {} structure", self.detector.kind()),
                &breakdown,
                &notes,
            );
        };
        notes.signal_kind = Some(signal.kind);
        notes.signal_class = Some(signal.class);
        notes.signal_score = Some(signal.score);

        if signal.direction != direction {
            return self.ignore(
                instrument,
                &series,
                format!("{} {} against MTF {}", signal.kind, signal.direction, direction),
                &breakdown,
                &notes,
            );
        }
        if signal.class == SignalClass::Potential {
            breakdown.structure = weights.potential_score;
            let result = DecisionResult::new(
                instrument,
                timestamp,
                TradeState::prepare(direction),
                weights.potential_score,
                breakdown,
                signal.reason,
                notes,
            );
            debug!("{} {} on potential {}", instrument, result.state, signal.kind);
            return Some(result);
        }
        breakdown.structure = weights.structure_bonus;

        // Participation
        breakdown.volume = analyze_volume(&series.volumes, Some(&series.closes), &self.config.volume).score;
        breakdown.volatility = analyze_bar_volatility(&series.highs, &series.lows, &series.closes).score;

        let liquidity = analyze_liquidity(&series.volumes, &self.config.liquidity);
        if liquidity.score < 0.0 {
            match self.config.liquidity_gate {
                GateMode::Veto => {
                    return self.ignore(instrument, &series, liquidity.comment, &breakdown, &notes);
                }
                GateMode::Penalty(p) => breakdown.liquidity = liquidity.score - p,
            }
        } else {
            breakdown.liquidity = liquidity.score;
        }

        // Timing
        let pa = price_action_context(&series.opens, &series.highs, &series.lows, &series.closes);
        breakdown.price_action = pa.directional_score(direction) * weights.price_action_weight;

        let last_close = series.closes[series.len() - 1];
        let levels = compute_levels(&series.highs, &series.lows);
        let nearest = nearest_level(last_close, &levels, self.config.location_max_pct);
        breakdown.location =
            location_score(nearest.as_ref(), direction, self.config.location_max_pct) * weights.location_weight;

        if let Some(value) = rsi(&series.closes, weights.rsi_period) {
            let against = match direction {
                Direction::Long => value < weights.rsi_long_floor,
                Direction::Short => value > weights.rsi_short_ceiling,
            };
            if against {
                breakdown.momentum = -weights.momentum_penalty;
            }
        }

        // Thresholds
        let score = round_to(breakdown.total().clamp(0.0, 10.0), 2);
        let state = if score >= self.config.execute_threshold {
            TradeState::execute(direction)
        } else if score >= self.config.prepare_threshold {
            TradeState::prepare(direction)
        } else {
            TradeState::Ignore
        };
        let reason = if state == TradeState::Ignore {
            format!("score {score} below prepare threshold")
        } else {
            signal.reason
        };

        debug!("{} {} score {:.2} ({})", instrument, state, score, notes.regime.map(|r| r.to_string()).unwrap_or_default());
        Some(DecisionResult::new(instrument, timestamp, state, score, breakdown, reason, notes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::bars::{parse_timestamp, Bar};
    use crate::trading_core::config::EngineConfig;
    use crate::trading_core::signals::{BreakoutComponents, Signal, SignalComponents, SignalKind, SignalLevels};
    use crate::types::Bias;
    use chrono::Duration;

    fn context() -> EngineContext {
        EngineContext::new(&EngineConfig::default()).unwrap()
    }

    /// Zigzag trend: up, up, down, down in four-bar cycles (mirrored when
    /// `sign` is negative) with rising volume.
    fn zigzag(n: usize, sign: f64) -> Vec<Bar> {
        scaled_zigzag(n, sign, 1.0)
    }

    fn scaled_zigzag(n: usize, sign: f64, volume_scale: f64) -> Vec<Bar> {
        let steps = [0.6, 0.6, -0.4, -0.3];
        let t0 = parse_timestamp("2025-01-02T09:15:00").unwrap();
        let mut close = 100.0;
        (0..n)
            .map(|i| {
                let open = close;
                close = open + sign * steps[i % steps.len()];
                Bar::new(
                    "A",
                    t0 + Duration::minutes(5 * i as i64),
                    open,
                    open.max(close) + 0.15,
                    open.min(close) - 0.15,
                    close,
                    volume_scale * (1_000_000.0 + 20_000.0 * i as f64),
                )
            })
            .collect()
    }

    fn ingest_all(ctx: &EngineContext, bars: Vec<Bar>) -> f64 {
        let mut last = 0.0;
        for bar in bars {
            last = bar.close;
            assert!(ctx.ingest_bar(bar));
        }
        last
    }

    /// Feed bars one at a time, evaluating at each close like the live loop
    fn replay(pipeline: &DecisionPipeline, ctx: &EngineContext, bars: Vec<Bar>) -> Vec<DecisionResult> {
        let mut results = Vec::new();
        for bar in bars {
            let ltp = bar.close;
            assert!(ctx.ingest_bar(bar));
            if let Some(result) = pipeline.evaluate(ctx, "A", ltp) {
                results.push(result);
            }
        }
        results
    }

    #[test]
    fn test_insufficient_data_is_none_without_side_effects() {
        let ctx = context();
        let pipeline = DecisionPipeline::new(PipelineConfig::pullback(), 5).unwrap();
        let results = replay(&pipeline, &ctx, zigzag(34, 1.0));

        assert!(results.is_empty());
        assert!(!ctx.has_vwap("A"));
        assert!(pipeline.evaluate(&ctx, "unknown", 100.0).is_none());
    }

    #[test]
    fn test_flat_market_is_ignored() {
        let ctx = context();
        let pipeline = DecisionPipeline::new(PipelineConfig::breakout(), 5).unwrap();
        let t0 = parse_timestamp("2025-01-02T09:15:00").unwrap();
        for i in 0..40 {
            let bar = Bar::new("A", t0 + Duration::minutes(5 * i), 100.0, 100.2, 99.8, 100.0, 1_000_000.0);
            assert!(ctx.ingest_bar(bar));
        }

        let result = pipeline.evaluate(&ctx, "A", 100.0).unwrap();
        assert_eq!(result.state, TradeState::Ignore);
        assert_eq!(result.direction, None);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.notes.mtf_direction, Some(Bias::Neutral));
        // the VWAP is updated even when the MTF gate rejects
        assert_eq!(ctx.vwap("A"), Some(100.0));
    }

    #[test]
    fn test_retest_in_uptrend_executes_long() {
        let ctx = context();
        let pipeline = DecisionPipeline::new(PipelineConfig::pullback(), 5).unwrap();
        let results = replay(&pipeline, &ctx, zigzag(42, 1.0));

        // evaluated from the 35th bar on
        assert_eq!(results.len(), 8);
        let last = results.last().unwrap();
        assert_eq!(last.state, TradeState::ExecuteLong);
        assert_eq!(last.direction, Some(Direction::Long));
        assert_eq!(last.score, 10.0);
        assert_eq!(last.notes.mtf_direction, Some(Bias::Bullish));
        assert_eq!(last.notes.regime, Some(RegimeState::Trending));
        assert_eq!(last.notes.htf_direction, Some(Bias::Bullish));
        assert_eq!(last.notes.signal_class, Some(SignalClass::Confirmed));
        assert_eq!(last.breakdown.structure, 3.0);
        assert_eq!(last.breakdown.vwap, 1.5);
        assert_eq!(last.breakdown.liquidity, 2.0);
        assert!(last.breakdown.location > 0.0);
        assert!(last.breakdown.total() > 10.0);
    }

    #[test]
    fn test_mirrored_retest_executes_short() {
        let ctx = context();
        let pipeline = DecisionPipeline::new(PipelineConfig::pullback(), 5).unwrap();
        let results = replay(&pipeline, &ctx, zigzag(42, -1.0));

        let last = results.last().unwrap();
        assert_eq!(last.state, TradeState::ExecuteShort);
        assert_eq!(last.notes.mtf_direction, Some(Bias::Bearish));
        assert_eq!(last.breakdown.vwap, 1.5);
        assert_eq!(last.breakdown.momentum, 0.0);
    }

    #[test]
    fn test_execute_only_with_agreeing_mtf() {
        for sign in [1.0, -1.0] {
            let ctx = context();
            let pipeline = DecisionPipeline::new(PipelineConfig::pullback(), 5).unwrap();
            for result in replay(&pipeline, &ctx, zigzag(42, sign)) {
                assert_eq!(result.direction, result.state.direction());
                assert!((0.0..=10.0).contains(&result.score));
                if result.state.is_execute() {
                    let mtf = result.notes.mtf_direction.unwrap();
                    assert_ne!(mtf, Bias::Neutral);
                    assert_eq!(mtf.direction(), result.direction);
                }
            }
        }
    }

    /// Always reports a breakout of the given class in the MTF direction
    struct FixedClass(SignalClass);

    impl SignalDetector for FixedClass {
        fn kind(&self) -> SignalKind {
            SignalKind::Breakout
        }

        fn detect(&self, series: &BarSeries, mtf_direction: Bias) -> Option<Signal> {
            let direction = mtf_direction.direction()?;
            let last = *series.closes.last()?;
            Some(Signal {
                kind: SignalKind::Breakout,
                class: self.0,
                direction,
                score: 0.0,
                components: SignalComponents::Breakout(BreakoutComponents::default()),
                levels: SignalLevels::Range { high: last, low: last },
                reason: format!("{:?}_TEST", self.0).to_uppercase(),
            })
        }
    }

    #[test]
    fn test_potential_signal_prepares() {
        let ctx = context();
        let detector = Box::new(FixedClass(SignalClass::Potential));
        let pipeline = DecisionPipeline::with_detector(PipelineConfig::pullback(), detector, 5).unwrap();
        let results = replay(&pipeline, &ctx, zigzag(42, 1.0));

        let last = results.last().unwrap();
        assert_eq!(last.state, TradeState::PrepareLong);
        assert_eq!(last.score, 1.0);
        assert_eq!(last.reason, "POTENTIAL_TEST");
    }

    /// Session VWAP far above the last price: long accepted below VWAP
    fn ctx_with_heavy_vwap_above(bars: Vec<Bar>) -> (EngineContext, f64) {
        let ctx = context();
        let ltp = ingest_all(&ctx, bars);
        ctx.with_vwap("A", |calc| calc.update(ltp * 1.05, 1e12));
        (ctx, ltp)
    }

    #[test]
    fn test_vwap_veto_rejects_long_below_vwap() {
        let (ctx, ltp) = ctx_with_heavy_vwap_above(zigzag(42, 1.0));
        let pipeline = DecisionPipeline::new(PipelineConfig::breakout(), 5).unwrap();
        let result = pipeline.evaluate(&ctx, "A", ltp).unwrap();

        assert_eq!(result.state, TradeState::Ignore);
        assert_eq!(result.reason, "price accepted below vwap");
        assert_eq!(result.notes.htf_direction, Some(Bias::Bullish));
        assert_eq!(result.breakdown.structure, 0.0);
    }

    #[test]
    fn test_vwap_penalty_keeps_evaluating() {
        let (ctx, ltp) = ctx_with_heavy_vwap_above(zigzag(42, 1.0));
        let pipeline = DecisionPipeline::new(PipelineConfig::pullback(), 5).unwrap();
        let result = pipeline.evaluate(&ctx, "A", ltp).unwrap();

        assert_eq!(result.breakdown.vwap_penalty, -1.0);
        assert_eq!(result.breakdown.vwap, -1.2);
        assert_eq!(result.breakdown.structure, 3.0);
        assert_eq!(result.state, TradeState::ExecuteLong);
    }

    #[test]
    fn test_liquidity_veto_on_thin_volume() {
        let ctx = context();
        let ltp = ingest_all(&ctx, scaled_zigzag(42, 1.0, 0.001));
        let detector = Box::new(FixedClass(SignalClass::Confirmed));
        let pipeline = DecisionPipeline::with_detector(PipelineConfig::breakout(), detector, 5).unwrap();
        let result = pipeline.evaluate(&ctx, "A", ltp).unwrap();

        assert_eq!(result.state, TradeState::Ignore);
        assert_eq!(result.reason, "illiquid average volume, stable participation");
        assert_eq!(result.breakdown.structure, 3.0);
        assert_eq!(result.breakdown.liquidity, 0.0);
    }

    #[test]
    fn test_liquidity_penalty_on_thin_volume() {
        let ctx = context();
        let ltp = ingest_all(&ctx, scaled_zigzag(42, 1.0, 0.001));
        let pipeline = DecisionPipeline::new(PipelineConfig::pullback(), 5).unwrap();
        let result = pipeline.evaluate(&ctx, "A", ltp).unwrap();

        assert_eq!(result.breakdown.liquidity, -1.5);
        assert_eq!(result.direction, Some(Direction::Long));
    }

    #[test]
    fn test_neutral_htf_fails_must_match_only() {
        // 38 bars: too short for the HTF EMAs, so the bias is NEUTRAL
        let ctx = context();
        let ltp = ingest_all(&ctx, zigzag(38, 1.0));

        let strict = DecisionPipeline::new(PipelineConfig::pullback(), 5).unwrap();
        let result = strict.evaluate(&ctx, "A", ltp).unwrap();
        assert_eq!(result.state, TradeState::Ignore);
        assert_eq!(result.notes.mtf_direction, Some(Bias::Bullish));
        assert_eq!(result.notes.htf_direction, Some(Bias::Neutral));
        assert_eq!(result.reason, "HTF NEUTRAL against LONG");

        let lenient = DecisionPipeline::new(PipelineConfig::breakout(), 5).unwrap();
        let result = lenient.evaluate(&ctx, "A", ltp).unwrap();
        assert_eq!(result.notes.htf_direction, Some(Bias::Neutral));
        assert!(!result.reason.starts_with("HTF"));
        assert_eq!(result.breakdown.htf, 0.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            fast_period_minutes: 12,
            ..PipelineConfig::breakout()
        };
        assert!(DecisionPipeline::new(config, 5).is_err());
    }

    #[test]
    fn test_bad_ltp_is_skipped() {
        let ctx = context();
        let pipeline = DecisionPipeline::new(PipelineConfig::pullback(), 5).unwrap();
        for bar in zigzag(40, 1.0) {
            ctx.ingest_bar(bar);
        }
        assert!(pipeline.evaluate(&ctx, "A", f64::NAN).is_none());
        assert!(pipeline.evaluate(&ctx, "A", -1.0).is_none());
        assert!(!ctx.has_vwap("A"));
    }
}
