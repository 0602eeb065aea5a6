//! Feed orchestration
//!
//! Owns the engine context and the pipeline, and drives them from feed
//! messages:
//! - completed bars go into the store (and through it, the MTF builder)
//! - every updated instrument is evaluated at its last traded price
//! - the first EXECUTE per instrument per trading day is handed to the
//!   execution handler; exits are checked once per message
//! - a new trading date resets the VWAP calculators and the signaled set
//!
//! Order placement and position bookkeeping live behind `ExecutionHandler`.

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use super::context::EngineContext;
use super::decision::{DecisionResult, TradeState};
use super::feed::FeedMessage;
use super::pipeline::DecisionPipeline;

/// Receives trade decisions. Implementations place orders and manage exits.
pub trait ExecutionHandler: Send + Sync {
    fn handle_entry(&self, instrument: &str, decision: &DecisionResult, ltp: f64) -> Result<()>;

    /// Called once per feed message with every price it carried
    fn handle_exits(&self, prices: &HashMap<String, f64>, now: NaiveDateTime) -> Result<()>;
}

/// Execution handler that only logs entries
#[derive(Debug, Default)]
pub struct LoggingExecutor;

impl ExecutionHandler for LoggingExecutor {
    fn handle_entry(&self, instrument: &str, decision: &DecisionResult, ltp: f64) -> Result<()> {
        info!(
            "ENTRY {} {} @ {:.2} | score {:.2} | {}",
            decision.state, instrument, ltp, decision.score, decision.reason
        );
        Ok(())
    }

    fn handle_exits(&self, _prices: &HashMap<String, f64>, _now: NaiveDateTime) -> Result<()> {
        Ok(())
    }
}

/// Running counters for a feed session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrchestratorStats {
    pub messages: u64,
    pub bars_ingested: u64,
    pub evaluations: u64,
    pub ignores: u64,
    pub prepares: u64,
    pub executes: u64,
    /// EXECUTEs handed to the execution handler
    pub entries: u64,
    /// EXECUTEs suppressed because the instrument already fired today
    pub duplicates: u64,
    pub sessions: u64,
}

pub struct Orchestrator {
    ctx: EngineContext,
    pipeline: DecisionPipeline,
    executor: Box<dyn ExecutionHandler>,
    universe: Option<HashSet<String>>,
    current_date: Option<NaiveDate>,
    signaled_today: HashSet<String>,
    stats: OrchestratorStats,
}

impl Orchestrator {
    pub fn new(ctx: EngineContext, pipeline: DecisionPipeline, executor: Box<dyn ExecutionHandler>) -> Self {
        Self {
            ctx,
            pipeline,
            executor,
            universe: None,
            current_date: None,
            signaled_today: HashSet::new(),
            stats: OrchestratorStats::default(),
        }
    }

    /// Only instruments in `universe` are ingested and evaluated
    pub fn with_universe(mut self, universe: HashSet<String>) -> Self {
        info!("Universe restricted to {} instruments", universe.len());
        self.universe = Some(universe);
        self
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn stats(&self) -> &OrchestratorStats {
        &self.stats
    }

    pub fn current_date(&self) -> Option<NaiveDate> {
        self.current_date
    }

    pub fn has_signaled(&self, instrument: &str) -> bool {
        self.signaled_today.contains(instrument)
    }

    fn in_universe(&self, instrument: &str) -> bool {
        self.universe.as_ref().map_or(true, |u| u.contains(instrument))
    }

    /// Start a new trading session: fresh VWAPs, nothing signaled yet
    pub fn reset_session(&mut self) {
        self.ctx.reset_vwaps();
        self.signaled_today.clear();
        self.stats.sessions += 1;
    }

    /// Sessions only move forward; a late bar from an earlier day keeps the
    /// current session.
    fn check_date_change(&mut self, date: NaiveDate) {
        if self.current_date.is_some_and(|current| date <= current) {
            return;
        }
        if let Some(previous) = self.current_date {
            info!("New trading day {} (was {}), resetting session state", date, previous);
        }
        self.current_date = Some(date);
        self.reset_session();
    }

    /// Process a message stamped with the exchange-local wall clock
    pub fn on_message(&mut self, msg: &FeedMessage) -> Vec<DecisionResult> {
        let now = Utc::now().with_timezone(&self.ctx.tz()).naive_local();
        self.on_message_at(msg, now)
    }

    /// Process a message. The trading date comes from the newest bar in the
    /// message. A message without bars stays in the current session, and only
    /// dates the first session by `now`.
    pub fn on_message_at(&mut self, msg: &FeedMessage, now: NaiveDateTime) -> Vec<DecisionResult> {
        self.stats.messages += 1;

        let updates: Vec<_> = msg.updates.iter().filter(|u| self.in_universe(&u.instrument)).collect();
        let bar_date = updates
            .iter()
            .filter_map(|u| u.bar.as_ref())
            .map(|b| b.timestamp.date())
            .max();
        match (bar_date, self.current_date) {
            (Some(date), _) => self.check_date_change(date),
            (None, None) => self.check_date_change(now.date()),
            (None, Some(_)) => {}
        }

        let mut decisions = Vec::new();
        let mut prices = HashMap::with_capacity(updates.len());

        for update in updates {
            prices.insert(update.instrument.clone(), update.ltp);

            if let Some(bar) = &update.bar {
                if self.ctx.ingest_bar(bar.clone()) {
                    self.stats.bars_ingested += 1;
                }
            }

            let Some(decision) = self.pipeline.evaluate(&self.ctx, &update.instrument, update.ltp) else {
                continue;
            };
            self.stats.evaluations += 1;

            match decision.state {
                TradeState::Ignore => self.stats.ignores += 1,
                TradeState::PrepareLong | TradeState::PrepareShort => {
                    self.stats.prepares += 1;
                    debug!("{} {} score {:.2}", decision.state, update.instrument, decision.score);
                }
                TradeState::ExecuteLong | TradeState::ExecuteShort => {
                    self.stats.executes += 1;
                    if self.signaled_today.insert(update.instrument.clone()) {
                        self.stats.entries += 1;
                        if let Err(e) = self.executor.handle_entry(&update.instrument, &decision, update.ltp) {
                            warn!("Entry handler failed for {}: {:?}", update.instrument, e);
                        }
                    } else {
                        self.stats.duplicates += 1;
                        debug!("{} already signaled today, {} suppressed", update.instrument, decision.state);
                    }
                }
            }
            decisions.push(decision);
        }

        if let Err(e) = self.executor.handle_exits(&prices, now) {
            warn!("Exit handler failed: {:?}", e);
        }

        decisions
    }
}
