//! Risk Manager
//!
//! Single owner of all shared risk state. Every trading loop holds an
//! `Arc<RiskManager>` and goes through its methods; nothing hands out the
//! monitors themselves.
//!
//! Locking:
//! - one `RwLock` per instrument breaker and per track monitor, plus one for
//!   portfolio exposure
//! - `validate_order` nests them in the order track -> instrument -> exposure;
//!   every other entry point takes one lock at a time
//! - `is_safe` and `is_trading_allowed` read atomics mirrored from the locked
//!   state and never block

use chrono::Duration;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use sentinel_core::{
    CheckpointBody, CheckpointRecord, CircuitState, EventSource, InstrumentId, RiskAction,
    RiskContext, RiskDecision, RiskEvent, RiskEventKind, RiskLevel, Severity, Timestamp, TrackId,
    TradeId,
};
use sentinel_ports::{Clock, EventSink};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::circuit_breaker::{BreakerTransition, CircuitBreaker};
use crate::config::{ConfigHandle, RiskConfig};
use crate::drawdown::{DrawdownMonitor, LevelChange};
use crate::error::{Result, RiskError};
use crate::exposure::ExposureMonitor;
use crate::kill_switch::{FileSync, KillReasonKind, KillSwitch};
use crate::layer::{self, RiskLayer, Verdict};
use crate::parameters::duration_ms;
use crate::status::{BreakerStatus, ExposureStatus, RiskStatusSnapshot, TrackStatus};

/// Published state byte for a breaker that failed its integrity check
const CORRUPTED: u8 = u8::MAX;

struct BreakerSlot {
    track_id: TrackId,
    breaker: RwLock<CircuitBreaker>,
    published_state: AtomicU8,
    opened_at_ms: AtomicI64,
}

impl BreakerSlot {
    fn new(breaker: CircuitBreaker, track_id: TrackId) -> Self {
        let slot = Self {
            track_id,
            breaker: RwLock::new(breaker),
            published_state: AtomicU8::new(CircuitState::Closed.as_u8()),
            opened_at_ms: AtomicI64::new(0),
        };
        slot.publish(&slot.breaker.read());
        slot
    }

    /// Mirror the locked state for lock-free readers. `opened_at` is stored
    /// before the state byte so a reader that sees OPEN sees its timestamp.
    fn publish(&self, breaker: &CircuitBreaker) {
        if breaker.check_integrity().is_err() {
            self.published_state.store(CORRUPTED, Ordering::Release);
            return;
        }
        let opened_at = breaker
            .state()
            .opened_at
            .map(|t| t.timestamp_millis())
            .unwrap_or(0);
        self.opened_at_ms.store(opened_at, Ordering::Release);
        self.published_state
            .store(breaker.current().as_u8(), Ordering::Release);
    }
}

struct TrackSlot {
    monitor: RwLock<DrawdownMonitor>,
    published_level: AtomicU8,
}

impl TrackSlot {
    fn publish(&self, monitor: &DrawdownMonitor) {
        self.published_level
            .store(monitor.level().as_u8(), Ordering::Release);
    }
}

/// A layer that could not apply its part of a trade result
#[derive(Debug, Clone, PartialEq)]
pub struct LayerFailure {
    pub layer: RiskLayer,
    pub error: RiskError,
}

/// Outcome of `RiskManager::record_trade`
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Both layers updated
    Applied,
    /// The trade id was already recorded
    Duplicate,
    /// One layer updated, the other failed
    Partial { failures: Vec<LayerFailure> },
    /// Nothing applied; the trade id stays unrecorded so a retry can apply it
    Failed { failures: Vec<LayerFailure> },
}

/// Result of restoring checkpoints
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub applied: usize,
    pub stale: usize,
    pub rejected: usize,
}

pub struct RiskManager {
    config: ConfigHandle,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    breakers: HashMap<InstrumentId, BreakerSlot>,
    tracks: HashMap<TrackId, TrackSlot>,
    exposure: RwLock<ExposureMonitor>,
    kill_switch: Arc<KillSwitch>,
    /// Idempotency ledger for `record_trade`, cleared by the daily reset
    recorded: DashMap<TradeId, Timestamp>,
    checkpoint_version: AtomicU64,
}

impl RiskManager {
    pub fn new(config: RiskConfig, clock: Arc<dyn Clock>, sink: Arc<dyn EventSink>) -> Result<Self> {
        let config = ConfigHandle::new(config)?;
        let snapshot = config.load();

        let breakers = snapshot
            .instruments
            .iter()
            .map(|(id, cfg)| {
                let slot = BreakerSlot::new(CircuitBreaker::new(id.clone()), cfg.track_id.clone());
                (id.clone(), slot)
            })
            .collect();

        let tracks = snapshot
            .tracks
            .iter()
            .map(|(id, cfg)| {
                let slot = TrackSlot {
                    monitor: RwLock::new(DrawdownMonitor::new(id.clone(), cfg.starting_equity)),
                    published_level: AtomicU8::new(RiskLevel::Normal.as_u8()),
                };
                (id.clone(), slot)
            })
            .collect();

        info!(
            "[RISK] Risk manager initialized: {} instruments, {} tracks, clock={}",
            snapshot.instruments.len(),
            snapshot.tracks.len(),
            clock.name()
        );

        Ok(Self {
            config,
            clock,
            sink,
            breakers,
            tracks,
            exposure: RwLock::new(ExposureMonitor::new()),
            kill_switch: Arc::new(KillSwitch::new()),
            recorded: DashMap::new(),
            checkpoint_version: AtomicU64::new(0),
        })
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<RiskConfig> {
        self.config.load()
    }

    pub fn kill_switch(&self) -> &Arc<KillSwitch> {
        &self.kill_switch
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // ------------------------------------------------------------------
    // Lock-free reads
    // ------------------------------------------------------------------

    /// Is the instrument's breaker letting orders through right now.
    ///
    /// Reads only the published mirror. Unknown instruments and corrupted
    /// breakers read as unsafe.
    pub fn is_safe(&self, instrument_id: &str) -> bool {
        let Some(slot) = self.breakers.get(instrument_id) else {
            return false;
        };
        match CircuitState::from_u8(slot.published_state.load(Ordering::Acquire)) {
            Some(CircuitState::Closed) | Some(CircuitState::HalfOpen) => true,
            Some(CircuitState::Open) => {
                let config = self.config.load();
                let Ok(instrument) = config.instrument(instrument_id) else {
                    return false;
                };
                let opened_at = slot.opened_at_ms.load(Ordering::Acquire);
                let elapsed = self.clock.now().timestamp_millis().saturating_sub(opened_at);
                i64::try_from(instrument.circuit_breaker.cooldown_ms)
                    .is_ok_and(|cooldown| elapsed >= cooldown)
            }
            None => false,
        }
    }

    /// Pre-signal gate: kill switch, breaker and track HALT, all lock-free
    pub fn is_trading_allowed(&self, instrument_id: &str, track_id: &str) -> bool {
        if self.kill_switch.is_engaged() || !self.is_safe(instrument_id) {
            return false;
        }
        self.tracks
            .get(track_id)
            .and_then(|t| RiskLevel::from_u8(t.published_level.load(Ordering::Acquire)))
            .is_some_and(|level| level < RiskLevel::Halt)
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluate a proposed order against the kill switch and L1 -> L2 -> L3.
    ///
    /// Never fails: any error or panic while evaluating yields REJECT and a
    /// CRITICAL `EvaluationFault` event.
    pub fn validate_order(&self, ctx: &RiskContext) -> RiskDecision {
        let now = self.clock.now();
        let mut events = Vec::new();
        let outcome = guarded(|| self.evaluate(ctx, now, &mut events));
        for event in events {
            self.emit(event);
        }

        match outcome {
            Ok(decision) => {
                debug!(
                    "[RISK] {} {} {} -> {} x{}",
                    ctx.trade_id, ctx.instrument_id, ctx.side, decision.action, decision.risk_multiplier
                );
                decision
            }
            Err(e) => {
                let reason = format!("evaluation fault: {}", e);
                self.emit(RiskEvent::new(
                    RiskEventKind::EvaluationFault,
                    Severity::Critical,
                    EventSource::System,
                    ctx.instrument_id.clone(),
                    reason.clone(),
                    now,
                ));
                RiskDecision::reject(reason, now)
            }
        }
    }

    fn evaluate(
        &self,
        ctx: &RiskContext,
        now: Timestamp,
        events: &mut Vec<RiskEvent>,
    ) -> Result<RiskDecision> {
        let config = self.config.load();
        // An unrepresentable TTL leaves no validity window
        let valid_until = duration_ms(config.decision_ttl_ms)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(now);

        if self.kill_switch.is_engaged() {
            let status = self.kill_switch.status();
            let reason = format!(
                "kill switch engaged: {}",
                status.reason.as_deref().unwrap_or("no reason recorded")
            );
            return Ok(RiskDecision::new(
                RiskAction::ForceClose,
                Decimal::ONE,
                vec![reason],
                valid_until,
            ));
        }

        let instrument = config.instrument(&ctx.instrument_id)?;
        if instrument.track_id != ctx.track_id {
            return Err(RiskError::TrackMismatch {
                instrument_id: ctx.instrument_id.clone(),
                expected: instrument.track_id.clone(),
                actual: ctx.track_id.clone(),
            });
        }
        let track = config.track(&ctx.track_id)?;
        let breaker_slot = self.breaker_slot(&ctx.instrument_id)?;
        let track_slot = self.track_slot(&ctx.track_id)?;
        let account_equity = self.account_equity()?;
        let instrument_cap = config.instrument_cap(&ctx.instrument_id)?;

        let mut monitor = track_slot.monitor.write();
        let mut breaker = breaker_slot.breaker.write();

        let mut multiplier = Decimal::ONE;
        let mut notes = Vec::new();
        for risk_layer in RiskLayer::ORDERED {
            let verdict = match risk_layer {
                RiskLayer::CircuitBreaker => {
                    if let Err(e) = breaker.check_integrity() {
                        breaker_slot.publish(&breaker);
                        return Err(e);
                    }
                    let limits = &instrument.circuit_breaker;
                    if let Some(transition) = breaker.poll(limits, now) {
                        breaker_slot.publish(&breaker);
                        events.push(breaker_event(&ctx.instrument_id, &transition, now));
                    }
                    layer::breaker_verdict(
                        breaker.current(),
                        limits,
                        breaker.cooldown_ends_at(limits),
                        breaker.state().last_reason.as_deref(),
                        now,
                    )
                }
                RiskLayer::Drawdown => {
                    monitor.check_integrity()?;
                    let limits = &track.drawdown;
                    if let Some(change) = monitor.settle(limits, now) {
                        track_slot.publish(&monitor);
                        events.push(level_event(&ctx.track_id, &change, now));
                    }
                    layer::drawdown_verdict(
                        monitor.level(),
                        monitor.drawdown(),
                        limits,
                        monitor.state().level_reason.as_deref(),
                    )
                }
                RiskLayer::Exposure => {
                    let exposure = self.exposure.read();
                    exposure.check_integrity()?;
                    let check = exposure.check(ctx, &config.portfolio, instrument_cap, account_equity)?;
                    let verdict = layer::exposure_verdict(&check);
                    if !verdict.is_pass() {
                        events.push(RiskEvent::new(
                            RiskEventKind::ExposureLimitBreached,
                            Severity::Warning,
                            EventSource::L3,
                            ctx.instrument_id.clone(),
                            verdict.reason.clone().unwrap_or_default(),
                            now,
                        ));
                    }
                    verdict
                }
            };

            if !verdict.is_pass() {
                return Ok(blocked(verdict, notes, valid_until));
            }
            multiplier = multiplier.checked_mul(verdict.multiplier).ok_or_else(|| {
                RiskError::Arithmetic(format!("risk multiplier at {}", risk_layer))
            })?;
            if let Some(note) = verdict.describe() {
                notes.push(note);
            }
        }

        Ok(RiskDecision::new(RiskAction::Allow, multiplier, notes, valid_until))
    }

    // ------------------------------------------------------------------
    // Trade results and exposure
    // ------------------------------------------------------------------

    /// Record a trade result on L1 and L2.
    ///
    /// Idempotent per `trade_id`. The layers are updated independently, so a
    /// fault in one does not lose the other's update.
    pub fn record_trade(&self, ctx: &RiskContext, is_successful: bool, pnl: Decimal) -> RecordOutcome {
        let now = self.clock.now();
        if self.recorded.insert(ctx.trade_id, now).is_some() {
            debug!("[RISK] Duplicate trade result ignored: {}", ctx.trade_id);
            return RecordOutcome::Duplicate;
        }

        let config = self.config.load();
        let mut failures = Vec::new();

        let l1 = guarded(|| {
            let limits = &config.instrument(&ctx.instrument_id)?.circuit_breaker;
            let slot = self.breaker_slot(&ctx.instrument_id)?;
            let mut transitions = Vec::new();
            {
                let mut breaker = slot.breaker.write();
                if let Some(t) = breaker.poll(limits, now) {
                    transitions.push(t);
                }
                let result = breaker.record_trade(is_successful, pnl, limits, now);
                slot.publish(&breaker);
                transitions.extend(result?);
            }
            for transition in transitions {
                self.emit(breaker_event(&ctx.instrument_id, &transition, now));
            }
            Ok(())
        });
        if let Err(error) = l1 {
            failures.push(LayerFailure {
                layer: RiskLayer::CircuitBreaker,
                error,
            });
        }

        let l2 = guarded(|| {
            let limits = &config.track(&ctx.track_id)?.drawdown;
            let slot = self.track_slot(&ctx.track_id)?;
            let change = {
                let mut monitor = slot.monitor.write();
                let change = monitor.apply_pnl(pnl, limits, now)?;
                slot.publish(&monitor);
                change
            };
            if let Some(change) = change {
                self.emit(level_event(&ctx.track_id, &change, now));
            }
            Ok(())
        });
        if let Err(error) = l2 {
            failures.push(LayerFailure {
                layer: RiskLayer::Drawdown,
                error,
            });
        }

        for failure in &failures {
            self.emit(RiskEvent::new(
                RiskEventKind::RecordFault,
                Severity::Critical,
                failure.layer.source(),
                ctx.instrument_id.clone(),
                format!("trade {} not applied: {}", ctx.trade_id, failure.error),
                now,
            ));
        }

        self.check_portfolio_drawdown(now);

        match failures.len() {
            0 => RecordOutcome::Applied,
            1 => RecordOutcome::Partial { failures },
            _ => {
                self.recorded.remove(&ctx.trade_id);
                RecordOutcome::Failed { failures }
            }
        }
    }

    /// Apply a confirmed fill to portfolio exposure
    pub fn update_exposure(&self, ctx: &RiskContext) -> Result<()> {
        let now = self.clock.now();
        let config = self.config.load();
        let account_equity = self.account_equity()?;

        let result = guarded(|| {
            let mut exposure = self.exposure.write();
            exposure.apply_fill(ctx)?;
            Ok(exposure.state().total_notional)
        });

        match result {
            Ok(total) => {
                let ceiling = config
                    .portfolio
                    .max_account_leverage
                    .checked_mul(account_equity)
                    .unwrap_or(Decimal::MAX);
                if total > ceiling {
                    self.emit(RiskEvent::new(
                        RiskEventKind::ExposureLimitBreached,
                        Severity::Warning,
                        EventSource::L3,
                        ctx.instrument_id.clone(),
                        format!("total notional {} above leverage ceiling {} after fill", total, ceiling),
                        now,
                    ));
                }
                Ok(())
            }
            Err(e) => {
                self.emit(RiskEvent::new(
                    RiskEventKind::RecordFault,
                    Severity::Critical,
                    EventSource::L3,
                    ctx.instrument_id.clone(),
                    format!("fill for trade {} not applied: {}", ctx.trade_id, e),
                    now,
                ));
                Err(e)
            }
        }
    }

    /// Mark a track to a new equity value (e.g. from a mark-to-market feed)
    pub fn mark_equity(&self, track_id: &str, equity: Decimal) -> Result<()> {
        let now = self.clock.now();
        let config = self.config.load();
        let limits = &config.track(track_id)?.drawdown;
        let slot = self.track_slot(track_id)?;
        let change = {
            let mut monitor = slot.monitor.write();
            let change = monitor.update_equity(equity, limits, now)?;
            slot.publish(&monitor);
            change
        };
        if let Some(change) = change {
            self.emit(level_event(track_id, &change, now));
        }
        self.check_portfolio_drawdown(now);
        Ok(())
    }

    /// Sum of current equity over all tracks
    pub fn account_equity(&self) -> Result<Decimal> {
        self.tracks.values().try_fold(Decimal::ZERO, |acc, slot| {
            acc.checked_add(slot.monitor.read().state().current_equity)
                .ok_or_else(|| RiskError::Arithmetic("account equity".to_string()))
        })
    }

    fn check_portfolio_drawdown(&self, now: Timestamp) {
        let config = self.config.load();
        let Some(limit) = config.portfolio.max_account_drawdown else {
            return;
        };
        let totals = self.tracks.values().try_fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(peak, current), slot| {
                let monitor = slot.monitor.read();
                Some((
                    peak.checked_add(monitor.state().peak_equity)?,
                    current.checked_add(monitor.state().current_equity)?,
                ))
            },
        );
        let Some((peak, current)) = totals else {
            warn!("[RISK] Account drawdown check skipped: equity overflow");
            return;
        };
        if peak <= Decimal::ZERO {
            return;
        }
        let drawdown = (peak - current) / peak;
        if drawdown >= limit {
            let reason = format!(
                "account drawdown {:.2}% reached limit {:.2}%",
                drawdown * Decimal::ONE_HUNDRED,
                limit * Decimal::ONE_HUNDRED
            );
            if self
                .kill_switch
                .engage(KillReasonKind::PortfolioDrawdown, &reason, now)
            {
                self.emit(RiskEvent::new(
                    RiskEventKind::KillSwitchEngaged,
                    Severity::Critical,
                    EventSource::System,
                    "portfolio",
                    reason,
                    now,
                ));
            }
        }
    }

    // ------------------------------------------------------------------
    // Resets and overrides
    // ------------------------------------------------------------------

    /// Start a new trading day with every track at `starting_equity`.
    ///
    /// OPEN breakers move to HALF_OPEN, a drawdown-triggered kill switch is
    /// released and the idempotency ledger is cleared. Exposure carries over.
    pub fn reset_daily(&self, starting_equity: Decimal) -> Result<()> {
        if starting_equity <= Decimal::ZERO {
            return Err(RiskError::Config(crate::error::ConfigError::Invalid(format!(
                "starting equity must be positive, got {}",
                starting_equity
            ))));
        }
        let now = self.clock.now();
        info!("[RISK] Daily reset: starting equity {}", starting_equity);

        let mut reopened = 0;
        for (instrument_id, slot) in &self.breakers {
            let transition = {
                let mut breaker = slot.breaker.write();
                let transition = breaker.reset_daily();
                slot.publish(&breaker);
                transition
            };
            if let Some(transition) = transition {
                reopened += 1;
                self.emit(breaker_event(instrument_id, &transition, now));
            }
        }
        self.emit(RiskEvent::new(
            RiskEventKind::DailyReset,
            Severity::Info,
            EventSource::L1,
            "all",
            format!(
                "{} breakers reset, {} moved to HALF_OPEN",
                self.breakers.len(),
                reopened
            ),
            now,
        ));

        for track_id in self.tracks.keys() {
            self.reset_track_inner(track_id, starting_equity, now)?;
        }
        self.emit(RiskEvent::new(
            RiskEventKind::DailyReset,
            Severity::Info,
            EventSource::L2,
            "all",
            format!("{} tracks reset to equity {}", self.tracks.len(), starting_equity),
            now,
        ));

        let exposure = self.exposure.read().state().clone();
        self.emit(RiskEvent::new(
            RiskEventKind::DailyReset,
            Severity::Info,
            EventSource::L3,
            "portfolio",
            format!(
                "exposure carried over: {} notional across {} positions",
                exposure.total_notional, exposure.open_position_count
            ),
            now,
        ));

        if self.kill_switch.release_if(KillReasonKind::PortfolioDrawdown) {
            self.emit(RiskEvent::new(
                RiskEventKind::KillSwitchReleased,
                Severity::Info,
                EventSource::System,
                "portfolio",
                "drawdown kill switch released by daily reset",
                now,
            ));
        }

        self.recorded.clear();
        Ok(())
    }

    /// Reset a single track's drawdown state
    pub fn reset_track(&self, track_id: &str, starting_equity: Decimal) -> Result<()> {
        let now = self.clock.now();
        self.reset_track_inner(track_id, starting_equity, now)?;
        self.emit(RiskEvent::new(
            RiskEventKind::DailyReset,
            Severity::Info,
            EventSource::L2,
            track_id,
            format!("track reset to equity {}", starting_equity),
            now,
        ));
        Ok(())
    }

    fn reset_track_inner(&self, track_id: &str, starting_equity: Decimal, now: Timestamp) -> Result<()> {
        let slot = self.track_slot(track_id)?;
        let change = {
            let mut monitor = slot.monitor.write();
            let change = monitor.reset_daily(starting_equity);
            slot.publish(&monitor);
            change
        };
        if let Some(change) = change {
            self.emit(level_event(track_id, &change, now));
        }
        Ok(())
    }

    /// Operator override of a breaker to OPEN or CLOSED
    pub fn force_breaker(&self, instrument_id: &str, target: CircuitState, reason: &str) -> Result<()> {
        let now = self.clock.now();
        let slot = self.breaker_slot(instrument_id)?;
        let transition = {
            let mut breaker = slot.breaker.write();
            let transition = breaker.force(target, reason, now)?;
            slot.publish(&breaker);
            transition
        };
        self.emit(breaker_event(instrument_id, &transition, now));
        Ok(())
    }

    /// Ask for a breaker transition that only happens if its criteria are met.
    ///
    /// Refused requests return `RiskError::InvalidTransition` and change nothing.
    pub fn request_breaker_transition(&self, instrument_id: &str, target: CircuitState) -> Result<()> {
        let now = self.clock.now();
        let config = self.config.load();
        let limits = &config.instrument(instrument_id)?.circuit_breaker;
        let slot = self.breaker_slot(instrument_id)?;
        let transition = {
            let mut breaker = slot.breaker.write();
            let transition = breaker.request_transition(target, limits, now)?;
            slot.publish(&breaker);
            transition
        };
        if let Some(transition) = transition {
            self.emit(breaker_event(instrument_id, &transition, now));
        }
        Ok(())
    }

    pub fn engage_kill_switch(&self, reason: &str) {
        let now = self.clock.now();
        self.kill_switch.engage(KillReasonKind::Manual, reason, now);
        self.emit(RiskEvent::new(
            RiskEventKind::KillSwitchEngaged,
            Severity::Critical,
            EventSource::System,
            "portfolio",
            format!("manual: {}", reason),
            now,
        ));
    }

    pub fn release_kill_switch(&self) {
        if self.kill_switch.release() {
            self.emit(RiskEvent::new(
                RiskEventKind::KillSwitchReleased,
                Severity::Warning,
                EventSource::System,
                "portfolio",
                "kill switch released",
                self.clock.now(),
            ));
        }
    }

    /// Swap in a new configuration snapshot
    pub fn reload_config(&self, config: RiskConfig) -> Result<u64> {
        let version = self.config.swap(config)?;
        self.emit(RiskEvent::new(
            RiskEventKind::ConfigReloaded,
            Severity::Info,
            EventSource::System,
            "config",
            format!("risk config v{} active", version),
            self.clock.now(),
        ));
        Ok(version)
    }

    /// Keep the kill switch in sync with its sentinel file until shutdown.
    ///
    /// Returns `None` when no file is configured.
    pub fn spawn_kill_switch_sync(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let config = self.config.load();
        let path = config.kill_switch.file_path.clone()?;
        let period = std::time::Duration::from_millis(config.kill_switch.poll_interval_ms.max(1));
        let manager = Arc::clone(self);

        Some(tokio::spawn(async move {
            info!("[KILL] Kill switch file sync started: {}", path.display());
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => {
                        let now = manager.clock.now();
                        match manager.kill_switch.sync_with_file(&path, now).await {
                            Ok(Some(FileSync::EngagedExternally { reason })) => {
                                manager.emit(RiskEvent::new(
                                    RiskEventKind::KillSwitchEngaged,
                                    Severity::Critical,
                                    EventSource::System,
                                    "portfolio",
                                    reason,
                                    now,
                                ));
                            }
                            Ok(Some(FileSync::ReleasedExternally)) => {
                                manager.emit(RiskEvent::new(
                                    RiskEventKind::KillSwitchReleased,
                                    Severity::Warning,
                                    EventSource::System,
                                    "portfolio",
                                    "released by another process",
                                    now,
                                ));
                            }
                            Ok(Some(sync)) => debug!("[KILL] {:?} {}", sync, path.display()),
                            Ok(None) => {}
                            Err(e) => warn!("[KILL] Sentinel file sync failed: {}", e),
                        }
                    }
                }
            }
            // Last pass so a release right before shutdown reaches the file
            if let Err(e) = manager.kill_switch.sync_with_file(&path, manager.clock.now()).await {
                warn!("[KILL] Final sentinel file sync failed: {}", e);
            }
            info!("[KILL] Kill switch file sync stopped");
        }))
    }

    // ------------------------------------------------------------------
    // Status, checkpoints and recovery
    // ------------------------------------------------------------------

    /// Point-in-time view of every layer
    pub fn get_risk_status(&self) -> RiskStatusSnapshot {
        let now = self.clock.now();
        let config = self.config.load();

        let breakers = self
            .breakers
            .iter()
            .map(|(id, slot)| {
                let breaker = slot.breaker.read();
                let state = breaker.state();
                let (effective_state, is_safe) = match config.instrument(id) {
                    Ok(cfg) => (
                        breaker.effective_state(&cfg.circuit_breaker, now),
                        breaker.is_safe(&cfg.circuit_breaker, now),
                    ),
                    Err(_) => (state.state, false),
                };
                let status = BreakerStatus {
                    track_id: slot.track_id.clone(),
                    state: state.state,
                    effective_state,
                    is_safe,
                    consecutive_losses: state.consecutive_losses,
                    cumulative_loss: state.cumulative_loss,
                    half_open_probe_count: state.half_open_probe_count,
                    opened_at: state.opened_at,
                    reason: state.last_reason.clone(),
                };
                (id.clone(), status)
            })
            .collect();

        let mut account_equity = Decimal::ZERO;
        let tracks = self
            .tracks
            .iter()
            .map(|(id, slot)| {
                let monitor = slot.monitor.read();
                let state = monitor.state();
                account_equity += state.current_equity;
                let status = TrackStatus {
                    risk_level: state.risk_level,
                    peak_equity: state.peak_equity,
                    current_equity: state.current_equity,
                    starting_equity: state.starting_equity,
                    daily_pnl: state.daily_pnl,
                    drawdown: state.drawdown(),
                    downgrade_pending: state.downgrade_pending_since.is_some(),
                    reason: state.level_reason.clone(),
                };
                (id.clone(), status)
            })
            .collect();

        let exposure = self.exposure.read().state().clone();
        let leverage = (account_equity > Decimal::ZERO)
            .then(|| exposure.total_notional / account_equity);

        RiskStatusSnapshot {
            taken_at: now,
            config_version: config.version,
            kill_switch: self.kill_switch.status(),
            breakers,
            tracks,
            exposure: ExposureStatus {
                total_notional: exposure.total_notional,
                per_instrument_notional: exposure.per_instrument_notional,
                open_position_count: exposure.open_position_count,
                account_equity,
                leverage,
            },
        }
    }

    /// One checkpoint per breaker, per track and one for the portfolio
    pub fn checkpoint(&self) -> Vec<CheckpointRecord> {
        let now = self.clock.now();
        let version = self.checkpoint_version.fetch_add(1, Ordering::SeqCst) + 1;
        let mut records = Vec::with_capacity(self.breakers.len() + self.tracks.len() + 1);

        for (id, slot) in &self.breakers {
            records.push(CheckpointRecord::new(
                version,
                now,
                CheckpointBody::Breaker {
                    instrument_id: id.clone(),
                    state: slot.breaker.read().state().clone(),
                },
            ));
        }
        for (id, slot) in &self.tracks {
            records.push(CheckpointRecord::new(
                version,
                now,
                CheckpointBody::Track {
                    track_id: id.clone(),
                    state: slot.monitor.read().state().clone(),
                },
            ));
        }
        records.push(CheckpointRecord::new(
            version,
            now,
            CheckpointBody::Exposure(self.exposure.read().state().clone()),
        ));
        records
    }

    /// Checkpoints for one instrument's breaker and its track
    pub fn checkpoint_instrument(&self, instrument_id: &str) -> Result<Vec<CheckpointRecord>> {
        let now = self.clock.now();
        let slot = self.breaker_slot(instrument_id)?;
        let track = self.track_slot(&slot.track_id)?;
        let version = self.checkpoint_version.fetch_add(1, Ordering::SeqCst) + 1;

        let breaker_state = slot.breaker.read().state().clone();
        let track_state = track.monitor.read().state().clone();
        Ok(vec![
            CheckpointRecord::new(
                version,
                now,
                CheckpointBody::Breaker {
                    instrument_id: instrument_id.to_string(),
                    state: breaker_state,
                },
            ),
            CheckpointRecord::new(
                version,
                now,
                CheckpointBody::Track {
                    track_id: slot.track_id.clone(),
                    state: track_state,
                },
            ),
        ])
    }

    /// Restore state from checkpoints.
    ///
    /// For each subject the highest version wins. Records older than
    /// `max_age` are skipped as stale; records that fail the integrity check
    /// or name an unknown subject are rejected. Rejected and stale subjects
    /// keep their current state.
    pub fn restore(&self, records: &[CheckpointRecord], max_age: Duration) -> RestoreReport {
        let now = self.clock.now();
        let mut latest: BTreeMap<String, &CheckpointRecord> = BTreeMap::new();
        for record in records {
            let key = match &record.body {
                CheckpointBody::Breaker { instrument_id, .. } => format!("breaker:{}", instrument_id),
                CheckpointBody::Track { track_id, .. } => format!("track:{}", track_id),
                CheckpointBody::Exposure(_) => "exposure".to_string(),
            };
            let newer = latest
                .get(&key)
                .is_none_or(|existing| existing.version < record.version);
            if newer {
                latest.insert(key, record);
            }
        }

        let mut report = RestoreReport::default();
        for (key, record) in latest {
            if record.is_stale(now, max_age) {
                warn!("[RISK] Stale checkpoint skipped: {} v{} taken {}", key, record.version, record.taken_at);
                report.stale += 1;
                continue;
            }
            match self.apply_checkpoint(record) {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    warn!("[RISK] Checkpoint rejected: {} v{}: {}", key, record.version, e);
                    report.rejected += 1;
                }
            }
            self.checkpoint_version
                .fetch_max(record.version, Ordering::SeqCst);
        }

        let severity = if report.rejected > 0 {
            Severity::Warning
        } else {
            Severity::Info
        };
        self.emit(RiskEvent::new(
            RiskEventKind::StateRestored,
            severity,
            EventSource::System,
            "checkpoint",
            format!(
                "{} applied, {} stale, {} rejected",
                report.applied, report.stale, report.rejected
            ),
            now,
        ));
        report
    }

    fn apply_checkpoint(&self, record: &CheckpointRecord) -> Result<()> {
        match &record.body {
            CheckpointBody::Breaker {
                instrument_id,
                state,
            } => {
                let slot = self.breaker_slot(instrument_id)?;
                let mut breaker = slot.breaker.write();
                breaker.restore(state.clone())?;
                slot.publish(&breaker);
            }
            CheckpointBody::Track { track_id, state } => {
                let slot = self.track_slot(track_id)?;
                let mut monitor = slot.monitor.write();
                monitor.restore(state.clone())?;
                slot.publish(&monitor);
            }
            CheckpointBody::Exposure(state) => {
                self.exposure.write().restore(state.clone())?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn breaker_slot(&self, instrument_id: &str) -> Result<&BreakerSlot> {
        self.breakers
            .get(instrument_id)
            .ok_or_else(|| RiskError::UnknownInstrument(instrument_id.to_string()))
    }

    fn track_slot(&self, track_id: &str) -> Result<&TrackSlot> {
        self.tracks
            .get(track_id)
            .ok_or_else(|| RiskError::UnknownTrack(track_id.to_string()))
    }

    fn emit(&self, event: RiskEvent) {
        match event.severity {
            Severity::Critical => error!("[RISK] {}", event),
            Severity::Warning => warn!("[RISK] {}", event),
            Severity::Info => info!("[RISK] {}", event),
        }
        self.sink.emit(event);
    }
}

/// Decision for the first blocking verdict, with earlier notes behind it
fn blocked(verdict: Verdict, notes: Vec<String>, valid_until: Timestamp) -> RiskDecision {
    let mut reasons = Vec::with_capacity(notes.len() + 1);
    if let Some(reason) = verdict.describe() {
        reasons.push(reason);
    }
    reasons.extend(notes);
    RiskDecision::new(verdict.action, verdict.multiplier, reasons, valid_until)
}

fn breaker_event(instrument_id: &str, transition: &BreakerTransition, now: Timestamp) -> RiskEvent {
    let (kind, severity) = match transition {
        BreakerTransition::Opened { .. } => (RiskEventKind::BreakerOpened, Severity::Critical),
        BreakerTransition::Reopened { .. } => (RiskEventKind::BreakerReopened, Severity::Critical),
        BreakerTransition::HalfOpened { .. } => (RiskEventKind::BreakerHalfOpen, Severity::Warning),
        BreakerTransition::Closed { .. } => (RiskEventKind::BreakerClosed, Severity::Info),
        BreakerTransition::Forced { .. } => (RiskEventKind::ManualOverride, Severity::Warning),
    };
    RiskEvent::new(
        kind,
        severity,
        EventSource::L1,
        instrument_id,
        format!("-> {}: {}", transition.to_state(), transition.reason()),
        now,
    )
}

fn level_event(track_id: &str, change: &LevelChange, now: Timestamp) -> RiskEvent {
    let (kind, severity) = if change.is_raise() {
        let severity = if change.to >= RiskLevel::Critical {
            Severity::Critical
        } else {
            Severity::Warning
        };
        (RiskEventKind::RiskLevelRaised, severity)
    } else {
        (RiskEventKind::RiskLevelLowered, Severity::Info)
    };
    RiskEvent::new(
        kind,
        severity,
        EventSource::L2,
        track_id,
        format!("{} -> {}: {}", change.from, change.to, change.reason),
        now,
    )
}

/// Run `f`, turning a panic into `RiskError::Internal`
fn guarded<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(RiskError::Internal(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic with non-string payload".to_string()
    }
}
