//! Instrument Loop - one risk-gated trading loop per instrument
//!
//! Per tick:
//! 1. Pre-signal gate (`is_trading_allowed`, lock-free)
//! 2. Signal evaluation
//! 3. **Gate 1**: `validate_order` on the candidate
//! 4. Order construction (size scaled by the risk multiplier)
//! 5. **Gate 2**: `validate_order` again right before dispatch
//! 6. Dispatch, then `update_exposure` on a fill and `record_trade` on a
//!    fill or rejection
//!
//! Gate 2 exists because another loop may have moved shared risk state
//! (e.g. raised a portfolio HALT) since gate 1.

use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use sentinel_core::{
    InstrumentId, PersistRecord, Price, RiskAction, RiskContext, RiskDecision, Side, Tick, TrackId,
};
use sentinel_ports::{OrderExecutor, OrderIntent, OrderRequest, RecordSink, SignalGenerator};
use sentinel_risk_manager::{RecordOutcome, RiskManager};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Per-loop counters, returned when the loop stops
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStats {
    pub ticks: u64,
    /// Crossed or empty books
    pub invalid_ticks: u64,
    /// Intents dropped by the pre-signal gate
    pub gated: u64,
    pub signals: u64,
    pub gate1_rejected: u64,
    pub gate2_rejected: u64,
    /// Decision expired before dispatch
    pub stale_decisions: u64,
    pub dispatched: u64,
    pub filled: u64,
    pub exchange_rejected: u64,
    /// Execution outcome unknown (not recorded)
    pub execution_errors: u64,
    pub recorded: u64,
    pub checkpoints_flushed: u64,
}

impl LoopStats {
    pub fn merge(&mut self, other: &LoopStats) {
        self.ticks += other.ticks;
        self.invalid_ticks += other.invalid_ticks;
        self.gated += other.gated;
        self.signals += other.signals;
        self.gate1_rejected += other.gate1_rejected;
        self.gate2_rejected += other.gate2_rejected;
        self.stale_decisions += other.stale_decisions;
        self.dispatched += other.dispatched;
        self.filled += other.filled;
        self.exchange_rejected += other.exchange_rejected;
        self.execution_errors += other.execution_errors;
        self.recorded += other.recorded;
        self.checkpoints_flushed += other.checkpoints_flushed;
    }
}

/// Candidate that passed gate 1
#[derive(Debug, Clone)]
pub struct Candidate {
    pub ctx: RiskContext,
    pub decision: RiskDecision,
    pub price: Price,
}

/// Order that passed gate 2 and is ready to dispatch
#[derive(Debug, Clone)]
pub struct GatedOrder {
    pub ctx: RiskContext,
    pub decision: RiskDecision,
    pub request: OrderRequest,
}

pub struct InstrumentLoop {
    instrument_id: InstrumentId,
    track_id: TrackId,
    risk: Arc<RiskManager>,
    signal: Box<dyn SignalGenerator>,
    executor: Arc<dyn OrderExecutor>,
    ticks: mpsc::Receiver<Tick>,
    records: Option<Arc<dyn RecordSink>>,
    stats: LoopStats,
}

impl InstrumentLoop {
    pub fn new(
        instrument_id: impl Into<InstrumentId>,
        track_id: impl Into<TrackId>,
        risk: Arc<RiskManager>,
        signal: Box<dyn SignalGenerator>,
        executor: Arc<dyn OrderExecutor>,
        ticks: mpsc::Receiver<Tick>,
    ) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            track_id: track_id.into(),
            risk,
            signal,
            executor,
            ticks,
            records: None,
            stats: LoopStats::default(),
        }
    }

    /// Checkpoints are flushed here on shutdown
    pub fn with_record_sink(mut self, records: Arc<dyn RecordSink>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Run until the tick stream closes or cancellation is signalled.
    ///
    /// Cancellation is observed between ticks only, so a tick is always
    /// processed to completion.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> LoopStats {
        info!(
            "[LOOP:{}] Started (track {}, signal {})",
            self.instrument_id,
            self.track_id,
            self.signal.name()
        );

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("[LOOP:{}] Cancelled", self.instrument_id);
                        break;
                    }
                }

                tick = self.ticks.recv() => match tick {
                    Some(tick) => self.process_tick(&tick).await,
                    None => {
                        info!("[LOOP:{}] Tick stream closed", self.instrument_id);
                        break;
                    }
                }
            }
        }

        self.flush_state();
        info!(
            "[LOOP:{}] Stopped: {} ticks, {} dispatched, {} filled",
            self.instrument_id, self.stats.ticks, self.stats.dispatched, self.stats.filled
        );
        self.stats
    }

    pub async fn process_tick(&mut self, tick: &Tick) {
        self.stats.ticks += 1;
        if !tick.is_valid() {
            self.stats.invalid_ticks += 1;
            debug!("[LOOP:{}] Invalid tick {} / {}", self.instrument_id, tick.bid, tick.ask);
            return;
        }

        let allowed = self.risk.is_trading_allowed(&self.instrument_id, &self.track_id);

        // Signals see every tick; a closed gate only lets reducing intents through
        let Some(intent) = self.signal.on_tick(tick) else {
            return;
        };
        self.stats.signals += 1;
        if !allowed && !intent.reduces_position {
            self.stats.gated += 1;
            return;
        }

        let Some(candidate) = self.gate_one(tick, &intent) else {
            return;
        };
        let Some(order) = self.gate_two(candidate) else {
            return;
        };
        self.dispatch(order).await;
    }

    /// Gate 1: validate the unscaled candidate
    pub fn gate_one(&mut self, tick: &Tick, intent: &OrderIntent) -> Option<Candidate> {
        let price = match intent.side {
            Side::Buy => tick.ask,
            Side::Sell => tick.bid,
        };
        let Some(notional) = intent.size.checked_mul(price) else {
            warn!("[LOOP:{}] Notional overflow for size {}", self.instrument_id, intent.size);
            self.stats.gate1_rejected += 1;
            return None;
        };

        let mut ctx = RiskContext::new(
            self.instrument_id.clone(),
            self.track_id.clone(),
            intent.side,
            intent.size,
            notional,
            self.risk.now(),
        );
        if intent.reduces_position {
            ctx = ctx.reducing();
        }

        let decision = self.risk.validate_order(&ctx);
        if !decision.permits(&ctx) {
            self.stats.gate1_rejected += 1;
            debug!(
                "[LOOP:{}] Gate 1 {}: {}",
                self.instrument_id,
                decision.action,
                decision.reason_chain()
            );
            return None;
        }
        Some(Candidate { ctx, decision, price })
    }

    /// Build the order from a gate-1 candidate and re-validate it.
    ///
    /// The dispatched size is the candidate size times the smaller of the two
    /// gates' multipliers.
    pub fn gate_two(&mut self, candidate: Candidate) -> Option<GatedOrder> {
        let Candidate {
            ctx,
            decision: first,
            price,
        } = candidate;
        let base_size = ctx.proposed_size;

        let size = scaled_size(base_size, &first);
        if size <= Decimal::ZERO {
            self.stats.gate1_rejected += 1;
            return None;
        }
        let order_ctx = ctx.resized(size, size * price, self.risk.now());

        let second = self.risk.validate_order(&order_ctx);
        if !second.permits(&order_ctx) {
            self.stats.gate2_rejected += 1;
            info!(
                "[LOOP:{}] Gate 2 {} after passing gate 1: {}",
                self.instrument_id,
                second.action,
                second.reason_chain()
            );
            return None;
        }
        if !second.is_valid_at(self.risk.now()) {
            self.stats.stale_decisions += 1;
            return None;
        }

        let order_ctx = if second.is_allowed() && second.risk_multiplier < first.risk_multiplier {
            let size = scaled_size(base_size, &second);
            if size <= Decimal::ZERO {
                self.stats.gate2_rejected += 1;
                return None;
            }
            order_ctx.resized(size, size * price, order_ctx.timestamp)
        } else {
            order_ctx
        };

        let request = OrderRequest {
            trade_id: order_ctx.trade_id,
            instrument_id: self.instrument_id.clone(),
            side: order_ctx.side,
            size: order_ctx.proposed_size,
            limit_price: price,
            reduce_only: second.action != RiskAction::Allow,
        };
        Some(GatedOrder {
            ctx: order_ctx,
            decision: second,
            request,
        })
    }

    async fn dispatch(&mut self, order: GatedOrder) {
        let GatedOrder { ctx, request, .. } = order;
        self.stats.dispatched += 1;
        debug!(
            "[LOOP:{}] Dispatching {} {} @ {}",
            self.instrument_id, request.side, request.size, request.limit_price
        );

        match self.executor.execute(&request).await {
            Ok(report) if report.is_filled() => {
                self.stats.filled += 1;
                let fill_price = report.avg_price.unwrap_or(request.limit_price);
                let fill_notional = report
                    .filled_size
                    .checked_mul(fill_price)
                    .unwrap_or(ctx.proposed_notional);
                let fill = ctx.resized(report.filled_size, fill_notional, self.risk.now());
                if let Err(e) = self.risk.update_exposure(&fill) {
                    error!("[LOOP:{}] Fill {} not applied to exposure: {}", self.instrument_id, ctx.trade_id, e);
                }
                self.record(&ctx, report.realized_pnl >= Decimal::ZERO, report.realized_pnl);
            }
            Ok(report) => {
                self.stats.exchange_rejected += 1;
                warn!("[LOOP:{}] Order {} rejected: {:?}", self.instrument_id, ctx.trade_id, report.status);
                self.record(&ctx, false, Decimal::ZERO);
            }
            Err(e) => {
                self.stats.execution_errors += 1;
                warn!(
                    "[LOOP:{}] Execution failed for {}, outcome unknown: {}",
                    self.instrument_id, ctx.trade_id, e
                );
            }
        }
    }

    fn record(&mut self, ctx: &RiskContext, is_successful: bool, pnl: Decimal) {
        match self.risk.record_trade(ctx, is_successful, pnl) {
            RecordOutcome::Applied => self.stats.recorded += 1,
            RecordOutcome::Duplicate => {
                debug!("[LOOP:{}] Trade {} already recorded", self.instrument_id, ctx.trade_id)
            }
            RecordOutcome::Partial { failures } => {
                self.stats.recorded += 1;
                warn!(
                    "[LOOP:{}] Trade {} partially recorded: {:?}",
                    self.instrument_id, ctx.trade_id, failures
                );
            }
            RecordOutcome::Failed { failures } => {
                error!(
                    "[LOOP:{}] Trade {} not recorded: {:?}",
                    self.instrument_id, ctx.trade_id, failures
                );
            }
        }
    }

    /// Push checkpoints of this loop's breaker and track to the record sink
    pub fn flush_state(&mut self) {
        let Some(records) = &self.records else {
            return;
        };
        match self.risk.checkpoint_instrument(&self.instrument_id) {
            Ok(checkpoints) => {
                self.stats.checkpoints_flushed += checkpoints.len() as u64;
                for checkpoint in checkpoints {
                    records.enqueue(PersistRecord::Checkpoint(checkpoint));
                }
            }
            Err(e) => error!("[LOOP:{}] Checkpoint failed: {}", self.instrument_id, e),
        }
    }
}

/// `size` scaled by an ALLOW decision's multiplier; other actions keep the size
fn scaled_size(size: Decimal, decision: &RiskDecision) -> Decimal {
    if decision.is_allowed() {
        (size * decision.risk_multiplier).round_dp(8)
    } else {
        size
    }
}
