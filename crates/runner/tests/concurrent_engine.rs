//! Concurrent Trading Engine Integration Tests
//!
//! Tests the engine with several instrument loops sharing one RiskManager:
//! - Breaker isolation between instruments
//! - Kill switch and portfolio HALT visibility across loops
//! - Half-open probe sizing
//! - Tick backpressure
//! - Shutdown checkpoint flushing
//! - Full runtime wiring with file persistence

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sentinel_clock::ManualClock;
use sentinel_core::{Alert, CircuitState, PersistRecord, RiskEvent, RiskEventKind, Side, Tick};
use sentinel_events::{JsonLinesStore, PersistenceQueue};
use sentinel_ports::{
    Clock, EventSink, ExecutionError, ExecutionReport, ExecutionStatus, Notifier, NotifyError,
    OrderExecutor, OrderIntent, OrderRequest, SignalGenerator,
};
use sentinel_risk_manager::{InstrumentConfig, PortfolioLimits, RiskConfig, RiskManager, TrackConfig};
use sentinel_runner::{
    ConcurrentTradingEngine, EngineConfig, EngineError, RuntimeConfig, SentinelRuntime,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const FX: [&str; 4] = ["EUR-USD", "GBP-USD", "USD-JPY", "AUD-USD"];

// ============================================================================
// Test doubles
// ============================================================================

#[derive(Default)]
struct CollectingSink(Mutex<Vec<RiskEvent>>);

impl EventSink for CollectingSink {
    fn emit(&self, event: RiskEvent) {
        self.0.lock().push(event);
    }
}

/// Buys a fixed size on every tick
struct AlwaysBuy(Decimal);

impl SignalGenerator for AlwaysBuy {
    fn on_tick(&mut self, _tick: &Tick) -> Option<OrderIntent> {
        Some(OrderIntent {
            side: Side::Buy,
            size: self.0,
            reduces_position: false,
        })
    }

    fn name(&self) -> &str {
        "AlwaysBuy"
    }
}

/// Fills every order; realised PnL comes from a per-instrument script,
/// then `default_pnl` once the script runs out
struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, VecDeque<Decimal>>>,
    default_pnl: HashMap<String, Decimal>,
    orders: Mutex<Vec<OrderRequest>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedExecutor {
    fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_pnl: HashMap::new(),
            orders: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    fn with_pnl(mut self, instrument_id: &str, pnl: Decimal) -> Self {
        self.default_pnl.insert(instrument_id.to_string(), pnl);
        self
    }

    fn with_script(self, instrument_id: &str, pnls: &[Decimal]) -> Self {
        self.scripts
            .lock()
            .insert(instrument_id.to_string(), pnls.iter().copied().collect());
        self
    }

    fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn orders_for(&self, instrument_id: &str) -> Vec<OrderRequest> {
        self.orders
            .lock()
            .iter()
            .filter(|o| o.instrument_id == instrument_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl OrderExecutor for ScriptedExecutor {
    async fn execute(&self, order: &OrderRequest) -> Result<ExecutionReport, ExecutionError> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.map_err(|_| ExecutionError::Timeout)?;
        }
        self.orders.lock().push(order.clone());
        let scripted = self
            .scripts
            .lock()
            .get_mut(&order.instrument_id)
            .and_then(|s| s.pop_front());
        let pnl = scripted
            .or_else(|| self.default_pnl.get(&order.instrument_id).copied())
            .unwrap_or(Decimal::ZERO);
        Ok(ExecutionReport {
            trade_id: order.trade_id,
            status: ExecutionStatus::Filled,
            filled_size: order.size,
            avg_price: Some(order.limit_price),
            realized_pnl: pnl,
        })
    }
}

#[derive(Default)]
struct RecordingNotifier(Mutex<Vec<Alert>>);

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.0.lock().push(alert.clone());
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn fx_config() -> RiskConfig {
    let mut config = RiskConfig::new().with_track("fx", TrackConfig::new(dec!(1_000_000)));
    for id in FX {
        config = config.with_instrument(id, InstrumentConfig::new("fx"));
    }
    config
}

fn tick(instrument_id: &str, clock: &ManualClock) -> Tick {
    Tick::new(instrument_id, dec!(1.1000), dec!(1.1002), dec!(1_000_000), clock.now())
}

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

fn engine(
    config: RiskConfig,
    clock: Arc<ManualClock>,
    executor: Arc<ScriptedExecutor>,
    tick_buffer: usize,
) -> ConcurrentTradingEngine {
    let risk = Arc::new(RiskManager::new(config, clock, Arc::new(CollectingSink::default())).unwrap());
    ConcurrentTradingEngine::new(risk, executor, EngineConfig { tick_buffer })
}

// ============================================================================
// Tests
// ============================================================================

/// A losing instrument trips its own breaker; the others keep trading
#[tokio::test]
async fn test_losing_instrument_trips_only_its_breaker() {
    let _ = env_logger::try_init();
    let clock = ManualClock::new(None);
    let mut executor = ScriptedExecutor::new().with_pnl("EUR-USD", dec!(-10));
    for id in &FX[1..] {
        executor = executor.with_pnl(id, dec!(5));
    }
    let executor = Arc::new(executor);
    let mut engine = engine(fx_config(), clock.clone(), executor.clone(), 64);
    engine.spawn_all(|_| Box::new(AlwaysBuy(dec!(1000)))).unwrap();

    for _ in 0..10 {
        for id in FX {
            engine.submit_tick(tick(id, &clock)).unwrap();
        }
    }

    let risk = engine.risk().clone();
    let report = engine.shutdown().await;

    let eur = &report.loops["EUR-USD"];
    assert_eq!(eur.ticks, 10);
    assert_eq!(eur.filled, 3, "breaker opens after the third loss");
    assert_eq!(eur.gated, 7);

    for id in &FX[1..] {
        assert_eq!(report.loops[*id].filled, 10, "{} should be unaffected", id);
    }

    let status = risk.get_risk_status();
    assert_eq!(status.breaker("EUR-USD").unwrap().state, CircuitState::Open);
    for id in &FX[1..] {
        assert_eq!(status.breaker(id).unwrap().state, CircuitState::Closed);
    }
    assert!(status.exposure.total_notional > Decimal::ZERO);
    assert_eq!(status.exposure.open_position_count, 4);
}

/// An engaged kill switch blocks every loop at the pre-signal gate
#[tokio::test]
async fn test_kill_switch_blocks_every_loop() {
    let clock = ManualClock::new(None);
    let executor = Arc::new(ScriptedExecutor::new());
    let mut engine = engine(fx_config(), clock.clone(), executor.clone(), 64);
    engine.spawn_all(|_| Box::new(AlwaysBuy(dec!(1000)))).unwrap();
    engine.risk().engage_kill_switch("operator halt");

    for _ in 0..5 {
        for id in FX {
            engine.submit_tick(tick(id, &clock)).unwrap();
        }
    }
    let report = engine.shutdown().await;

    let total = report.total();
    assert_eq!(total.dispatched, 0);
    assert_eq!(total.gated, 20);
    assert!(executor.orders.lock().is_empty());
}

/// A portfolio HALT raised by one loop is seen by the other loops' next evaluation
#[tokio::test]
async fn test_portfolio_halt_from_one_loop_blocks_others() {
    let clock = ManualClock::new(None);
    let config = RiskConfig::new()
        .with_track("fx", TrackConfig::new(dec!(1_000_000)))
        .with_track("rates", TrackConfig::new(dec!(1_000_000)))
        .with_instrument("EUR-USD", InstrumentConfig::new("fx"))
        .with_instrument("UST-10Y", InstrumentConfig::new("rates"))
        .with_instrument("BUND-10Y", InstrumentConfig::new("rates"))
        .with_portfolio(PortfolioLimits {
            max_account_drawdown: Some(dec!(0.005)),
            ..Default::default()
        });
    let executor = Arc::new(ScriptedExecutor::new().with_pnl("EUR-USD", dec!(-15_000)));
    let mut engine = engine(config, clock.clone(), executor.clone(), 64);
    engine.spawn_all(|_| Box::new(AlwaysBuy(dec!(1000)))).unwrap();

    engine.submit_tick(tick("EUR-USD", &clock)).unwrap();
    let risk = engine.risk().clone();
    assert!(wait_until(|| risk.kill_switch().is_engaged()).await);

    for _ in 0..3 {
        engine.submit_tick(tick("UST-10Y", &clock)).unwrap();
        engine.submit_tick(tick("BUND-10Y", &clock)).unwrap();
    }
    let report = engine.shutdown().await;

    assert_eq!(report.loops["EUR-USD"].filled, 1);
    assert_eq!(report.loops["UST-10Y"].dispatched, 0);
    assert_eq!(report.loops["BUND-10Y"].dispatched, 0);

    // The rates track itself is healthy; only the kill switch stopped it
    let status = risk.get_risk_status();
    assert!(status.kill_switch.engaged);
    assert!(status.track("rates").unwrap().drawdown.is_zero());
}

/// After the cooldown, probe trades go out at the probe size and three
/// winning probes close the breaker
#[tokio::test]
async fn test_half_open_probes_are_scaled_then_close() {
    let clock = ManualClock::new(None);
    let executor = Arc::new(
        ScriptedExecutor::new().with_script("EUR-USD", &[dec!(-10), dec!(-10), dec!(-10)]),
    );
    let mut engine = engine(fx_config(), clock.clone(), executor.clone(), 64);
    engine.spawn_instrument("EUR-USD", Box::new(AlwaysBuy(dec!(1000)))).unwrap();

    for _ in 0..3 {
        engine.submit_tick(tick("EUR-USD", &clock)).unwrap();
    }
    let risk = engine.risk().clone();
    assert!(wait_until(|| !risk.is_safe("EUR-USD")).await);

    clock.advance_ms(300_001);
    for expected in 4..=6 {
        engine.submit_tick(tick("EUR-USD", &clock)).unwrap();
        assert!(wait_until(|| executor.orders_for("EUR-USD").len() == expected).await);
    }

    let orders = executor.orders_for("EUR-USD");
    assert_eq!(orders[0].size, dec!(1000));
    for probe in &orders[3..6] {
        assert_eq!(probe.size, dec!(250));
    }

    engine.submit_tick(tick("EUR-USD", &clock)).unwrap();
    assert!(wait_until(|| executor.orders_for("EUR-USD").len() == 7).await);
    assert_eq!(executor.orders_for("EUR-USD")[6].size, dec!(1000));

    engine.shutdown().await;
    assert_eq!(
        risk.get_risk_status().breaker("EUR-USD").unwrap().state,
        CircuitState::Closed
    );
}

/// A full tick queue drops ticks instead of blocking the feed
#[tokio::test]
async fn test_backpressure_drops_ticks() {
    let clock = ManualClock::new(None);
    let gate = Arc::new(Semaphore::new(0));
    let executor = Arc::new(ScriptedExecutor::new().gated(gate.clone()));
    let mut engine = engine(fx_config(), clock.clone(), executor.clone(), 1);
    engine.spawn_instrument("EUR-USD", Box::new(AlwaysBuy(dec!(1000)))).unwrap();

    let results: Vec<_> = (0..3)
        .map(|_| engine.submit_tick(tick("EUR-USD", &clock)))
        .collect();
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(EngineError::Backpressure(id)) if id == "EUR-USD"))
    );
    assert!(engine.dropped_ticks() >= 1);

    gate.add_permits(10);
    let report = engine.shutdown().await;
    assert!(report.dropped_ticks >= 1);
    // At most one tick in flight plus one buffered
    assert!(report.loops["EUR-USD"].ticks <= 2);
}

#[tokio::test]
async fn test_spawn_and_routing_errors() {
    let clock = ManualClock::new(None);
    let mut engine = engine(fx_config(), clock.clone(), Arc::new(ScriptedExecutor::new()), 8);

    assert_eq!(
        engine.spawn_instrument("XAU-USD", Box::new(AlwaysBuy(dec!(1)))),
        Err(EngineError::UnknownInstrument("XAU-USD".to_string()))
    );
    assert_eq!(
        engine.submit_tick(tick("EUR-USD", &clock)),
        Err(EngineError::NotRunning("EUR-USD".to_string()))
    );

    engine.spawn_instrument("EUR-USD", Box::new(AlwaysBuy(dec!(1)))).unwrap();
    assert_eq!(
        engine.spawn_instrument("EUR-USD", Box::new(AlwaysBuy(dec!(1)))),
        Err(EngineError::AlreadyRunning("EUR-USD".to_string()))
    );
    assert_eq!(engine.instruments(), vec!["EUR-USD"]);
    engine.cancel().await;
}

/// Cancelled loops flush their breaker and track; the engine adds a full checkpoint
#[tokio::test]
async fn test_cancel_flushes_checkpoints() {
    let clock = ManualClock::new(None);
    let queue = Arc::new(PersistenceQueue::new(1_000, clock.clone()));
    let mut engine = engine(fx_config(), clock.clone(), Arc::new(ScriptedExecutor::new()), 8)
        .with_record_sink(queue.clone());
    engine.spawn_all(|_| Box::new(AlwaysBuy(dec!(1000)))).unwrap();

    let report = engine.cancel().await;

    // 4 loops x (breaker + track), then 4 breakers + 1 track + exposure
    assert_eq!(report.total().checkpoints_flushed, 8);
    assert_eq!(report.final_checkpoint, 6);
    let records = queue.drain(100);
    assert_eq!(records.len(), 14);
    assert!(records.iter().all(|r| matches!(r, PersistRecord::Checkpoint(_))));
}

/// Runtime end to end: breaker trip reaches the notifier and the event file
#[tokio::test]
async fn test_runtime_persists_events_and_checkpoints() {
    let _ = env_logger::try_init();
    let clock = ManualClock::new(None);
    let path = std::env::temp_dir().join(format!("sentinel-runtime-{}.jsonl", std::process::id()));
    let _ = tokio::fs::remove_file(&path).await;

    let store = Arc::new(JsonLinesStore::new(&path));
    let notifier = Arc::new(RecordingNotifier::default());
    let executor = Arc::new(ScriptedExecutor::new().with_pnl("EUR-USD", dec!(-10)));
    let config = RuntimeConfig {
        risk: fx_config(),
        ..Default::default()
    };

    let mut runtime = SentinelRuntime::start(
        config,
        clock.clone(),
        store.clone(),
        notifier.clone(),
        executor,
    )
    .unwrap();
    runtime.spawn_instrument("EUR-USD", Box::new(AlwaysBuy(dec!(1000)))).unwrap();

    for _ in 0..3 {
        runtime.submit_tick(tick("EUR-USD", &clock)).unwrap();
    }
    assert!(
        wait_until(|| {
            notifier
                .0
                .lock()
                .iter()
                .any(|a| a.event.kind == RiskEventKind::BreakerOpened)
        })
        .await
    );

    let report = runtime.shutdown().await;
    assert_eq!(report.engine.loops["EUR-USD"].filled, 3);
    assert_eq!(report.records_dropped, 0);

    let stored = store.read_all().await.unwrap();
    assert!(stored.iter().any(
        |r| matches!(r, PersistRecord::Event(e) if e.kind == RiskEventKind::BreakerOpened)
    ));
    assert!(stored.iter().any(|r| matches!(r, PersistRecord::Checkpoint(_))));

    let _ = tokio::fs::remove_file(&path).await;
}
