//! Runtime - wires the risk core, telemetry pipeline and engine together
//!
//! ```text
//! RiskManager ──► RiskEventBus ──► AlertHandler ──► Notifier
//!      ▲               │      └──► EventLogger
//!      │               ▼
//!   Engine ──────► PersistenceQueue ──► PersistenceWorker ──► PersistenceStore
//! ```

use log::{error, info};
use sentinel_clock::SystemClock;
use sentinel_core::Tick;
use sentinel_events::{
    AlertConfig, AlertHandler, AlertStats, EventBusConfig, EventLogger, PersistenceConfig,
    PersistenceQueue, PersistenceWorker, RiskEventBus, WorkerStats,
};
use sentinel_ports::{Clock, Notifier, OrderExecutor, PersistenceStore, SignalGenerator};
use sentinel_risk_manager::{ConfigError, RiskConfig, RiskManager};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::{ConcurrentTradingEngine, EngineConfig, EngineReport};
use crate::error::Result;

/// Everything needed to start a runtime, loadable from one JSON document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub risk: RiskConfig,
    pub bus: EventBusConfig,
    pub alerts: AlertConfig,
    pub persistence: PersistenceConfig,
    pub engine: EngineConfig,
}

impl RuntimeConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(json: &str) -> std::result::Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.risk.validate()?;
        if config.persistence.capacity == 0 {
            return Err(ConfigError::Invalid("persistence.capacity must be positive".to_string()));
        }
        Ok(config)
    }
}

/// Counters from every component after shutdown
#[derive(Debug, Clone, Default)]
pub struct RuntimeReport {
    pub engine: EngineReport,
    pub alerts: AlertStats,
    pub events_logged: u64,
    pub persistence: WorkerStats,
    /// Records lost to the queue's drop-oldest policy
    pub records_dropped: u64,
}

pub struct SentinelRuntime {
    risk: Arc<RiskManager>,
    bus: Arc<RiskEventBus>,
    queue: Arc<PersistenceQueue>,
    engine: ConcurrentTradingEngine,
    telemetry_stop: watch::Sender<bool>,
    alert_task: JoinHandle<AlertStats>,
    logger_task: JoinHandle<u64>,
    worker_task: JoinHandle<WorkerStats>,
}

impl SentinelRuntime {
    /// Build and start every background task. Must be called inside a
    /// tokio runtime.
    pub fn start(
        config: RuntimeConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn PersistenceStore>,
        notifier: Arc<dyn Notifier>,
        executor: Arc<dyn OrderExecutor>,
    ) -> Result<Self> {
        let RuntimeConfig {
            risk: risk_config,
            bus: bus_config,
            alerts: alert_config,
            persistence: persistence_config,
            engine: engine_config,
        } = config;

        let bus = RiskEventBus::new(bus_config);
        let queue = Arc::new(
            PersistenceQueue::new(persistence_config.capacity, Arc::clone(&clock))
                .with_alerts(bus.alert_sender()),
        );
        let bus = Arc::new(bus.with_record_sink(queue.clone()));

        let (telemetry_stop, stop_rx) = watch::channel(false);
        let alert_task = tokio::spawn(AlertHandler::new(alert_config).run(
            bus.subscribe(),
            notifier,
            stop_rx.clone(),
        ));
        let logger_task = tokio::spawn(EventLogger::new(bus.subscribe()).run(stop_rx.clone()));
        let worker_task = tokio::spawn(
            PersistenceWorker::new(Arc::clone(&queue), store, persistence_config).run(stop_rx),
        );

        let risk = Arc::new(RiskManager::new(risk_config, clock, bus.clone())?);
        let engine = ConcurrentTradingEngine::new(Arc::clone(&risk), executor, engine_config)
            .with_record_sink(queue.clone());

        info!("[RUNTIME] Started");
        Ok(Self {
            risk,
            bus,
            queue,
            engine,
            telemetry_stop,
            alert_task,
            logger_task,
            worker_task,
        })
    }

    /// `start` on wall-clock time
    pub fn start_live(
        config: RuntimeConfig,
        store: Arc<dyn PersistenceStore>,
        notifier: Arc<dyn Notifier>,
        executor: Arc<dyn OrderExecutor>,
    ) -> Result<Self> {
        Self::start(config, Arc::new(SystemClock::new()), store, notifier, executor)
    }

    pub fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    pub fn bus(&self) -> &Arc<RiskEventBus> {
        &self.bus
    }

    pub fn queue(&self) -> &Arc<PersistenceQueue> {
        &self.queue
    }

    pub fn engine(&self) -> &ConcurrentTradingEngine {
        &self.engine
    }

    pub fn spawn_instrument(&mut self, instrument_id: &str, signal: Box<dyn SignalGenerator>) -> Result<()> {
        self.engine.spawn_instrument(instrument_id, signal)
    }

    pub fn submit_tick(&self, tick: Tick) -> Result<()> {
        self.engine.submit_tick(tick)
    }

    /// Stop the engine gracefully, then drain telemetry
    pub async fn shutdown(self) -> RuntimeReport {
        let engine = self.engine.shutdown().await;

        let _ = self.telemetry_stop.send(true);
        let alerts = self.alert_task.await.unwrap_or_else(|e| {
            error!("[RUNTIME] Alert task failed: {}", e);
            AlertStats::default()
        });
        let events_logged = self.logger_task.await.unwrap_or_else(|e| {
            error!("[RUNTIME] Logger task failed: {}", e);
            0
        });
        let persistence = self.worker_task.await.unwrap_or_else(|e| {
            error!("[RUNTIME] Persistence worker failed: {}", e);
            WorkerStats::default()
        });

        info!(
            "[RUNTIME] Stopped: {} records persisted, {} dropped",
            persistence.written,
            self.queue.dropped()
        );
        RuntimeReport {
            engine,
            alerts,
            events_logged,
            persistence,
            records_dropped: self.queue.dropped(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_config_from_json() {
        let json = r#"{
            "risk": {
                "instruments": { "EUR-USD": { "track_id": "fx" } },
                "tracks": { "fx": { "starting_equity": "100000" } }
            },
            "persistence": { "capacity": 500 },
            "engine": { "tick_buffer": 64 }
        }"#;
        let config = RuntimeConfig::from_json_str(json).unwrap();
        assert_eq!(config.persistence.capacity, 500);
        assert_eq!(config.persistence.batch_size, 256);
        assert_eq!(config.engine.tick_buffer, 64);
        assert_eq!(config.alerts, AlertConfig::default());
        assert!(config.risk.instruments.contains_key("EUR-USD"));
    }

    #[test]
    fn test_runtime_config_rejects_invalid_risk() {
        let json = r#"{
            "risk": {
                "instruments": { "EUR-USD": { "track_id": "missing" } },
                "tracks": {}
            }
        }"#;
        assert!(RuntimeConfig::from_json_str(json).is_err());
    }
}
