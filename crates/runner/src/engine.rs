//! Concurrent Trading Engine - one task per instrument, one shared RiskManager
//!
//! Ticks are routed by instrument into bounded per-loop channels with
//! `try_send`, so a slow loop drops its own ticks instead of stalling the
//! feed or other instruments.

use log::{error, info, warn};
use sentinel_core::{InstrumentId, PersistRecord, Tick};
use sentinel_ports::{OrderExecutor, RecordSink, SignalGenerator};
use sentinel_risk_manager::RiskManager;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{EngineError, Result};
use crate::instrument_loop::{InstrumentLoop, LoopStats};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tick channel capacity per instrument loop
    pub tick_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { tick_buffer: 1024 }
    }
}

/// Final engine state after all loops stopped
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineReport {
    pub loops: BTreeMap<InstrumentId, LoopStats>,
    /// Loops whose task panicked or was aborted
    pub failed_loops: Vec<InstrumentId>,
    pub dropped_ticks: u64,
    /// Records in the final portfolio checkpoint
    pub final_checkpoint: usize,
}

impl EngineReport {
    /// Stats summed over all loops
    pub fn total(&self) -> LoopStats {
        let mut total = LoopStats::default();
        for stats in self.loops.values() {
            total.merge(stats);
        }
        total
    }
}

struct LoopHandle {
    ticks: mpsc::Sender<Tick>,
    task: JoinHandle<LoopStats>,
}

pub struct ConcurrentTradingEngine {
    config: EngineConfig,
    risk: Arc<RiskManager>,
    executor: Arc<dyn OrderExecutor>,
    records: Option<Arc<dyn RecordSink>>,
    loops: HashMap<InstrumentId, LoopHandle>,
    dropped_ticks: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    kill_switch_sync: Option<JoinHandle<()>>,
}

impl ConcurrentTradingEngine {
    /// Create the engine. Must be called inside a tokio runtime: the
    /// kill switch file sync (when configured) is spawned here.
    pub fn new(risk: Arc<RiskManager>, executor: Arc<dyn OrderExecutor>, config: EngineConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let kill_switch_sync = risk.spawn_kill_switch_sync(shutdown_rx);
        Self {
            config,
            risk,
            executor,
            records: None,
            loops: HashMap::new(),
            dropped_ticks: AtomicU64::new(0),
            shutdown_tx,
            kill_switch_sync,
        }
    }

    /// Loops flush checkpoints here when they stop
    pub fn with_record_sink(mut self, records: Arc<dyn RecordSink>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    /// Start the loop for one configured instrument
    pub fn spawn_instrument(
        &mut self,
        instrument_id: impl Into<InstrumentId>,
        signal: Box<dyn SignalGenerator>,
    ) -> Result<()> {
        let instrument_id = instrument_id.into();
        if self.loops.contains_key(&instrument_id) {
            return Err(EngineError::AlreadyRunning(instrument_id));
        }
        let track_id = self
            .risk
            .config()
            .instrument(&instrument_id)
            .map_err(|_| EngineError::UnknownInstrument(instrument_id.clone()))?
            .track_id
            .clone();

        let (tx, rx) = mpsc::channel(self.config.tick_buffer.max(1));
        let mut instrument_loop = InstrumentLoop::new(
            instrument_id.clone(),
            track_id.clone(),
            Arc::clone(&self.risk),
            signal,
            Arc::clone(&self.executor),
            rx,
        );
        if let Some(records) = &self.records {
            instrument_loop = instrument_loop.with_record_sink(Arc::clone(records));
        }

        let task = tokio::spawn(instrument_loop.run(self.shutdown_tx.subscribe()));
        info!("[ENGINE] Spawned loop for {} (track {})", instrument_id, track_id);
        self.loops.insert(instrument_id, LoopHandle { ticks: tx, task });
        Ok(())
    }

    /// Start a loop for every configured instrument
    pub fn spawn_all<F>(&mut self, mut make_signal: F) -> Result<()>
    where
        F: FnMut(&str) -> Box<dyn SignalGenerator>,
    {
        let config = self.risk.config();
        for instrument_id in config.instruments.keys() {
            self.spawn_instrument(instrument_id.clone(), make_signal(instrument_id))?;
        }
        Ok(())
    }

    /// Route a tick to its instrument's loop without waiting
    pub fn submit_tick(&self, tick: Tick) -> Result<()> {
        let handle = self
            .loops
            .get(&tick.instrument_id)
            .ok_or_else(|| EngineError::NotRunning(tick.instrument_id.clone()))?;

        match handle.ticks.try_send(tick) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(tick)) => {
                let dropped = self.dropped_ticks.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!("[ENGINE] Tick queue full for {} ({} ticks dropped so far)", tick.instrument_id, dropped);
                }
                Err(EngineError::Backpressure(tick.instrument_id))
            }
            Err(TrySendError::Closed(tick)) => Err(EngineError::LoopClosed(tick.instrument_id)),
        }
    }

    pub fn instruments(&self) -> Vec<&InstrumentId> {
        let mut ids: Vec<_> = self.loops.keys().collect();
        ids.sort();
        ids
    }

    pub fn dropped_ticks(&self) -> u64 {
        self.dropped_ticks.load(Ordering::Relaxed)
    }

    /// Graceful stop: close the tick streams and let every loop finish the
    /// ticks already queued.
    pub async fn shutdown(self) -> EngineReport {
        info!("[ENGINE] Shutting down {} loops", self.loops.len());
        self.finish(false).await
    }

    /// Cooperative cancellation: loops stop after their current tick and
    /// queued ticks are discarded.
    pub async fn cancel(self) -> EngineReport {
        info!("[ENGINE] Cancelling {} loops", self.loops.len());
        self.finish(true).await
    }

    async fn finish(self, cancel: bool) -> EngineReport {
        let Self {
            risk,
            records,
            loops,
            dropped_ticks,
            shutdown_tx,
            kill_switch_sync,
            ..
        } = self;

        if cancel {
            let _ = shutdown_tx.send(true);
        }

        let mut report = EngineReport {
            dropped_ticks: dropped_ticks.load(Ordering::Relaxed),
            ..Default::default()
        };

        let mut tasks = Vec::with_capacity(loops.len());
        for (instrument_id, handle) in loops {
            drop(handle.ticks);
            tasks.push((instrument_id, handle.task));
        }
        for (instrument_id, task) in tasks {
            match task.await {
                Ok(stats) => {
                    report.loops.insert(instrument_id, stats);
                }
                Err(e) => {
                    error!("[ENGINE] Loop for {} failed: {}", instrument_id, e);
                    report.failed_loops.push(instrument_id);
                }
            }
        }

        // Exposure is portfolio-wide, so the full checkpoint is taken once
        // every loop has stopped
        if let Some(records) = &records {
            let checkpoint = risk.checkpoint();
            report.final_checkpoint = checkpoint.len();
            for record in checkpoint {
                records.enqueue(PersistRecord::Checkpoint(record));
            }
        }

        let _ = shutdown_tx.send(true);
        if let Some(sync) = kill_switch_sync
            && let Err(e) = sync.await
        {
            error!("[ENGINE] Kill switch sync task failed: {}", e);
        }

        let total = report.total();
        info!(
            "[ENGINE] Stopped: {} ticks, {} dispatched, {} filled, {} dropped",
            total.ticks, total.dispatched, total.filled, report.dropped_ticks
        );
        report
    }
}
