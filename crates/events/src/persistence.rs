//! Best-effort persistence pipeline
//!
//! `PersistenceQueue` is a bounded in-memory queue with a drop-oldest policy;
//! `enqueue` never blocks and never fails. `PersistenceWorker` drains it in
//! batches on a background task and writes them to a `PersistenceStore`,
//! retrying with bounded exponential backoff. Storage trouble is reported as
//! CRITICAL self-alerts and never reaches the decision path.

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use sentinel_core::{EventSource, PersistRecord, RiskEvent, RiskEventKind, Severity};
use sentinel_ports::{Clock, PersistenceStore, RecordSink};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, broadcast, watch};

const SUBJECT: &str = "persistence";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Maximum queued records; the oldest is dropped beyond this
    pub capacity: usize,
    /// Records handed to the store per write
    pub batch_size: usize,
    /// First retry delay
    pub base_backoff_ms: u64,
    /// Retry delay ceiling
    pub max_backoff_ms: u64,
    /// Write attempts per batch before it is dropped
    pub max_attempts: u32,
    /// Flush interval when the queue is quiet
    pub flush_interval_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            batch_size: 256,
            base_backoff_ms: 100,
            max_backoff_ms: 5_000,
            max_attempts: 5,
            flush_interval_ms: 1_000,
        }
    }
}

impl PersistenceConfig {
    /// Delay before retry number `attempt` (1-based): base, 2x base, 4x base...
    /// capped at `max_backoff_ms`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let ms = self
            .base_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

struct QueueInner {
    records: VecDeque<PersistRecord>,
    /// Set on the first overflow, cleared once the queue drains empty
    degraded: bool,
}

pub struct PersistenceQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    ready: Notify,
    dropped: AtomicU64,
    alerts: Option<broadcast::Sender<RiskEvent>>,
    clock: Arc<dyn Clock>,
}

impl PersistenceQueue {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                records: VecDeque::with_capacity(capacity.min(4096)),
                degraded: false,
            }),
            capacity,
            ready: Notify::new(),
            dropped: AtomicU64::new(0),
            alerts: None,
            clock,
        }
    }

    /// Where overflow self-alerts go (normally `RiskEventBus::alert_sender`)
    pub fn with_alerts(mut self, alerts: broadcast::Sender<RiskEvent>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn push(&self, record: PersistRecord) {
        let overflowed = {
            let mut inner = self.inner.lock();
            let mut overflowed = false;
            while inner.records.len() >= self.capacity {
                inner.records.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if !inner.degraded {
                    inner.degraded = true;
                    overflowed = true;
                }
            }
            inner.records.push_back(record);
            overflowed
        };

        if overflowed {
            let message = format!(
                "persistence queue full ({} records), dropping oldest",
                self.capacity
            );
            error!("[PERSIST] {}", message);
            self.alert(message);
        }
        self.ready.notify_one();
    }

    /// Take up to `max` records, oldest first
    pub fn drain(&self, max: usize) -> Vec<PersistRecord> {
        let mut inner = self.inner.lock();
        let n = max.min(inner.records.len());
        let batch: Vec<_> = inner.records.drain(..n).collect();
        if inner.records.is_empty() && inner.degraded {
            inner.degraded = false;
            info!("[PERSIST] Queue drained, leaving degraded mode");
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records discarded by the drop-oldest policy since start
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_degraded(&self) -> bool {
        self.inner.lock().degraded
    }

    async fn wait_ready(&self) {
        self.ready.notified().await;
    }

    fn alert(&self, message: String) {
        if let Some(alerts) = &self.alerts {
            let event = RiskEvent::new(
                RiskEventKind::PersistenceDegraded,
                Severity::Critical,
                EventSource::System,
                SUBJECT,
                message,
                self.clock.now(),
            );
            let _ = alerts.send(event);
        }
    }
}

impl RecordSink for PersistenceQueue {
    fn enqueue(&self, record: PersistRecord) {
        self.push(record);
    }
}

/// Counters reported when the worker stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub written: u64,
    pub batches: u64,
    pub retries: u64,
    /// Records lost after exhausting retries
    pub abandoned: u64,
}

pub struct PersistenceWorker {
    queue: Arc<PersistenceQueue>,
    store: Arc<dyn PersistenceStore>,
    config: PersistenceConfig,
    stats: WorkerStats,
}

impl PersistenceWorker {
    pub fn new(
        queue: Arc<PersistenceQueue>,
        store: Arc<dyn PersistenceStore>,
        config: PersistenceConfig,
    ) -> Self {
        Self {
            queue,
            store,
            config,
            stats: WorkerStats::default(),
        }
    }

    /// Drain until shutdown, then flush whatever is left
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> WorkerStats {
        info!("[PERSIST] Worker started (store: {})", self.store.name());
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.flush_interval_ms.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = self.queue.wait_ready() => {}
                _ = interval.tick() => {}
            }
            self.flush().await;
        }

        self.flush().await;
        info!(
            "[PERSIST] Worker stopped: {} records in {} batches, {} retries, {} abandoned",
            self.stats.written, self.stats.batches, self.stats.retries, self.stats.abandoned
        );
        self.stats
    }

    /// Write every queued record
    pub async fn flush(&mut self) {
        let batch_size = self.config.batch_size.max(1);
        loop {
            let batch = self.queue.drain(batch_size);
            if batch.is_empty() {
                return;
            }
            self.write_with_retry(&batch).await;
        }
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    async fn write_with_retry(&mut self, batch: &[PersistRecord]) {
        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.store.write_batch(batch).await {
                Ok(()) => {
                    self.stats.written += batch.len() as u64;
                    self.stats.batches += 1;
                    debug!("[PERSIST] Wrote {} records", batch.len());
                    return;
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.config.backoff_delay(attempt);
                    self.stats.retries += 1;
                    warn!(
                        "[PERSIST] Write attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.stats.abandoned += batch.len() as u64;
                    let message = format!(
                        "{} records abandoned after {} failed writes to {}: {}",
                        batch.len(),
                        max_attempts,
                        self.store.name(),
                        e
                    );
                    error!("[PERSIST] {}", message);
                    self.queue.alert(message);
                }
            }
        }
    }
}
