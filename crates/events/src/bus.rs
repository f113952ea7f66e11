//! In-process risk event bus
//!
//! Publishing never blocks: events go out on a `tokio::sync::broadcast`
//! channel (slow subscribers lag and lose the oldest events, they never
//! hold up the publisher), into a bounded history ring, and to the
//! persistence queue if one is attached.

use log::trace;
use parking_lot::Mutex;
use sentinel_core::{PersistRecord, RiskEvent};
use sentinel_ports::{EventSink, RecordSink};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Broadcast channel capacity per subscriber
    pub channel_capacity: usize,
    /// Events kept in the history ring
    pub history_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            history_size: 1000,
        }
    }
}

/// Event with its bus sequence number
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedEvent {
    pub sequence: u64,
    pub event: RiskEvent,
}

pub struct RiskEventBus {
    sender: broadcast::Sender<RiskEvent>,
    history: Mutex<VecDeque<SequencedEvent>>,
    history_size: usize,
    sequence: AtomicU64,
    records: Option<Arc<dyn RecordSink>>,
}

impl RiskEventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            history: Mutex::new(VecDeque::with_capacity(config.history_size.min(1024))),
            history_size: config.history_size,
            sequence: AtomicU64::new(0),
            records: None,
        }
    }

    /// Also enqueue every published event for persistence
    pub fn with_record_sink(mut self, records: Arc<dyn RecordSink>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RiskEvent> {
        self.sender.subscribe()
    }

    /// Raw sender for self-alerts that must reach subscribers without going
    /// back through history and persistence
    pub fn alert_sender(&self) -> broadcast::Sender<RiskEvent> {
        self.sender.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event; returns its sequence number
    pub fn publish(&self, event: RiskEvent) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut history = self.history.lock();
            history.push_back(SequencedEvent {
                sequence,
                event: event.clone(),
            });
            while history.len() > self.history_size {
                history.pop_front();
            }
        }

        if let Some(records) = &self.records {
            records.enqueue(PersistRecord::Event(event.clone()));
        }

        // No subscribers is not an error
        if self.sender.send(event).is_err() {
            trace!("[BUS] Event #{} published with no subscribers", sequence);
        }
        sequence
    }

    /// Up to `n` most recent events, oldest first
    pub fn recent(&self, n: usize) -> Vec<RiskEvent> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(n);
        history.iter().skip(skip).map(|e| e.event.clone()).collect()
    }

    /// Events after `sequence` still in the history ring
    pub fn since(&self, sequence: u64) -> Vec<SequencedEvent> {
        self.history
            .lock()
            .iter()
            .filter(|e| e.sequence > sequence)
            .cloned()
            .collect()
    }

    pub fn latest_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl Default for RiskEventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl EventSink for RiskEventBus {
    fn emit(&self, event: RiskEvent) {
        self.publish(event);
    }
}
