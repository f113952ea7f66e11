//! End-to-end telemetry: bus → alerts / log / persistence → store

use async_trait::async_trait;
use chrono::Duration;
use parking_lot::Mutex;
use sentinel_clock::ManualClock;
use sentinel_core::{Alert, EventSource, PersistRecord, RiskEvent, RiskEventKind, Severity};
use sentinel_events::{
    AlertConfig, AlertHandler, EventBusConfig, EventLogger, JsonLinesStore, PersistenceConfig,
    PersistenceQueue, PersistenceWorker, RiskEventBus,
};
use sentinel_ports::{Clock, EventSink, Notifier, NotifyError};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

struct ClosedNotifier;

#[async_trait]
impl Notifier for ClosedNotifier {
    async fn notify(&self, _alert: &Alert) -> Result<(), NotifyError> {
        Err(NotifyError::Closed)
    }
}

fn breach(clock: &ManualClock) -> RiskEvent {
    RiskEvent::new(
        RiskEventKind::ExposureLimitBreached,
        Severity::Warning,
        EventSource::L3,
        "portfolio",
        "leverage 5.20x exceeds 5.00x",
        clock.now(),
    )
}

#[tokio::test]
async fn test_events_reach_alerts_and_store() {
    let _ = env_logger::try_init();
    let clock = ManualClock::new(None);
    let path = std::env::temp_dir().join(format!("sentinel-pipeline-{}.jsonl", std::process::id()));
    let _ = tokio::fs::remove_file(&path).await;

    let queue = Arc::new(PersistenceQueue::new(1_000, clock.clone()));
    let bus = Arc::new(RiskEventBus::new(EventBusConfig::default()).with_record_sink(queue.clone()));
    let store = Arc::new(JsonLinesStore::new(&path));
    let notifier = Arc::new(RecordingNotifier::default());
    let (stop_tx, stop_rx) = watch::channel(false);

    let alerts = tokio::spawn(AlertHandler::new(AlertConfig::default()).run(
        bus.subscribe(),
        notifier.clone(),
        stop_rx.clone(),
    ));
    let logger = tokio::spawn(EventLogger::new(bus.subscribe()).run(stop_rx.clone()));
    let worker = tokio::spawn(
        PersistenceWorker::new(queue.clone(), store.clone(), PersistenceConfig::default()).run(stop_rx),
    );

    // Three breaches inside one window: first forwarded, third escalated
    for _ in 0..3 {
        bus.emit(breach(&clock));
        clock.advance(Duration::seconds(1));
    }
    bus.emit(RiskEvent::new(
        RiskEventKind::DailyReset,
        Severity::Info,
        EventSource::System,
        "portfolio",
        "daily reset",
        clock.now(),
    ));

    // Let the subscribers catch up before stopping
    for _ in 0..50 {
        if notifier.alerts.lock().len() >= 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    stop_tx.send(true).unwrap();

    let alert_stats = alerts.await.unwrap();
    logger.await.unwrap();
    let worker_stats = worker.await.unwrap();

    let sent = notifier.alerts.lock().clone();
    assert_eq!(sent.len(), 2);
    assert!(!sent[0].escalated);
    assert!(sent[1].escalated);
    assert_eq!(sent[1].severity, Severity::Critical);
    assert_eq!(alert_stats.escalated, 1);

    assert_eq!(worker_stats.written, 4);
    let stored = store.read_all().await.unwrap();
    assert_eq!(stored.len(), 4);
    assert!(stored.iter().all(|r| matches!(r, PersistRecord::Event(_))));

    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn test_queue_overflow_alerts_through_bus() {
    let clock = ManualClock::new(None);
    let bus = RiskEventBus::new(EventBusConfig::default());
    let mut rx = bus.subscribe();
    let queue = PersistenceQueue::new(2, clock).with_alerts(bus.alert_sender());

    for _ in 0..5 {
        queue.push(PersistRecord::Event(RiskEvent::new(
                RiskEventKind::DailyReset,
                Severity::Info,
                EventSource::L2,
                "fx",
                "reset",
                chrono::Utc::now(),
            )));
    }

    let alert = rx.recv().await.unwrap();
    assert_eq!(alert.kind, RiskEventKind::PersistenceDegraded);
    assert!(alert.is_critical());
    assert_eq!(queue.dropped(), 3);
}

#[tokio::test]
async fn test_notifier_failures_do_not_stop_handler() {
    let clock = ManualClock::new(None);
    let bus = RiskEventBus::default();
    let (_stop_tx, stop_rx) = watch::channel(false);
    let config = AlertConfig {
        dedup_window_ms: 0,
        ..Default::default()
    };
    let handle = tokio::spawn(AlertHandler::new(config).run(bus.subscribe(), Arc::new(ClosedNotifier), stop_rx));

    bus.publish(breach(&clock));
    bus.publish(breach(&clock));
    drop(bus);

    let stats = handle.await.unwrap();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.sent, 0);
}
