//! Alert deduplication and escalation
//!
//! Events are grouped by `(kind, subject)`. The first event of a group inside
//! the dedup window is forwarded; repeats are suppressed until the group has
//! occurred `escalate_after` times, at which point one escalated alert is
//! sent at CRITICAL severity.

use async_trait::async_trait;
use chrono::Duration;
use log::{debug, error, info, warn};
use sentinel_core::{Alert, RiskEvent, RiskEventKind, Severity, Timestamp};
use sentinel_ports::{NotifyError, Notifier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Window in which repeats of the same (kind, subject) are suppressed
    pub dedup_window_ms: u64,
    /// Occurrences inside one window that escalate the group to CRITICAL
    pub escalate_after: u32,
    /// Events below this severity never alert
    pub min_severity: Severity,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 60_000,
            escalate_after: 3,
            min_severity: Severity::Warning,
        }
    }
}

#[derive(Debug, Clone)]
struct Window {
    started: Timestamp,
    occurrences: u32,
    escalated: bool,
}

/// Counters reported when the alert task stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertStats {
    pub received: u64,
    pub sent: u64,
    pub suppressed: u64,
    pub escalated: u64,
    pub failed: u64,
    pub lagged: u64,
}

pub struct AlertHandler {
    config: AlertConfig,
    windows: HashMap<(RiskEventKind, String), Window>,
}

impl AlertHandler {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    /// Decide whether `event` produces an alert. Uses the event's own
    /// timestamp so the outcome does not depend on delivery latency.
    pub fn handle(&mut self, event: &RiskEvent) -> Option<Alert> {
        if event.severity < self.config.min_severity {
            return None;
        }

        let window_len = self.window_len();
        let key = (event.kind, event.subject.clone());
        let now = event.timestamp;

        let window = self.windows.entry(key).or_insert_with(|| Window {
            started: now,
            occurrences: 0,
            escalated: false,
        });

        if now - window.started >= window_len {
            *window = Window {
                started: now,
                occurrences: 0,
                escalated: false,
            };
        }
        window.occurrences += 1;

        if window.occurrences == 1 {
            let mut alert = Alert::from_event(event.clone());
            // A single-shot escalation threshold escalates immediately
            if self.config.escalate_after <= 1 && event.severity < Severity::Critical {
                alert.severity = Severity::Critical;
                alert.escalated = true;
                window.escalated = true;
            }
            return Some(alert);
        }

        if !window.escalated
            && window.occurrences >= self.config.escalate_after
            && event.severity < Severity::Critical
        {
            window.escalated = true;
            return Some(Alert {
                event: event.clone(),
                severity: Severity::Critical,
                escalated: true,
                occurrences: window.occurrences,
            });
        }

        debug!(
            "[ALERT] Suppressed {:?} for {} ({} in window)",
            event.kind, event.subject, window.occurrences
        );
        None
    }

    /// Forget windows that ended before `now`
    pub fn prune(&mut self, now: Timestamp) {
        let window_len = self.window_len();
        self.windows.retain(|_, w| now - w.started < window_len);
    }

    /// Windows too long to represent never expire
    fn window_len(&self) -> Duration {
        i64::try_from(self.config.dedup_window_ms)
            .ok()
            .and_then(Duration::try_milliseconds)
            .unwrap_or(Duration::MAX)
    }

    pub fn tracked_groups(&self) -> usize {
        self.windows.len()
    }

    /// Consume events from the bus and hand alerts to `notifier` until
    /// shutdown is signalled or the bus closes.
    pub async fn run(
        mut self,
        mut events: broadcast::Receiver<RiskEvent>,
        notifier: Arc<dyn Notifier>,
        mut shutdown: watch::Receiver<bool>,
    ) -> AlertStats {
        let mut stats = AlertStats::default();
        info!("[ALERT] Alert handler started (notifier: {})", notifier.name());

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = events.recv() => match received {
                    Ok(event) => {
                        stats.received += 1;
                        let Some(alert) = self.handle(&event) else {
                            stats.suppressed += 1;
                            continue;
                        };
                        if alert.escalated {
                            stats.escalated += 1;
                        }
                        match notifier.notify(&alert).await {
                            Ok(()) => stats.sent += 1,
                            Err(e) => {
                                stats.failed += 1;
                                error!("[ALERT] {} failed to deliver '{}': {}", notifier.name(), alert.headline(), e);
                            }
                        }
                        if stats.received % 256 == 0 {
                            self.prune(event.timestamp);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        stats.lagged += skipped;
                        warn!("[ALERT] Lagged behind the event bus, {} events skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }

        info!(
            "[ALERT] Alert handler stopped: {} received, {} sent, {} suppressed, {} escalated",
            stats.received, stats.sent, stats.suppressed, stats.escalated
        );
        stats
    }
}

impl Default for AlertHandler {
    fn default() -> Self {
        Self::new(AlertConfig::default())
    }
}

/// Notifier that writes alerts to the log; used when no transport is wired
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        match alert.severity {
            Severity::Critical => error!("[ALERT] {}", alert.headline()),
            _ => warn!("[ALERT] {}", alert.headline()),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "LogNotifier"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sentinel_core::EventSource;

    fn event(kind: RiskEventKind, severity: Severity, subject: &str, at: Timestamp) -> RiskEvent {
        RiskEvent::new(kind, severity, EventSource::L3, subject, "limit", at)
    }

    #[test]
    fn test_info_is_filtered() {
        let mut handler = AlertHandler::default();
        let e = event(RiskEventKind::DailyReset, Severity::Info, "fx", Utc::now());
        assert!(handler.handle(&e).is_none());
        assert_eq!(handler.tracked_groups(), 0);
    }

    #[test]
    fn test_repeats_suppressed_then_escalated_once() {
        let mut handler = AlertHandler::default();
        let t0 = Utc::now();
        let at = |s| t0 + Duration::seconds(s);
        let kind = RiskEventKind::ExposureLimitBreached;

        let first = handler.handle(&event(kind, Severity::Warning, "portfolio", at(0))).unwrap();
        assert_eq!(first.severity, Severity::Warning);
        assert!(!first.escalated);

        assert!(handler.handle(&event(kind, Severity::Warning, "portfolio", at(1))).is_none());

        let third = handler.handle(&event(kind, Severity::Warning, "portfolio", at(2))).unwrap();
        assert_eq!(third.severity, Severity::Critical);
        assert!(third.escalated);
        assert_eq!(third.occurrences, 3);

        assert!(handler.handle(&event(kind, Severity::Warning, "portfolio", at(3))).is_none());
    }

    #[test]
    fn test_unbounded_window_never_expires() {
        let mut handler = AlertHandler::new(AlertConfig {
            dedup_window_ms: u64::MAX,
            escalate_after: 100,
            ..Default::default()
        });
        let t0 = Utc::now();
        let later = t0 + Duration::days(3_650);
        let kind = RiskEventKind::ExposureLimitBreached;
        assert!(handler.handle(&event(kind, Severity::Warning, "p", t0)).is_some());
        assert!(handler.handle(&event(kind, Severity::Warning, "p", later)).is_none());

        handler.prune(later);
        assert_eq!(handler.tracked_groups(), 1);
    }

    #[test]
    fn test_window_expiry_restarts_group() {
        let mut handler = AlertHandler::default();
        let t0 = Utc::now();
        let kind = RiskEventKind::ExposureLimitBreached;
        assert!(handler.handle(&event(kind, Severity::Warning, "p", t0)).is_some());
        assert!(handler.handle(&event(kind, Severity::Warning, "p", t0 + Duration::seconds(10))).is_none());

        let later = t0 + Duration::seconds(61);
        let alert = handler.handle(&event(kind, Severity::Warning, "p", later)).unwrap();
        assert!(!alert.escalated);
        assert_eq!(alert.occurrences, 1);
    }

    #[test]
    fn test_groups_are_independent() {
        let mut handler = AlertHandler::default();
        let now = Utc::now();
        assert!(handler.handle(&event(RiskEventKind::BreakerOpened, Severity::Critical, "EUR-USD", now)).is_some());
        assert!(handler.handle(&event(RiskEventKind::BreakerOpened, Severity::Critical, "GBP-USD", now)).is_some());
        assert!(handler.handle(&event(RiskEventKind::BreakerOpened, Severity::Critical, "EUR-USD", now)).is_none());
        assert_eq!(handler.tracked_groups(), 2);
    }

    #[test]
    fn test_critical_repeats_never_re_escalate() {
        let mut handler = AlertHandler::default();
        let now = Utc::now();
        let kind = RiskEventKind::EvaluationFault;
        assert!(handler.handle(&event(kind, Severity::Critical, "EUR-USD", now)).is_some());
        for _ in 0..5 {
            assert!(handler.handle(&event(kind, Severity::Critical, "EUR-USD", now)).is_none());
        }
    }

    #[test]
    fn test_prune_drops_expired_windows() {
        let mut handler = AlertHandler::default();
        let t0 = Utc::now();
        handler.handle(&event(RiskEventKind::BreakerOpened, Severity::Critical, "A", t0));
        handler.prune(t0 + Duration::minutes(5));
        assert_eq!(handler.tracked_groups(), 0);
    }
}
