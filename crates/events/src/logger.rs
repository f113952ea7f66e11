//! Structured event log
//!
//! Writes every bus event as one JSON object per line through the `log`
//! facade under the `sentinel::events` target.

use log::{error, info, warn};
use sentinel_core::{RiskEvent, Severity};
use serde_json::json;
use tokio::sync::{broadcast, watch};

pub const LOG_TARGET: &str = "sentinel::events";

/// One JSON line for `event`
pub fn format_line(event: &RiskEvent) -> String {
    json!({
        "ts": event.timestamp.to_rfc3339(),
        "id": event.event_id.to_string(),
        "severity": event.severity.as_str(),
        "source": event.source.to_string(),
        "kind": event.kind,
        "subject": event.subject,
        "message": event.message,
    })
    .to_string()
}

pub struct EventLogger {
    events: broadcast::Receiver<RiskEvent>,
}

impl EventLogger {
    pub fn new(events: broadcast::Receiver<RiskEvent>) -> Self {
        Self { events }
    }

    /// Returns the number of events logged
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut logged = 0u64;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = self.events.recv() => match received {
                    Ok(event) => {
                        let line = format_line(&event);
                        match event.severity {
                            Severity::Info => info!(target: LOG_TARGET, "{}", line),
                            Severity::Warning => warn!(target: LOG_TARGET, "{}", line),
                            Severity::Critical => error!(target: LOG_TARGET, "{}", line),
                        }
                        logged += 1;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(target: LOG_TARGET, "[LOG] {} events skipped (logger lagging)", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        logged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sentinel_core::{EventSource, RiskEventKind};

    #[test]
    fn test_line_is_valid_json() {
        let event = RiskEvent::new(
            RiskEventKind::RiskLevelRaised,
            Severity::Warning,
            EventSource::L2,
            "fx-majors",
            "NORMAL -> WARNING at 1.20% drawdown",
            Utc::now(),
        );
        let line = format_line(&event);
        assert!(!line.contains('\n'));

        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["severity"], "WARNING");
        assert_eq!(parsed["source"], "L2");
        assert_eq!(parsed["kind"], "RiskLevelRaised");
        assert_eq!(parsed["subject"], "fx-majors");
        assert_eq!(parsed["id"], event.event_id.to_string());
    }

    #[tokio::test]
    async fn test_logger_stops_when_bus_closes() {
        let _ = env_logger::try_init();
        let (tx, rx) = broadcast::channel(16);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let logger = tokio::spawn(EventLogger::new(rx).run(stop_rx));

        tx.send(RiskEvent::new(
            RiskEventKind::DailyReset,
            Severity::Info,
            EventSource::System,
            "portfolio",
            "daily reset",
            Utc::now(),
        ))
        .unwrap();
        drop(tx);

        assert_eq!(logger.await.unwrap(), 1);
    }
}
