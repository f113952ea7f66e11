use serde::{Deserialize, Serialize};

use super::{RiskEvent, Severity};

/// An event the alert handler decided to hand to the notification transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub event: RiskEvent,
    /// Effective severity after escalation
    pub severity: Severity,
    /// Severity was raised above the event's own severity
    pub escalated: bool,
    /// Occurrences of this (kind, subject) inside the dedup window
    pub occurrences: u32,
}

impl Alert {
    pub fn from_event(event: RiskEvent) -> Self {
        Self {
            severity: event.severity,
            event,
            escalated: false,
            occurrences: 1,
        }
    }

    pub fn headline(&self) -> String {
        format!(
            "[{}] {} {}: {}",
            self.severity, self.event.source, self.event.subject, self.event.message
        )
    }
}
