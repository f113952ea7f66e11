use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::values::Timestamp;

/// Event severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of the core raised the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventSource {
    /// Per-instrument circuit breaker
    L1,
    /// Per-track drawdown monitor
    L2,
    /// Portfolio exposure monitor
    L3,
    /// Orchestrator, kill switch, telemetry pipeline
    System,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventSource::L1 => "L1",
            EventSource::L2 => "L2",
            EventSource::L3 => "L3",
            EventSource::System => "SYSTEM",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskEventKind {
    BreakerOpened,
    BreakerHalfOpen,
    BreakerClosed,
    /// Probe failed while half-open
    BreakerReopened,
    /// Operator forced a breaker open or closed
    ManualOverride,
    RiskLevelRaised,
    RiskLevelLowered,
    ExposureLimitBreached,
    DailyReset,
    KillSwitchEngaged,
    KillSwitchReleased,
    ConfigReloaded,
    StateRestored,
    /// Internal fault on the decision path (fail-closed)
    EvaluationFault,
    /// Partial failure while recording a trade result
    RecordFault,
    /// Telemetry queue overflowed or storage kept failing
    PersistenceDegraded,
}

/// Immutable record of a state transition or threshold breach
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    pub event_id: Uuid,
    pub kind: RiskEventKind,
    pub severity: Severity,
    pub source: EventSource,
    /// Instrument, track, or "portfolio"
    pub subject: String,
    pub message: String,
    pub timestamp: Timestamp,
}

impl RiskEvent {
    pub fn new(
        kind: RiskEventKind,
        severity: Severity,
        source: EventSource,
        subject: impl Into<String>,
        message: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            severity,
            source,
            subject: subject.into(),
            message: message.into(),
            timestamp,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

impl std::fmt::Display for RiskEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}][{}] {:?} {}: {}",
            self.severity, self.source, self.kind, self.subject, self.message
        )
    }
}
