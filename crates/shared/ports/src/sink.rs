use sentinel_core::{PersistRecord, RiskEvent};

/// Non-blocking destination for risk events.
///
/// Implementations must return immediately: `emit` is called from the
/// decision path while per-instrument and per-track locks may be held.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RiskEvent);
}

/// Non-blocking enqueue in front of the persistence collaborator
pub trait RecordSink: Send + Sync {
    fn enqueue(&self, record: PersistRecord);
}
