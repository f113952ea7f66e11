//! Sentinel Core Domain
//!
//! Pure domain types for the Sentinel risk core: the context a proposed
//! order is evaluated in, the decision returned for it, the events raised on
//! state transitions and the persistable state of every risk layer.
//! This crate contains no async, no I/O, and is 100% unit testable.

pub mod entities;
pub mod values;

// Re-export commonly used types at crate root
pub use entities::{
    AccountRiskState, Alert, CheckpointBody, CheckpointRecord, CircuitBreakerState, CircuitState,
    EventSource, ExposureState, PersistRecord, RiskAction, RiskContext, RiskDecision, RiskEvent,
    RiskEventKind, RiskLevel, Severity, Side, Tick, TradeId,
};
pub use values::{InstrumentId, Notional, Price, Quantity, Timestamp, TrackId};
