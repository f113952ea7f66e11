//! Sentinel Ports
//!
//! Port definitions (traits) for the Sentinel risk core.
//! These define the boundaries between the risk core and its external
//! collaborators: time, telemetry sinks, persistence, notification,
//! signal generation and order execution.

mod clock;
mod error;
mod execution;
mod notify;
mod persistence;
mod sink;

pub use clock::Clock;
pub use error::{ExecutionError, NotifyError, PersistenceError};
pub use execution::{
    ExecutionReport, ExecutionStatus, OrderExecutor, OrderIntent, OrderRequest, SignalGenerator,
};
pub use notify::Notifier;
pub use persistence::PersistenceStore;
pub use sink::{EventSink, RecordSink};
