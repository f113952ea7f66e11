//! Sentinel Events
//!
//! Telemetry side of the risk core. Everything here is fail-open: a slow
//! subscriber, a full queue or a broken store degrades telemetry and raises
//! a CRITICAL self-alert, but never blocks or fails a risk decision.
//!
//! ```text
//! RiskManager ──emit──► RiskEventBus ──broadcast──► AlertHandler ──► Notifier
//!                            │                  └──► EventLogger ──► log
//!                            ▼
//!                     PersistenceQueue ◄── checkpoints
//!                            │ (drop-oldest, bounded)
//!                            ▼
//!                     PersistenceWorker ──retry/backoff──► PersistenceStore
//! ```

pub mod alert;
pub mod bus;
pub mod logger;
pub mod persistence;
pub mod store;

pub use alert::{AlertConfig, AlertHandler, AlertStats, LogNotifier};
pub use bus::{EventBusConfig, RiskEventBus, SequencedEvent};
pub use logger::{EventLogger, format_line};
pub use persistence::{PersistenceConfig, PersistenceQueue, PersistenceWorker, WorkerStats};
pub use store::JsonLinesStore;
