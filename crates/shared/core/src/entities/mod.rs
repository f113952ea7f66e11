mod alert;
mod context;
mod decision;
mod event;
mod record;
mod side;
mod state;
mod tick;

pub use alert::Alert;
pub use context::{RiskContext, TradeId};
pub use decision::{RiskAction, RiskDecision};
pub use event::{EventSource, RiskEvent, RiskEventKind, Severity};
pub use record::{CheckpointBody, CheckpointRecord, PersistRecord};
pub use side::Side;
pub use state::{
    AccountRiskState, CircuitBreakerState, CircuitState, ExposureState, RiskLevel,
};
pub use tick::Tick;
