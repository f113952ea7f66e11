//! Sentinel Risk Manager
//!
//! Pre-trade risk control for a multi-instrument trading system. Every
//! proposed order passes three layers, cheapest first:
//!
//! - **L1 Circuit Breaker** (per instrument): trips on consecutive or
//!   cumulative losses, cools down, recovers through probe trades
//! - **L2 Drawdown Monitor** (per track): maps drawdown from peak equity to a
//!   risk level; HALT holds until the daily reset
//! - **L3 Exposure Monitor** (portfolio): leverage, notional and position
//!   count ceilings, checked on a speculative projection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        RiskManager                          │
//! │                                                             │
//! │  RiskContext ──► Kill Switch ──► L1 ──► L2 ──► L3 ──► Decision │
//! │                                                             │
//! │  Trade results ──► record_trade ──► L1 counters, L2 equity  │
//! │                                                             │
//! │  Fills ─────────► update_exposure ──► L3 exposure           │
//! │                                                             │
//! │  Config ────────► ConfigHandle (atomic snapshot swap)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                   RiskEvent ──► EventSink
//! ```
//!
//! Decisions fail closed: an error or panic while evaluating yields REJECT.

pub mod circuit_breaker;
pub mod config;
pub mod drawdown;
pub mod error;
pub mod exposure;
pub mod kill_switch;
pub mod layer;
pub mod manager;
pub mod parameters;
pub mod status;

// Re-export main types
pub use circuit_breaker::{BreakerTransition, CircuitBreaker};
pub use config::{ConfigHandle, InstrumentConfig, RiskConfig, TrackConfig};
pub use drawdown::{DrawdownMonitor, LevelChange};
pub use error::{ConfigError, Result, RiskError};
pub use exposure::{ExposureCheck, ExposureMonitor, ExposureProjection};
pub use kill_switch::{FileSync, KillReasonKind, KillSwitch, KillSwitchConfig, KillSwitchStatus};
pub use layer::{RiskLayer, Verdict};
pub use manager::{LayerFailure, RecordOutcome, RestoreReport, RiskManager};
pub use parameters::{CircuitBreakerLimits, DrawdownLimits, MAX_DURATION_MS, PortfolioLimits};
pub use status::{BreakerStatus, ExposureStatus, RiskStatusSnapshot, TrackStatus};
