//! Sentinel Runner - Concurrent Trading Engine
//!
//! Runs one independent loop per instrument, all sharing one `RiskManager`
//! and one kill switch:
//!
//! - **InstrumentLoop**: pre-signal gate, signal, double risk gate,
//!   dispatch, trade result reporting
//! - **ConcurrentTradingEngine**: spawns loops, routes ticks, shuts down
//! - **SentinelRuntime**: wires risk core, event bus, alerts and
//!   persistence around the engine
//!
//! ## Architecture
//!
//! ```text
//!                      ┌───────────────────┐
//!                      │    Market Data    │
//!                      └─────────┬─────────┘
//!                                │ ticks (try_send, per instrument)
//!            ┌───────────────────┼───────────────────┐
//!            ▼                   ▼                   ▼
//!    ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//!    │ Loop EUR-USD │    │ Loop GBP-USD │    │ Loop USD-JPY │
//!    └──────┬───────┘    └──────┬───────┘    └──────┬───────┘
//!           │ gate 1 / gate 2 / record_trade        │
//!           └───────────────────┼───────────────────┘
//!                               ▼
//!                  ┌─────────────────────────┐
//!                  │  RiskManager (shared)   │
//!                  │  L1 ─► L2 ─► L3 + kill  │
//!                  └────────────┬────────────┘
//!                               │ events
//!                               ▼
//!                  bus ─► alerts / log / persistence
//! ```

pub mod engine;
pub mod error;
pub mod instrument_loop;
pub mod runtime;

// Re-export main types
pub use engine::{ConcurrentTradingEngine, EngineConfig, EngineReport};
pub use error::{EngineError, Result};
pub use instrument_loop::{Candidate, GatedOrder, InstrumentLoop, LoopStats};
pub use runtime::{RuntimeConfig, RuntimeReport, SentinelRuntime};
