use async_trait::async_trait;
use rust_decimal::Decimal;
use sentinel_core::{InstrumentId, Price, Quantity, Side, Tick, TradeId};
use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;

/// What a signal generator wants to do on a tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub side: Side,
    pub size: Quantity,
    /// The order closes or shrinks an existing position
    pub reduces_position: bool,
}

/// Order handed to the execution layer after both risk gates passed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Same id as the `RiskContext` the order was validated under
    pub trade_id: TradeId,
    pub instrument_id: InstrumentId,
    pub side: Side,
    pub size: Quantity,
    pub limit_price: Price,
    pub reduce_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Filled,
    Rejected { reason: String },
}

/// Settlement report for a dispatched order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub trade_id: TradeId,
    pub status: ExecutionStatus,
    pub filled_size: Quantity,
    pub avg_price: Option<Price>,
    /// Realised PnL attributed to this trade
    pub realized_pnl: Decimal,
}

impl ExecutionReport {
    pub fn is_filled(&self) -> bool {
        matches!(self.status, ExecutionStatus::Filled)
    }
}

/// Order routing collaborator
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn execute(&self, order: &OrderRequest) -> Result<ExecutionReport, ExecutionError>;
}

/// Feature/signal evaluation for one instrument.
///
/// Owned by exactly one instrument loop, so it may keep mutable state.
pub trait SignalGenerator: Send {
    fn on_tick(&mut self, tick: &Tick) -> Option<OrderIntent>;

    fn name(&self) -> &str {
        "SignalGenerator"
    }
}
