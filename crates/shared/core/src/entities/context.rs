use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Side;
use crate::values::{InstrumentId, Notional, Quantity, Timestamp, TrackId};

/// Unique identifier for a proposed trade; `record_trade` is idempotent per id
pub type TradeId = Uuid;

/// Everything the risk layers need to know about one proposed action.
///
/// Created per evaluation call and never mutated; the builder methods
/// consume and return a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskContext {
    pub trade_id: TradeId,
    pub instrument_id: InstrumentId,
    pub track_id: TrackId,
    pub side: Side,
    pub proposed_size: Quantity,
    /// Absolute notional of the proposed order
    pub proposed_notional: Notional,
    /// Order closes or shrinks an existing position
    pub reduces_position: bool,
    pub timestamp: Timestamp,
}

impl RiskContext {
    pub fn new(
        instrument_id: impl Into<InstrumentId>,
        track_id: impl Into<TrackId>,
        side: Side,
        proposed_size: Quantity,
        proposed_notional: Notional,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            trade_id: Uuid::new_v4(),
            instrument_id: instrument_id.into(),
            track_id: track_id.into(),
            side,
            proposed_size,
            proposed_notional: proposed_notional.abs(),
            reduces_position: false,
            timestamp,
        }
    }

    pub fn with_trade_id(mut self, trade_id: TradeId) -> Self {
        self.trade_id = trade_id;
        self
    }

    pub fn reducing(mut self) -> Self {
        self.reduces_position = true;
        self
    }

    /// Same trade, re-stamped and re-sized (used when a decision scales the order)
    pub fn resized(&self, size: Quantity, notional: Notional, timestamp: Timestamp) -> Self {
        Self {
            proposed_size: size,
            proposed_notional: notional.abs(),
            timestamp,
            ..self.clone()
        }
    }
}
