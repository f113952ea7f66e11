use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::values::{InstrumentId, Price, Quantity, Timestamp};

/// Decoded top-of-book tick delivered by the market data collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument_id: InstrumentId,
    pub bid: Price,
    pub ask: Price,
    pub volume: Quantity,
    pub timestamp: Timestamp,
}

impl Tick {
    pub fn new(
        instrument_id: impl Into<InstrumentId>,
        bid: Price,
        ask: Price,
        volume: Quantity,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            bid,
            ask,
            volume,
            timestamp,
        }
    }

    /// Mid price, (bid + ask) / 2
    pub fn mid(&self) -> Price {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Spread in absolute price units
    pub fn spread(&self) -> Price {
        self.ask - self.bid
    }

    /// A crossed or empty book is not usable for pricing
    pub fn is_valid(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask >= self.bid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_mid_and_spread() {
        let tick = Tick::new("EUR-USD", dec!(1.1000), dec!(1.1002), dec!(1_000_000), Utc::now());
        assert_eq!(tick.mid(), dec!(1.1001));
        assert_eq!(tick.spread(), dec!(0.0002));
        assert!(tick.is_valid());
    }

    #[test]
    fn test_crossed_book_is_invalid() {
        let tick = Tick::new("EUR-USD", dec!(1.1003), dec!(1.1001), dec!(1), Utc::now());
        assert!(!tick.is_valid());
    }
}
