use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Price value - uses Decimal for precision
pub type Price = Decimal;

/// Quantity value - uses Decimal for precision
pub type Quantity = Decimal;

/// Notional value (price x quantity) in account currency
pub type Notional = Decimal;

/// Timestamp in UTC
pub type Timestamp = DateTime<Utc>;

/// Identifier for a tradeable instrument (e.g. "EUR-USD")
pub type InstrumentId = String;

/// Identifier for an independently risk-budgeted pool of instruments
pub type TrackId = String;
