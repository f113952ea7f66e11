//! Persistable state records for the three risk layers.
//!
//! The monitors in the risk manager own and mutate these; here they are
//! plain data so they can be snapshotted, checkpointed and restored.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::values::{InstrumentId, Notional, Timestamp};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Tripped - no new orders until the cooldown has elapsed
    Open,
    /// Cooling off - probe trades decide between Closed and Open
    HalfOpen,
}

impl CircuitState {
    pub fn as_u8(&self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }

    /// Decode a published state byte; unknown values yield `None`
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CircuitState::Closed),
            1 => Some(CircuitState::Open),
            2 => Some(CircuitState::HalfOpen),
            _ => None,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

/// Per-instrument circuit breaker record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub consecutive_losses: u32,
    /// Net realised loss since the breaker last closed; wins reduce it and a
    /// net profit reads negative
    pub cumulative_loss: Decimal,
    pub opened_at: Option<Timestamp>,
    /// Consecutive successful probes while half-open
    pub half_open_probe_count: u32,
    /// Why the last transition happened
    pub last_reason: Option<String>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_losses: 0,
            cumulative_loss: Decimal::ZERO,
            opened_at: None,
            half_open_probe_count: 0,
            last_reason: None,
        }
    }
}

/// Drawdown risk level, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum RiskLevel {
    #[default]
    Normal,
    Warning,
    Critical,
    Halt,
}

impl RiskLevel {
    pub fn as_u8(&self) -> u8 {
        match self {
            RiskLevel::Normal => 0,
            RiskLevel::Warning => 1,
            RiskLevel::Critical => 2,
            RiskLevel::Halt => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RiskLevel::Normal),
            1 => Some(RiskLevel::Warning),
            2 => Some(RiskLevel::Critical),
            3 => Some(RiskLevel::Halt),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Normal => "NORMAL",
            RiskLevel::Warning => "WARNING",
            RiskLevel::Critical => "CRITICAL",
            RiskLevel::Halt => "HALT",
        };
        f.write_str(s)
    }
}

/// Per-track account record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRiskState {
    /// Non-decreasing within a trading day
    pub peak_equity: Decimal,
    pub current_equity: Decimal,
    /// Equity the day started with
    pub starting_equity: Decimal,
    pub daily_pnl: Decimal,
    pub risk_level: RiskLevel,
    /// Set while a lower level is waiting out the stabilization period
    pub downgrade_pending_since: Option<Timestamp>,
    pub level_reason: Option<String>,
}

impl AccountRiskState {
    pub fn new(starting_equity: Decimal) -> Self {
        Self {
            peak_equity: starting_equity,
            current_equity: starting_equity,
            starting_equity,
            daily_pnl: Decimal::ZERO,
            risk_level: RiskLevel::Normal,
            downgrade_pending_since: None,
            level_reason: None,
        }
    }

    /// (peak - current) / peak, always derived from the two stored fields.
    ///
    /// A non-positive peak with equity below it counts as a full drawdown.
    pub fn drawdown(&self) -> Decimal {
        if self.peak_equity <= Decimal::ZERO {
            return if self.current_equity < self.peak_equity {
                Decimal::ONE
            } else {
                Decimal::ZERO
            };
        }
        let dd = (self.peak_equity - self.current_equity) / self.peak_equity;
        dd.max(Decimal::ZERO)
    }
}

/// Portfolio exposure record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureState {
    pub total_notional: Notional,
    pub per_instrument_notional: BTreeMap<InstrumentId, Notional>,
    pub open_position_count: usize,
}

impl ExposureState {
    pub fn instrument_notional(&self, instrument_id: &str) -> Notional {
        self.per_instrument_notional
            .get(instrument_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Total equals the per-instrument sum and the position count matches
    pub fn is_consistent(&self) -> bool {
        let sum: Decimal = self.per_instrument_notional.values().copied().sum();
        let open = self
            .per_instrument_notional
            .values()
            .filter(|n| !n.is_zero())
            .count();
        sum == self.total_notional && open == self.open_position_count
    }
}
