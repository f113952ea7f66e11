//! Point-in-time view of every risk layer

use rust_decimal::Decimal;
use sentinel_core::{CircuitState, InstrumentId, RiskLevel, Timestamp, TrackId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::kill_switch::KillSwitchStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub track_id: TrackId,
    /// Committed state
    pub state: CircuitState,
    /// State as seen at `taken_at` (an expired cooldown reads HALF_OPEN)
    pub effective_state: CircuitState,
    pub is_safe: bool,
    pub consecutive_losses: u32,
    pub cumulative_loss: Decimal,
    pub half_open_probe_count: u32,
    pub opened_at: Option<Timestamp>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackStatus {
    pub risk_level: RiskLevel,
    pub peak_equity: Decimal,
    pub current_equity: Decimal,
    pub starting_equity: Decimal,
    pub daily_pnl: Decimal,
    pub drawdown: Decimal,
    pub downgrade_pending: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureStatus {
    pub total_notional: Decimal,
    pub per_instrument_notional: BTreeMap<InstrumentId, Decimal>,
    pub open_position_count: usize,
    pub account_equity: Decimal,
    /// total notional / account equity (`None` when equity is not positive)
    pub leverage: Option<Decimal>,
}

/// Read-only snapshot returned by `RiskManager::get_risk_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskStatusSnapshot {
    pub taken_at: Timestamp,
    pub config_version: u64,
    pub kill_switch: KillSwitchStatus,
    pub breakers: BTreeMap<InstrumentId, BreakerStatus>,
    pub tracks: BTreeMap<TrackId, TrackStatus>,
    pub exposure: ExposureStatus,
}

impl RiskStatusSnapshot {
    pub fn breaker(&self, instrument_id: &str) -> Option<&BreakerStatus> {
        self.breakers.get(instrument_id)
    }

    pub fn track(&self, track_id: &str) -> Option<&TrackStatus> {
        self.tracks.get(track_id)
    }

    pub fn open_breakers(&self) -> impl Iterator<Item = &InstrumentId> {
        self.breakers
            .iter()
            .filter(|(_, b)| b.effective_state == CircuitState::Open)
            .map(|(id, _)| id)
    }

    pub fn halted_tracks(&self) -> impl Iterator<Item = &TrackId> {
        self.tracks
            .iter()
            .filter(|(_, t)| t.risk_level == RiskLevel::Halt)
            .map(|(id, _)| id)
    }

    /// True when nothing is blocking new risk anywhere
    pub fn all_clear(&self) -> bool {
        !self.kill_switch.engaged
            && self.open_breakers().next().is_none()
            && self
                .tracks
                .values()
                .all(|t| t.risk_level < RiskLevel::Critical)
    }
}
