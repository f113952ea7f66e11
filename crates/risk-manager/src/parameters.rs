//! Risk Limit Parameters
//!
//! The per-layer limits the risk manager enforces. These are plain,
//! serde-deserialisable values; a `RiskConfig` snapshot groups them and is
//! never mutated once published.

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sentinel_core::RiskLevel;
use serde::{Deserialize, Serialize};

/// Upper bound for every configured duration: one (leap) year
pub const MAX_DURATION_MS: u64 = 366 * 24 * 60 * 60 * 1_000;

/// `ms` as a chrono duration, `None` when it cannot be represented
pub fn duration_ms(ms: u64) -> Option<Duration> {
    i64::try_from(ms).ok().and_then(Duration::try_milliseconds)
}

pub(crate) fn check_duration(name: &str, ms: u64) -> Result<(), String> {
    if ms > MAX_DURATION_MS {
        return Err(format!("{} must be at most {}ms (got {})", name, MAX_DURATION_MS, ms));
    }
    Ok(())
}

/// L1 limits for a single instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerLimits {
    /// Consecutive losing trades that trip the breaker
    pub max_losses: u32,
    /// Net realised loss (positive amount) since the last close that trips the breaker
    pub max_loss_amount: Decimal,
    /// Time an open breaker stays open before probing (ms)
    pub cooldown_ms: u64,
    /// Consecutive successful probes needed to close again
    pub probe_successes_required: u32,
    /// Size scaling applied to probe trades while half-open
    pub probe_size_multiplier: Decimal,
}

impl Default for CircuitBreakerLimits {
    fn default() -> Self {
        Self {
            max_losses: 3,
            max_loss_amount: dec!(5_000),
            cooldown_ms: 300_000, // 5 minutes
            probe_successes_required: 3,
            probe_size_multiplier: dec!(0.25),
        }
    }
}

impl CircuitBreakerLimits {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_losses == 0 {
            return Err("max_losses must be at least 1".to_string());
        }
        if self.max_loss_amount <= Decimal::ZERO {
            return Err("max_loss_amount must be positive".to_string());
        }
        if self.probe_successes_required == 0 {
            return Err("probe_successes_required must be at least 1".to_string());
        }
        if self.probe_size_multiplier <= Decimal::ZERO || self.probe_size_multiplier > Decimal::ONE
        {
            return Err("probe_size_multiplier must be in (0, 1]".to_string());
        }
        check_duration("cooldown_ms", self.cooldown_ms)?;
        Ok(())
    }
}

/// L2 drawdown limits for a track
///
/// Thresholds are fractions of peak equity (0.02 = 2%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawdownLimits {
    /// Drawdown at which the level becomes WARNING (size reduction starts)
    pub caution_drawdown: Decimal,
    /// Drawdown at which the level becomes CRITICAL (reduce-only)
    pub warning_drawdown: Decimal,
    /// Drawdown at which the level becomes HALT for the rest of the day
    pub halt_drawdown: Decimal,
    /// How long drawdown must stay below a lower threshold before the level drops (ms)
    pub stabilization_ms: u64,
    /// Optional absolute daily loss that also halts the track
    pub max_daily_loss: Option<Decimal>,
    /// Floor for the size multiplier while in WARNING
    pub min_size_multiplier: Decimal,
}

impl Default for DrawdownLimits {
    fn default() -> Self {
        Self {
            caution_drawdown: dec!(0.01),
            warning_drawdown: dec!(0.015),
            halt_drawdown: dec!(0.02),
            stabilization_ms: 60_000,
            max_daily_loss: None,
            min_size_multiplier: dec!(0.1),
        }
    }
}

impl DrawdownLimits {
    pub fn validate(&self) -> Result<(), String> {
        if self.caution_drawdown <= Decimal::ZERO {
            return Err("caution_drawdown must be positive".to_string());
        }
        if !(self.caution_drawdown < self.warning_drawdown
            && self.warning_drawdown < self.halt_drawdown)
        {
            return Err(format!(
                "drawdown thresholds must satisfy caution < warning < halt (got {} / {} / {})",
                self.caution_drawdown, self.warning_drawdown, self.halt_drawdown
            ));
        }
        if self.halt_drawdown > Decimal::ONE {
            return Err("halt_drawdown cannot exceed 1.0".to_string());
        }
        if let Some(loss) = self.max_daily_loss
            && loss <= Decimal::ZERO
        {
            return Err("max_daily_loss must be positive".to_string());
        }
        if self.min_size_multiplier < Decimal::ZERO || self.min_size_multiplier > Decimal::ONE {
            return Err("min_size_multiplier must be in [0, 1]".to_string());
        }
        check_duration("stabilization_ms", self.stabilization_ms)?;
        Ok(())
    }

    /// Map a drawdown to a level; the highest threshold reached wins
    pub fn level_for(&self, drawdown: Decimal) -> RiskLevel {
        if drawdown >= self.halt_drawdown {
            RiskLevel::Halt
        } else if drawdown >= self.warning_drawdown {
            RiskLevel::Critical
        } else if drawdown >= self.caution_drawdown {
            RiskLevel::Warning
        } else {
            RiskLevel::Normal
        }
    }

    /// Size multiplier based on current drawdown (1.0 = full, 0.0 = none)
    pub fn size_multiplier(&self, level: RiskLevel, drawdown: Decimal) -> Decimal {
        match level {
            RiskLevel::Normal => Decimal::ONE,
            RiskLevel::Halt => Decimal::ZERO,
            RiskLevel::Warning | RiskLevel::Critical => {
                // Linear reduction from 1.0 at caution to 0.0 at halt
                let range = self.halt_drawdown - self.caution_drawdown;
                if range <= Decimal::ZERO {
                    return self.min_size_multiplier;
                }
                let excess = (drawdown - self.caution_drawdown).max(Decimal::ZERO);
                (Decimal::ONE - excess / range).clamp(self.min_size_multiplier, Decimal::ONE)
            }
        }
    }
}

/// L3 portfolio ceilings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioLimits {
    /// Total notional may not exceed this multiple of account equity
    pub max_account_leverage: Decimal,
    /// Optional absolute ceiling on total notional
    pub max_total_notional: Option<Decimal>,
    /// Default per-instrument notional ceiling
    pub max_instrument_notional: Decimal,
    /// Maximum number of instruments with an open position
    pub max_open_positions: usize,
    /// Aggregate drawdown across all tracks that engages the kill switch
    pub max_account_drawdown: Option<Decimal>,
}

impl Default for PortfolioLimits {
    fn default() -> Self {
        Self {
            max_account_leverage: dec!(5.0),
            max_total_notional: None,
            max_instrument_notional: dec!(1_000_000),
            max_open_positions: 10,
            max_account_drawdown: None,
        }
    }
}

impl PortfolioLimits {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_account_leverage <= Decimal::ZERO {
            return Err("max_account_leverage must be positive".to_string());
        }
        if let Some(total) = self.max_total_notional
            && total <= Decimal::ZERO
        {
            return Err("max_total_notional must be positive".to_string());
        }
        if self.max_instrument_notional <= Decimal::ZERO {
            return Err("max_instrument_notional must be positive".to_string());
        }
        if self.max_open_positions == 0 {
            return Err("max_open_positions must be at least 1".to_string());
        }
        if let Some(dd) = self.max_account_drawdown
            && (dd <= Decimal::ZERO || dd > Decimal::ONE)
        {
            return Err("max_account_drawdown must be in (0, 1]".to_string());
        }
        Ok(())
    }
}
