//! Per-track drawdown monitor (L2)
//!
//! Tracks peak and current equity for one track and maps the drawdown from
//! peak to a [`RiskLevel`]. Raising the level is immediate; lowering it waits
//! out `stabilization_ms` so the level does not flap around a threshold.
//! HALT sticks until the next daily reset.

use rust_decimal::Decimal;
use sentinel_core::{AccountRiskState, RiskLevel, Timestamp, TrackId};

use crate::error::{Result, RiskError};
use crate::parameters::{DrawdownLimits, duration_ms};

/// A committed level change, for the manager to publish
#[derive(Debug, Clone, PartialEq)]
pub struct LevelChange {
    pub from: RiskLevel,
    pub to: RiskLevel,
    pub drawdown: Decimal,
    pub reason: String,
}

impl LevelChange {
    pub fn is_raise(&self) -> bool {
        self.to > self.from
    }
}

#[derive(Debug, Clone)]
pub struct DrawdownMonitor {
    track_id: TrackId,
    state: AccountRiskState,
}

impl DrawdownMonitor {
    pub fn new(track_id: impl Into<TrackId>, starting_equity: Decimal) -> Self {
        Self {
            track_id: track_id.into(),
            state: AccountRiskState::new(starting_equity),
        }
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn state(&self) -> &AccountRiskState {
        &self.state
    }

    pub fn level(&self) -> RiskLevel {
        self.state.risk_level
    }

    pub fn drawdown(&self) -> Decimal {
        self.state.drawdown()
    }

    pub fn check_integrity(&self) -> Result<()> {
        Self::verify(&self.track_id, &self.state)
    }

    fn verify(track_id: &str, state: &AccountRiskState) -> Result<()> {
        if state.current_equity > state.peak_equity {
            return Err(RiskError::CorruptedState {
                subject: track_id.to_string(),
                detail: format!(
                    "current equity {} above peak {}",
                    state.current_equity, state.peak_equity
                ),
            });
        }
        Ok(())
    }

    pub fn restore(&mut self, state: AccountRiskState) -> Result<()> {
        Self::verify(&self.track_id, &state)?;
        self.state = state;
        Ok(())
    }

    /// Mark the track to a new equity value
    pub fn update_equity(
        &mut self,
        equity: Decimal,
        limits: &DrawdownLimits,
        now: Timestamp,
    ) -> Result<Option<LevelChange>> {
        self.check_integrity()?;
        self.state.daily_pnl = equity
            .checked_sub(self.state.starting_equity)
            .ok_or_else(|| RiskError::Arithmetic(format!("daily pnl on {}", self.track_id)))?;
        self.state.current_equity = equity;
        if equity > self.state.peak_equity {
            self.state.peak_equity = equity;
        }
        Ok(self.reassess(limits, now))
    }

    /// Apply a realised trade result to the track's equity
    pub fn apply_pnl(
        &mut self,
        pnl: Decimal,
        limits: &DrawdownLimits,
        now: Timestamp,
    ) -> Result<Option<LevelChange>> {
        let equity = self
            .state
            .current_equity
            .checked_add(pnl)
            .ok_or_else(|| RiskError::Arithmetic(format!("equity on {}", self.track_id)))?;
        self.update_equity(equity, limits, now)
    }

    /// Re-evaluate the level without an equity change (lets a pending
    /// downgrade complete once the stabilization period has passed)
    pub fn settle(&mut self, limits: &DrawdownLimits, now: Timestamp) -> Option<LevelChange> {
        if self.state.downgrade_pending_since.is_none() {
            return None;
        }
        self.reassess(limits, now)
    }

    /// Start a new trading day at `starting_equity`
    pub fn reset_daily(&mut self, starting_equity: Decimal) -> Option<LevelChange> {
        let from = self.state.risk_level;
        self.state = AccountRiskState::new(starting_equity);
        (from != RiskLevel::Normal).then(|| LevelChange {
            from,
            to: RiskLevel::Normal,
            drawdown: Decimal::ZERO,
            reason: "daily reset".to_string(),
        })
    }

    fn target_level(&self, limits: &DrawdownLimits, drawdown: Decimal) -> (RiskLevel, String) {
        if let Some(max_loss) = limits.max_daily_loss
            && self.state.daily_pnl <= -max_loss
        {
            return (
                RiskLevel::Halt,
                format!(
                    "daily loss {} reached limit {}",
                    -self.state.daily_pnl, max_loss
                ),
            );
        }
        let level = limits.level_for(drawdown);
        let reason = format!(
            "drawdown {:.2}% (caution {:.2}% / warning {:.2}% / halt {:.2}%)",
            drawdown * Decimal::ONE_HUNDRED,
            limits.caution_drawdown * Decimal::ONE_HUNDRED,
            limits.warning_drawdown * Decimal::ONE_HUNDRED,
            limits.halt_drawdown * Decimal::ONE_HUNDRED,
        );
        (level, reason)
    }

    fn reassess(&mut self, limits: &DrawdownLimits, now: Timestamp) -> Option<LevelChange> {
        let current = self.state.risk_level;
        // Terminal for the day
        if current == RiskLevel::Halt {
            return None;
        }

        let drawdown = self.state.drawdown();
        let (target, reason) = self.target_level(limits, drawdown);

        if target > current {
            self.state.downgrade_pending_since = None;
            return Some(self.commit(current, target, drawdown, reason));
        }
        if target == current {
            self.state.downgrade_pending_since = None;
            return None;
        }

        match self.state.downgrade_pending_since {
            None => {
                self.state.downgrade_pending_since = Some(now);
                None
            }
            Some(since)
                if duration_ms(limits.stabilization_ms)
                    .is_some_and(|period| now - since >= period) =>
            {
                self.state.downgrade_pending_since = None;
                let reason = format!("{} stable for {}ms", reason, limits.stabilization_ms);
                Some(self.commit(current, target, drawdown, reason))
            }
            Some(_) => None,
        }
    }

    fn commit(
        &mut self,
        from: RiskLevel,
        to: RiskLevel,
        drawdown: Decimal,
        reason: String,
    ) -> LevelChange {
        self.state.risk_level = to;
        self.state.level_reason = Some(reason.clone());
        LevelChange {
            from,
            to,
            drawdown,
            reason,
        }
    }
}
