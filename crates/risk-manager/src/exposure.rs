//! Portfolio exposure monitor (L3)
//!
//! Checks are speculative: [`ExposureMonitor::check`] projects the
//! post-trade exposure without touching state. Only a confirmed fill,
//! through [`ExposureMonitor::apply_fill`], changes the stored totals.

use rust_decimal::Decimal;
use sentinel_core::{ExposureState, InstrumentId, Notional, RiskContext};

use crate::error::{Result, RiskError};
use crate::parameters::PortfolioLimits;

/// Hypothetical exposure after a trade
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureProjection {
    pub total_notional: Notional,
    pub instrument_notional: Notional,
    pub open_position_count: usize,
}

/// Result of a speculative exposure check
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureCheck {
    pub projection: ExposureProjection,
    /// Human-readable description of every ceiling the trade would breach
    pub breaches: Vec<String>,
}

impl ExposureCheck {
    pub fn passed(&self) -> bool {
        self.breaches.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExposureMonitor {
    state: ExposureState,
}

impl ExposureMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ExposureState {
        &self.state
    }

    pub fn check_integrity(&self) -> Result<()> {
        if !self.state.is_consistent() {
            return Err(RiskError::CorruptedState {
                subject: "portfolio".to_string(),
                detail: format!(
                    "total notional {} does not match per-instrument sum",
                    self.state.total_notional
                ),
            });
        }
        Ok(())
    }

    pub fn restore(&mut self, state: ExposureState) -> Result<()> {
        let candidate = ExposureMonitor { state };
        candidate.check_integrity()?;
        *self = candidate;
        Ok(())
    }

    /// Project the exposure the portfolio would carry after `ctx` fills
    pub fn project(&self, ctx: &RiskContext) -> Result<ExposureProjection> {
        let current = self.state.instrument_notional(&ctx.instrument_id);
        let overflow = || RiskError::Arithmetic(format!("exposure projection for {}", ctx.instrument_id));

        let instrument_notional = if ctx.reduces_position {
            (current - ctx.proposed_notional).max(Decimal::ZERO)
        } else {
            current.checked_add(ctx.proposed_notional).ok_or_else(overflow)?
        };
        let total_notional = self
            .state
            .total_notional
            .checked_sub(current)
            .and_then(|t| t.checked_add(instrument_notional))
            .ok_or_else(overflow)?;

        let was_open = !current.is_zero();
        let is_open = !instrument_notional.is_zero();
        let open_position_count = match (was_open, is_open) {
            (false, true) => self.state.open_position_count + 1,
            (true, false) => self.state.open_position_count.saturating_sub(1),
            _ => self.state.open_position_count,
        };

        Ok(ExposureProjection {
            total_notional,
            instrument_notional,
            open_position_count,
        })
    }

    /// Speculatively check `ctx` against the portfolio ceilings.
    ///
    /// Orders that reduce a position never breach.
    pub fn check(
        &self,
        ctx: &RiskContext,
        limits: &PortfolioLimits,
        instrument_cap: Decimal,
        account_equity: Decimal,
    ) -> Result<ExposureCheck> {
        let projection = self.project(ctx)?;
        let mut breaches = Vec::new();

        if !ctx.reduces_position {
            if account_equity <= Decimal::ZERO {
                breaches.push(format!("account equity {} is not positive", account_equity));
            } else {
                let ceiling = limits
                    .max_account_leverage
                    .checked_mul(account_equity)
                    .ok_or_else(|| RiskError::Arithmetic("leverage ceiling".to_string()))?;
                if projection.total_notional > ceiling {
                    breaches.push(format!(
                        "total notional {} exceeds {}x equity {} ({:.2}x)",
                        projection.total_notional,
                        limits.max_account_leverage,
                        account_equity,
                        projection.total_notional / account_equity
                    ));
                }
            }
            if let Some(max_total) = limits.max_total_notional
                && projection.total_notional > max_total
            {
                breaches.push(format!(
                    "total notional {} exceeds ceiling {}",
                    projection.total_notional, max_total
                ));
            }
            if projection.instrument_notional > instrument_cap {
                breaches.push(format!(
                    "{} notional {} exceeds ceiling {}",
                    ctx.instrument_id, projection.instrument_notional, instrument_cap
                ));
            }
            if projection.open_position_count > limits.max_open_positions {
                breaches.push(format!(
                    "{} open positions exceeds limit {}",
                    projection.open_position_count, limits.max_open_positions
                ));
            }
        }

        Ok(ExposureCheck {
            projection,
            breaches,
        })
    }

    /// Commit a confirmed fill
    pub fn apply_fill(&mut self, ctx: &RiskContext) -> Result<()> {
        let projection = self.project(ctx)?;
        self.set_instrument(&ctx.instrument_id, projection.instrument_notional);
        self.state.total_notional = projection.total_notional;
        self.state.open_position_count = projection.open_position_count;
        Ok(())
    }

    fn set_instrument(&mut self, instrument_id: &InstrumentId, notional: Notional) {
        if notional.is_zero() {
            self.state.per_instrument_notional.remove(instrument_id);
        } else {
            self.state
                .per_instrument_notional
                .insert(instrument_id.clone(), notional);
        }
    }
}
