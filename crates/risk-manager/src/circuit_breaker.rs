//! Per-instrument circuit breaker (L1)
//!
//! ```text
//!            losses >= max_losses
//!            or net loss >= max_loss_amount
//!   CLOSED ──────────────────────────────► OPEN
//!     ▲                                   │  ▲
//!     │ probe_successes_required          │  │ any probe
//!     │ consecutive wins                  │  │ failure
//!     │                    cooldown_ms    ▼  │
//!     └──────────────────────────────── HALF_OPEN
//! ```
//!
//! The breaker itself is plain data plus transition logic. The risk manager
//! wraps each one in its own lock and publishes the state byte to an atomic
//! so that `is_safe` never has to take the lock.

use rust_decimal::Decimal;
use sentinel_core::{CircuitBreakerState, CircuitState, InstrumentId, Timestamp};

use crate::error::{Result, RiskError};
use crate::parameters::{CircuitBreakerLimits, duration_ms};

/// A state change produced by the breaker, for the manager to publish
#[derive(Debug, Clone, PartialEq)]
pub enum BreakerTransition {
    /// CLOSED -> OPEN
    Opened { reason: String },
    /// OPEN -> HALF_OPEN after the cooldown (or forced by a daily reset)
    HalfOpened { reason: String },
    /// HALF_OPEN -> CLOSED after enough successful probes
    Closed { reason: String },
    /// HALF_OPEN -> OPEN on a probe failure
    Reopened { reason: String },
    /// Operator override
    Forced { to: CircuitState, reason: String },
}

impl BreakerTransition {
    pub fn to_state(&self) -> CircuitState {
        match self {
            BreakerTransition::Opened { .. } | BreakerTransition::Reopened { .. } => {
                CircuitState::Open
            }
            BreakerTransition::HalfOpened { .. } => CircuitState::HalfOpen,
            BreakerTransition::Closed { .. } => CircuitState::Closed,
            BreakerTransition::Forced { to, .. } => *to,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            BreakerTransition::Opened { reason }
            | BreakerTransition::HalfOpened { reason }
            | BreakerTransition::Closed { reason }
            | BreakerTransition::Reopened { reason }
            | BreakerTransition::Forced { reason, .. } => reason,
        }
    }
}

/// Circuit breaker for a single instrument
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    instrument_id: InstrumentId,
    state: CircuitBreakerState,
}

impl CircuitBreaker {
    pub fn new(instrument_id: impl Into<InstrumentId>) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            state: CircuitBreakerState::default(),
        }
    }

    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    pub fn state(&self) -> &CircuitBreakerState {
        &self.state
    }

    pub fn current(&self) -> CircuitState {
        self.state.state
    }

    /// Replace the state wholesale (checkpoint restore). The record must pass
    /// the integrity check first.
    pub fn restore(&mut self, state: CircuitBreakerState) -> Result<()> {
        Self::verify(&self.instrument_id, &state)?;
        self.state = state;
        Ok(())
    }

    /// When the cooldown of an OPEN breaker ends.
    ///
    /// `None` when the breaker is not OPEN, or when the end lies beyond the
    /// representable time range (the breaker then never recovers on its own).
    pub fn cooldown_ends_at(&self, limits: &CircuitBreakerLimits) -> Option<Timestamp> {
        match self.state.state {
            CircuitState::Open => {
                let opened_at = self.state.opened_at?;
                opened_at.checked_add_signed(duration_ms(limits.cooldown_ms)?)
            }
            _ => None,
        }
    }

    /// State as observed at `now`, without committing anything.
    ///
    /// An OPEN breaker whose cooldown has elapsed reports HALF_OPEN. One whose
    /// cooldown end cannot be computed stays OPEN.
    pub fn effective_state(&self, limits: &CircuitBreakerLimits, now: Timestamp) -> CircuitState {
        match self.cooldown_ends_at(limits) {
            Some(ends) if now >= ends => CircuitState::HalfOpen,
            _ => self.state.state,
        }
    }

    /// Pure read: may a new order be tried on this instrument right now
    pub fn is_safe(&self, limits: &CircuitBreakerLimits, now: Timestamp) -> bool {
        if self.check_integrity().is_err() {
            return false;
        }
        self.effective_state(limits, now) != CircuitState::Open
    }

    pub fn check_integrity(&self) -> Result<()> {
        Self::verify(&self.instrument_id, &self.state)
    }

    fn verify(instrument_id: &str, state: &CircuitBreakerState) -> Result<()> {
        let corrupted = |detail: &str| RiskError::CorruptedState {
            subject: instrument_id.to_string(),
            detail: detail.to_string(),
        };
        match state.state {
            CircuitState::Open if state.opened_at.is_none() => {
                Err(corrupted("breaker is OPEN without an opened_at timestamp"))
            }
            CircuitState::Closed if state.half_open_probe_count != 0 => {
                Err(corrupted("probe count set while CLOSED"))
            }
            _ => Ok(()),
        }
    }

    /// Commit OPEN -> HALF_OPEN if the cooldown has elapsed
    pub fn poll(
        &mut self,
        limits: &CircuitBreakerLimits,
        now: Timestamp,
    ) -> Option<BreakerTransition> {
        if self.state.state == CircuitState::Open
            && self.effective_state(limits, now) == CircuitState::HalfOpen
        {
            let reason = format!("cooldown of {}ms elapsed, probing", limits.cooldown_ms);
            self.enter_half_open(&reason);
            return Some(BreakerTransition::HalfOpened { reason });
        }
        None
    }

    /// Record the outcome of a trade and apply any resulting transition
    pub fn record_trade(
        &mut self,
        is_win: bool,
        pnl: Decimal,
        limits: &CircuitBreakerLimits,
        now: Timestamp,
    ) -> Result<Option<BreakerTransition>> {
        self.check_integrity()?;
        let polled = self.poll(limits, now);

        // Net: wins pay losses back
        self.state.cumulative_loss = self
            .state
            .cumulative_loss
            .checked_sub(pnl)
            .ok_or_else(|| {
                RiskError::Arithmetic(format!("cumulative loss on {}", self.instrument_id))
            })?;

        let transition = match self.state.state {
            CircuitState::Closed => {
                if is_win {
                    self.state.consecutive_losses = 0;
                    None
                } else {
                    self.state.consecutive_losses = self.state.consecutive_losses.saturating_add(1);
                    self.trip_reason(limits).map(|reason| {
                        self.open(now, &reason);
                        BreakerTransition::Opened { reason }
                    })
                }
            }
            // Late results for orders sent before the breaker opened
            CircuitState::Open => {
                if !is_win {
                    self.state.consecutive_losses = self.state.consecutive_losses.saturating_add(1);
                }
                None
            }
            CircuitState::HalfOpen => {
                if is_win {
                    self.state.consecutive_losses = 0;
                    self.state.half_open_probe_count += 1;
                    if self.state.half_open_probe_count >= limits.probe_successes_required {
                        let reason = format!(
                            "{} consecutive successful probes",
                            self.state.half_open_probe_count
                        );
                        self.close(&reason);
                        Some(BreakerTransition::Closed { reason })
                    } else {
                        None
                    }
                } else {
                    let reason = format!(
                        "probe failed after {} successful probe(s) (pnl {})",
                        self.state.half_open_probe_count, pnl
                    );
                    self.state.consecutive_losses = self.state.consecutive_losses.saturating_add(1);
                    self.open(now, &reason);
                    Some(BreakerTransition::Reopened { reason })
                }
            }
        };

        // A poll followed by no further change is still a transition to report
        Ok(transition.or(polled))
    }

    fn trip_reason(&self, limits: &CircuitBreakerLimits) -> Option<String> {
        if self.state.consecutive_losses >= limits.max_losses {
            Some(format!(
                "{} consecutive losses (limit {})",
                self.state.consecutive_losses, limits.max_losses
            ))
        } else if self.state.cumulative_loss >= limits.max_loss_amount {
            Some(format!(
                "net loss {} reached limit {}",
                self.state.cumulative_loss, limits.max_loss_amount
            ))
        } else {
            None
        }
    }

    /// Operator override to OPEN or CLOSED. HALF_OPEN cannot be forced.
    pub fn force(
        &mut self,
        target: CircuitState,
        reason: &str,
        now: Timestamp,
    ) -> Result<BreakerTransition> {
        let from = self.state.state;
        let reason = format!("manual override: {}", reason);
        match target {
            CircuitState::Open => self.open(now, &reason),
            CircuitState::Closed => self.close(&reason),
            CircuitState::HalfOpen => {
                return Err(RiskError::InvalidTransition {
                    subject: self.instrument_id.clone(),
                    from,
                    to: target,
                    reason: "HALF_OPEN is only reachable through the cooldown".to_string(),
                });
            }
        }
        Ok(BreakerTransition::Forced { to: target, reason })
    }

    /// Validated transition request: only succeeds if the breaker's own
    /// criteria for the transition are met at `now`.
    pub fn request_transition(
        &mut self,
        target: CircuitState,
        limits: &CircuitBreakerLimits,
        now: Timestamp,
    ) -> Result<Option<BreakerTransition>> {
        self.check_integrity()?;
        let from = self.state.state;
        let subject = self.instrument_id.clone();
        let refuse = |reason: String| RiskError::InvalidTransition {
            subject: subject.clone(),
            from,
            to: target,
            reason,
        };

        match (from, target) {
            (a, b) if a == b => Ok(None),
            (CircuitState::Closed, CircuitState::Open) => match self.trip_reason(limits) {
                Some(reason) => {
                    self.open(now, &reason);
                    Ok(Some(BreakerTransition::Opened { reason }))
                }
                None => Err(refuse("trip criteria not met".to_string())),
            },
            (CircuitState::Open, CircuitState::HalfOpen) => match self.poll(limits, now) {
                Some(transition) => Ok(Some(transition)),
                None => Err(refuse(format!(
                    "cooldown of {}ms has not elapsed",
                    limits.cooldown_ms
                ))),
            },
            (CircuitState::HalfOpen, CircuitState::Closed) => {
                if self.state.half_open_probe_count >= limits.probe_successes_required {
                    let reason = "probe criteria met".to_string();
                    self.close(&reason);
                    Ok(Some(BreakerTransition::Closed { reason }))
                } else {
                    Err(refuse(format!(
                        "{}/{} successful probes",
                        self.state.half_open_probe_count, limits.probe_successes_required
                    )))
                }
            }
            _ => Err(refuse("not a valid breaker transition".to_string())),
        }
    }

    /// Start-of-day reset: loss counters are zeroed and an OPEN breaker gets a
    /// probe opportunity.
    pub fn reset_daily(&mut self) -> Option<BreakerTransition> {
        self.state.consecutive_losses = 0;
        self.state.cumulative_loss = Decimal::ZERO;
        if self.state.state == CircuitState::Open {
            let reason = "daily reset".to_string();
            self.enter_half_open(&reason);
            return Some(BreakerTransition::HalfOpened { reason });
        }
        None
    }

    fn open(&mut self, now: Timestamp, reason: &str) {
        self.state.state = CircuitState::Open;
        self.state.opened_at = Some(now);
        self.state.half_open_probe_count = 0;
        self.state.last_reason = Some(reason.to_string());
    }

    fn enter_half_open(&mut self, reason: &str) {
        self.state.state = CircuitState::HalfOpen;
        self.state.half_open_probe_count = 0;
        self.state.last_reason = Some(reason.to_string());
    }

    fn close(&mut self, reason: &str) {
        self.state = CircuitBreakerState {
            last_reason: Some(reason.to_string()),
            ..CircuitBreakerState::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap()
    }

    fn limits() -> CircuitBreakerLimits {
        CircuitBreakerLimits {
            max_losses: 3,
            max_loss_amount: dec!(1_000),
            cooldown_ms: 60_000,
            probe_successes_required: 3,
            probe_size_multiplier: dec!(0.25),
        }
    }

    fn tripped() -> CircuitBreaker {
        let mut cb = CircuitBreaker::new("EUR-USD");
        for _ in 0..3 {
            cb.record_trade(false, dec!(-10), &limits(), t0()).unwrap();
        }
        cb
    }

    #[test]
    fn test_opens_after_max_losses() {
        let mut cb = CircuitBreaker::new("EUR-USD");
        let l = limits();
        assert_eq!(cb.record_trade(false, dec!(-10), &l, t0()).unwrap(), None);
        assert_eq!(cb.record_trade(false, dec!(-10), &l, t0()).unwrap(), None);
        let transition = cb.record_trade(false, dec!(-10), &l, t0()).unwrap();
        assert!(matches!(transition, Some(BreakerTransition::Opened { .. })));
        assert_eq!(cb.current(), CircuitState::Open);
        assert_eq!(cb.state().opened_at, Some(t0()));
        assert!(!cb.is_safe(&l, t0()));
    }

    #[test]
    fn test_win_resets_consecutive_losses() {
        let mut cb = CircuitBreaker::new("EUR-USD");
        let l = limits();
        cb.record_trade(false, dec!(-10), &l, t0()).unwrap();
        cb.record_trade(false, dec!(-10), &l, t0()).unwrap();
        cb.record_trade(true, dec!(5), &l, t0()).unwrap();
        cb.record_trade(false, dec!(-10), &l, t0()).unwrap();
        assert_eq!(cb.current(), CircuitState::Closed);
        assert_eq!(cb.state().consecutive_losses, 1);
        assert_eq!(cb.state().cumulative_loss, dec!(25));
    }

    #[test]
    fn test_opens_on_cumulative_loss() {
        let mut cb = CircuitBreaker::new("EUR-USD");
        let transition = cb
            .record_trade(false, dec!(-1_200), &limits(), t0())
            .unwrap();
        assert!(matches!(transition, Some(BreakerTransition::Opened { .. })));
        assert!(cb.state().last_reason.as_deref().unwrap().contains("net loss"));
    }

    #[test]
    fn test_wins_offset_cumulative_loss() {
        let mut cb = CircuitBreaker::new("EUR-USD");
        let l = CircuitBreakerLimits {
            max_losses: 10,
            max_loss_amount: dec!(5_000),
            ..limits()
        };
        for pnl in [dec!(-2_000), dec!(2_000), dec!(-2_000), dec!(2_000), dec!(-1_000)] {
            cb.record_trade(pnl >= Decimal::ZERO, pnl, &l, t0()).unwrap();
        }
        assert_eq!(cb.state().cumulative_loss, dec!(1_000));
        assert_eq!(cb.current(), CircuitState::Closed);

        // A net profit carries forward as headroom
        cb.record_trade(true, dec!(3_000), &l, t0()).unwrap();
        assert_eq!(cb.state().cumulative_loss, dec!(-2_000));
        cb.record_trade(false, dec!(-6_000), &l, t0()).unwrap();
        assert_eq!(cb.current(), CircuitState::Closed);
        let transition = cb.record_trade(false, dec!(-1_000), &l, t0()).unwrap();
        assert!(matches!(transition, Some(BreakerTransition::Opened { .. })));
        assert_eq!(cb.state().cumulative_loss, dec!(5_000));
    }

    #[test]
    fn test_unsafe_for_full_cooldown() {
        let cb = tripped();
        let l = limits();
        assert!(!cb.is_safe(&l, t0() + Duration::milliseconds(59_999)));
        assert!(cb.is_safe(&l, t0() + Duration::milliseconds(60_000)));
        // is_safe is a pure read
        assert_eq!(cb.current(), CircuitState::Open);
    }

    #[test]
    fn test_unrepresentable_cooldown_stays_open() {
        let mut cb = CircuitBreaker::new("EUR-USD");
        cb.force(CircuitState::Open, "desk halt", t0()).unwrap();
        let far_future = t0() + Duration::days(3_650);

        // Cooldowns that overflow i64 or the calendar never elapse
        for cooldown_ms in [u64::MAX, 10_000_000_000_000_000] {
            let l = CircuitBreakerLimits {
                cooldown_ms,
                ..limits()
            };
            assert_eq!(cb.cooldown_ends_at(&l), None);
            assert_eq!(cb.effective_state(&l, far_future), CircuitState::Open);
            assert!(!cb.is_safe(&l, far_future));
            assert!(cb.poll(&l, far_future).is_none());
        }
    }

    #[test]
    fn test_poll_commits_half_open_after_cooldown() {
        let mut cb = tripped();
        let l = limits();
        assert!(cb.poll(&l, t0() + Duration::seconds(30)).is_none());
        let transition = cb.poll(&l, t0() + Duration::seconds(60));
        assert!(matches!(transition, Some(BreakerTransition::HalfOpened { .. })));
        assert_eq!(cb.current(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_closes_after_probes() {
        let mut cb = tripped();
        let l = limits();
        let later = t0() + Duration::seconds(61);
        cb.record_trade(true, dec!(5), &l, later).unwrap();
        assert_eq!(cb.current(), CircuitState::HalfOpen);
        cb.record_trade(true, dec!(5), &l, later).unwrap();
        let transition = cb.record_trade(true, dec!(5), &l, later).unwrap();
        assert!(matches!(transition, Some(BreakerTransition::Closed { .. })));
        assert_eq!(cb.state().consecutive_losses, 0);
        assert_eq!(cb.state().cumulative_loss, Decimal::ZERO);
        assert_eq!(cb.state().opened_at, None);
    }

    #[test]
    fn test_single_probe_failure_reopens() {
        let mut cb = tripped();
        let l = limits();
        let later = t0() + Duration::seconds(61);
        cb.record_trade(true, dec!(5), &l, later).unwrap();
        cb.record_trade(true, dec!(5), &l, later).unwrap();
        assert_eq!(cb.state().half_open_probe_count, 2);

        let transition = cb.record_trade(false, dec!(-5), &l, later).unwrap();
        assert!(matches!(transition, Some(BreakerTransition::Reopened { .. })));
        assert_eq!(cb.current(), CircuitState::Open);
        assert_eq!(cb.state().half_open_probe_count, 0);
        assert_eq!(cb.state().opened_at, Some(later));
    }

    #[test]
    fn test_cannot_request_half_open_early() {
        let mut cb = tripped();
        let l = limits();
        let result = cb.request_transition(
            CircuitState::HalfOpen,
            &l,
            t0() + Duration::seconds(10),
        );
        assert!(matches!(result, Err(RiskError::InvalidTransition { .. })));
        assert_eq!(cb.current(), CircuitState::Open);
    }

    #[test]
    fn test_cannot_close_half_open_without_probes() {
        let mut cb = tripped();
        let l = limits();
        let later = t0() + Duration::seconds(61);
        cb.poll(&l, later);
        cb.record_trade(true, dec!(5), &l, later).unwrap();

        let result = cb.request_transition(CircuitState::Closed, &l, later);
        assert!(matches!(result, Err(RiskError::InvalidTransition { .. })));
        assert_eq!(cb.current(), CircuitState::HalfOpen);
        assert_eq!(cb.state().half_open_probe_count, 1);
    }

    #[test]
    fn test_force_open_and_close() {
        let mut cb = CircuitBreaker::new("EUR-USD");
        let t = cb.force(CircuitState::Open, "desk halt", t0()).unwrap();
        assert_eq!(t.to_state(), CircuitState::Open);
        assert!(t.reason().contains("desk halt"));
        assert_eq!(cb.state().opened_at, Some(t0()));

        cb.force(CircuitState::Closed, "all clear", t0()).unwrap();
        assert_eq!(cb.current(), CircuitState::Closed);
        assert!(cb.force(CircuitState::HalfOpen, "nope", t0()).is_err());
    }

    #[test]
    fn test_corrupted_state_is_unsafe() {
        let mut cb = CircuitBreaker::new("EUR-USD");
        cb.state.state = CircuitState::Open;
        cb.state.opened_at = None;
        assert!(!cb.is_safe(&limits(), t0()));
        assert!(matches!(
            cb.record_trade(true, dec!(1), &limits(), t0()),
            Err(RiskError::CorruptedState { .. })
        ));
    }

    #[test]
    fn test_reset_daily_moves_open_to_half_open() {
        let mut cb = tripped();
        let transition = cb.reset_daily();
        assert!(matches!(transition, Some(BreakerTransition::HalfOpened { .. })));
        assert_eq!(cb.current(), CircuitState::HalfOpen);
        assert_eq!(cb.state().consecutive_losses, 0);
    }

    #[test]
    fn test_restore_rejects_corrupted_record() {
        let mut cb = CircuitBreaker::new("EUR-USD");
        let bad = CircuitBreakerState {
            state: CircuitState::Open,
            ..Default::default()
        };
        assert!(cb.restore(bad).is_err());
        assert_eq!(cb.current(), CircuitState::Closed);
    }
}
