//! The closed set of risk layers and their verdicts.
//!
//! Each layer turns its own state into a [`Verdict`]. The manager walks
//! [`RiskLayer::ORDERED`] and stops at the first verdict that is not a plain
//! ALLOW, so adding a layer means adding a variant here and an arm in the
//! manager's match.

use rust_decimal::Decimal;
use sentinel_core::{CircuitState, EventSource, RiskAction, RiskLevel, Timestamp};

use crate::exposure::ExposureCheck;
use crate::parameters::{CircuitBreakerLimits, DrawdownLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiskLayer {
    CircuitBreaker,
    Drawdown,
    Exposure,
}

impl RiskLayer {
    /// Evaluation order
    pub const ORDERED: [RiskLayer; 3] = [
        RiskLayer::CircuitBreaker,
        RiskLayer::Drawdown,
        RiskLayer::Exposure,
    ];

    pub fn source(&self) -> EventSource {
        match self {
            RiskLayer::CircuitBreaker => EventSource::L1,
            RiskLayer::Drawdown => EventSource::L2,
            RiskLayer::Exposure => EventSource::L3,
        }
    }
}

impl std::fmt::Display for RiskLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLayer::CircuitBreaker => "L1 circuit breaker",
            RiskLayer::Drawdown => "L2 drawdown",
            RiskLayer::Exposure => "L3 exposure",
        };
        f.write_str(s)
    }
}

/// One layer's opinion on a proposed order
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub layer: RiskLayer,
    pub action: RiskAction,
    pub multiplier: Decimal,
    pub reason: Option<String>,
}

impl Verdict {
    pub fn allow(layer: RiskLayer) -> Self {
        Self {
            layer,
            action: RiskAction::Allow,
            multiplier: Decimal::ONE,
            reason: None,
        }
    }

    pub fn scaled(layer: RiskLayer, multiplier: Decimal, reason: String) -> Self {
        Self {
            layer,
            action: RiskAction::Allow,
            multiplier,
            reason: Some(reason),
        }
    }

    pub fn block(layer: RiskLayer, action: RiskAction, reason: String) -> Self {
        let multiplier = match action {
            RiskAction::Reject => Decimal::ZERO,
            _ => Decimal::ONE,
        };
        Self {
            layer,
            action,
            multiplier,
            reason: Some(reason),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.action == RiskAction::Allow
    }

    /// Reason prefixed with the layer name
    pub fn describe(&self) -> Option<String> {
        self.reason.as_ref().map(|r| format!("{}: {}", self.layer, r))
    }
}

/// L1 verdict for a breaker observed in `state` at `now`
pub fn breaker_verdict(
    state: CircuitState,
    limits: &CircuitBreakerLimits,
    cooldown_ends_at: Option<Timestamp>,
    last_reason: Option<&str>,
    now: Timestamp,
) -> Verdict {
    let layer = RiskLayer::CircuitBreaker;
    match state {
        CircuitState::Closed => Verdict::allow(layer),
        CircuitState::HalfOpen => Verdict::scaled(
            layer,
            limits.probe_size_multiplier,
            format!("half-open probe at {}x size", limits.probe_size_multiplier),
        ),
        CircuitState::Open => {
            let remaining = match cooldown_ends_at {
                Some(ends) => format!("{}ms of cooldown left", (ends - now).num_milliseconds().max(0)),
                None => "no scheduled recovery".to_string(),
            };
            Verdict::block(
                layer,
                RiskAction::Reject,
                format!(
                    "breaker OPEN ({}), {}",
                    last_reason.unwrap_or("no reason recorded"),
                    remaining
                ),
            )
        }
    }
}

/// L2 verdict for a track at `level`
pub fn drawdown_verdict(
    level: RiskLevel,
    drawdown: Decimal,
    limits: &DrawdownLimits,
    level_reason: Option<&str>,
) -> Verdict {
    let layer = RiskLayer::Drawdown;
    let reason = || level_reason.unwrap_or("drawdown threshold reached").to_string();
    match level {
        RiskLevel::Normal => Verdict::allow(layer),
        RiskLevel::Warning => {
            let multiplier = limits.size_multiplier(level, drawdown);
            Verdict::scaled(
                layer,
                multiplier,
                format!("WARNING, size scaled to {}: {}", multiplier.round_dp(4), reason()),
            )
        }
        RiskLevel::Critical => Verdict::block(
            layer,
            RiskAction::ReduceOnly,
            format!("CRITICAL, reduce only: {}", reason()),
        ),
        RiskLevel::Halt => Verdict::block(
            layer,
            RiskAction::Reject,
            format!("HALT for the day: {}", reason()),
        ),
    }
}

/// L3 verdict from a speculative exposure check
pub fn exposure_verdict(check: &ExposureCheck) -> Verdict {
    let layer = RiskLayer::Exposure;
    if check.passed() {
        Verdict::allow(layer)
    } else {
        Verdict::block(layer, RiskAction::Reject, check.breaches.join("; "))
    }
}
