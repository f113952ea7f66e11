use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::RiskContext;
use crate::values::Timestamp;

/// What the calling loop is allowed to do with its proposed order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskAction {
    /// Proceed (possibly at a reduced size, see `risk_multiplier`)
    Allow,
    /// Only orders that shrink an existing position may proceed
    ReduceOnly,
    /// Trading must stop and positions should be flattened
    ForceClose,
    /// Discard the order
    Reject,
}

impl RiskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskAction::Allow => "ALLOW",
            RiskAction::ReduceOnly => "REDUCE_ONLY",
            RiskAction::ForceClose => "FORCE_CLOSE",
            RiskAction::Reject => "REJECT",
        }
    }
}

impl std::fmt::Display for RiskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combined verdict of all risk layers for one `RiskContext`.
///
/// Consumed once by the calling loop and must not be acted upon past
/// `valid_until`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub action: RiskAction,
    /// Size scaling in [0, 1]
    pub risk_multiplier: Decimal,
    /// Ordered explanation chain, outermost check first
    pub reasons: Vec<String>,
    pub valid_until: Timestamp,
}

impl RiskDecision {
    pub fn new(
        action: RiskAction,
        risk_multiplier: Decimal,
        reasons: Vec<String>,
        valid_until: Timestamp,
    ) -> Self {
        Self {
            action,
            risk_multiplier: risk_multiplier.clamp(Decimal::ZERO, Decimal::ONE),
            reasons,
            valid_until,
        }
    }

    pub fn allow(risk_multiplier: Decimal, valid_until: Timestamp) -> Self {
        Self::new(RiskAction::Allow, risk_multiplier, Vec::new(), valid_until)
    }

    /// Rejection that expires immediately; used on the fail-closed path
    pub fn reject(reason: impl Into<String>, now: Timestamp) -> Self {
        Self::new(RiskAction::Reject, Decimal::ZERO, vec![reason.into()], now)
    }

    pub fn with_ttl(mut self, now: Timestamp, ttl: Duration) -> Self {
        self.valid_until = now + ttl;
        self
    }

    pub fn is_allowed(&self) -> bool {
        self.action == RiskAction::Allow
    }

    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        now <= self.valid_until
    }

    /// Whether `ctx` may be dispatched under this decision
    pub fn permits(&self, ctx: &RiskContext) -> bool {
        match self.action {
            RiskAction::Allow => self.risk_multiplier > Decimal::ZERO,
            RiskAction::ReduceOnly | RiskAction::ForceClose => ctx.reduces_position,
            RiskAction::Reject => false,
        }
    }

    /// Reasons joined into a single human-readable line
    pub fn reason_chain(&self) -> String {
        self.reasons.join(" <- ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Side;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn ctx() -> RiskContext {
        RiskContext::new("EUR-USD", "fx-majors", Side::Buy, dec!(1000), dec!(1100), Utc::now())
    }

    #[test]
    fn test_multiplier_is_clamped() {
        let now = Utc::now();
        let d = RiskDecision::new(RiskAction::Allow, dec!(1.7), vec![], now);
        assert_eq!(d.risk_multiplier, Decimal::ONE);
        let d = RiskDecision::new(RiskAction::Allow, dec!(-0.3), vec![], now);
        assert_eq!(d.risk_multiplier, Decimal::ZERO);
    }

    #[test]
    fn test_reduce_only_permits_closing_orders() {
        let now = Utc::now();
        let d = RiskDecision::new(RiskAction::ReduceOnly, dec!(0.5), vec![], now);
        assert!(!d.permits(&ctx()));
        assert!(d.permits(&ctx().reducing()));
    }

    #[test]
    fn test_reject_never_permits() {
        let d = RiskDecision::reject("breaker open", Utc::now());
        assert!(!d.permits(&ctx().reducing()));
        assert_eq!(d.reason_chain(), "breaker open");
    }

    #[test]
    fn test_validity_window() {
        let now = Utc::now();
        let d = RiskDecision::allow(Decimal::ONE, now).with_ttl(now, Duration::milliseconds(250));
        assert!(d.is_valid_at(now + Duration::milliseconds(200)));
        assert!(!d.is_valid_at(now + Duration::milliseconds(300)));
    }
}
