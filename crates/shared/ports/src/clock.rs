use sentinel_core::Timestamp;

/// Time source for every risk decision
///
/// Cooldowns, stabilization periods, alert windows and checkpoint ages are
/// all measured against this clock, never against the wall clock directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    /// Name used in startup logs
    fn name(&self) -> &str {
        "Clock"
    }
}
