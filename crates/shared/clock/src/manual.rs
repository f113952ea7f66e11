use chrono::{Duration, Utc};
use parking_lot::RwLock;
use sentinel_core::Timestamp;
use sentinel_ports::Clock;
use std::sync::Arc;

/// Fixed clock that only advances when explicitly moved
///
/// Shared via `Arc` between the code under test and the test itself.
pub struct ManualClock {
    current_time: RwLock<Timestamp>,
}

impl ManualClock {
    /// Create a new manual clock
    ///
    /// # Arguments
    /// * `initial_time` - Optional starting time. If None, uses current wall time.
    pub fn new(initial_time: Option<Timestamp>) -> Arc<Self> {
        Arc::new(Self {
            current_time: RwLock::new(initial_time.unwrap_or_else(Utc::now)),
        })
    }

    /// Advance the clock by a specified duration
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current_time.write();
        *current += duration;
    }

    /// Advance the clock by a number of milliseconds
    pub fn advance_ms(&self, ms: i64) {
        self.advance(Duration::milliseconds(ms));
    }

    /// Explicitly set the time
    ///
    /// Warning: moving backwards breaks cooldown arithmetic. Use with caution.
    pub fn set_time(&self, time: Timestamp) {
        *self.current_time.write() = time;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current_time.read()
    }

    fn name(&self) -> &str {
        "ManualClock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_is_frozen() {
        let clock = ManualClock::new(None);
        let time1 = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(clock.now(), time1);
    }

    #[test]
    fn test_advance() {
        let clock = ManualClock::new(None);
        let time1 = clock.now();
        clock.advance(Duration::seconds(5));
        clock.advance_ms(250);
        assert_eq!(clock.now() - time1, Duration::milliseconds(5_250));
    }

    #[test]
    fn test_set_time() {
        let start = Utc::now();
        let clock = ManualClock::new(Some(start));
        clock.set_time(start + Duration::hours(1));
        assert_eq!(clock.now(), start + Duration::hours(1));
    }
}
