use chrono::Utc;
use sentinel_core::Timestamp;
use sentinel_ports::Clock;

/// Wall-clock time; what a live runtime uses
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }

    fn name(&self) -> &str {
        "SystemClock"
    }
}
