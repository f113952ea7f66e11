//! Sentinel Clock Infrastructure
//!
//! Time sources behind the [`Clock`] port:
//!
//! - [`SystemClock`]: wall-clock time for production
//! - [`ManualClock`]: frozen time that only moves when told to, so that
//!   cooldowns and stabilization periods can be tested deterministically
//!
//! ## Usage
//!
//! ```ignore
//! use sentinel_clock::{ManualClock, Clock};
//! use chrono::Duration;
//!
//! let clock = ManualClock::new(None);
//! let t0 = clock.now();
//! clock.advance(Duration::seconds(30));
//! assert_eq!(clock.now() - t0, Duration::seconds(30));
//! ```

mod manual;
mod system;

pub use manual::ManualClock;
pub use system::SystemClock;

// Re-export the Clock trait for convenience
pub use sentinel_ports::Clock;
