use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::{AccountRiskState, CircuitBreakerState, ExposureState, RiskEvent};
use crate::values::{InstrumentId, Timestamp, TrackId};

/// State captured by a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CheckpointBody {
    Breaker {
        instrument_id: InstrumentId,
        state: CircuitBreakerState,
    },
    Track {
        track_id: TrackId,
        state: AccountRiskState,
    },
    Exposure(ExposureState),
}

/// One timestamped, versioned checkpoint record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Monotonic per-process checkpoint version
    pub version: u64,
    pub taken_at: Timestamp,
    pub body: CheckpointBody,
}

impl CheckpointRecord {
    pub fn new(version: u64, taken_at: Timestamp, body: CheckpointBody) -> Self {
        Self {
            version,
            taken_at,
            body,
        }
    }

    /// Older than `max_age` relative to `now`
    pub fn is_stale(&self, now: Timestamp, max_age: Duration) -> bool {
        now - self.taken_at > max_age
    }
}

/// Unit of work for the persistence collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PersistRecord {
    Event(RiskEvent),
    Checkpoint(CheckpointRecord),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let record = CheckpointRecord::new(
            1,
            now - Duration::minutes(10),
            CheckpointBody::Exposure(ExposureState::default()),
        );
        assert!(record.is_stale(now, Duration::minutes(5)));
        assert!(!record.is_stale(now, Duration::minutes(15)));
    }

    #[test]
    fn test_persist_record_is_tagged() {
        let record = PersistRecord::Checkpoint(CheckpointRecord::new(
            7,
            Utc::now(),
            CheckpointBody::Exposure(ExposureState::default()),
        ));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "Checkpoint");
        assert_eq!(json["data"]["version"], 7);
    }
}
