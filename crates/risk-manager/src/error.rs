//! Risk Manager errors

use sentinel_core::CircuitState;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("Unknown track: {0}")]
    UnknownTrack(String),

    #[error("Instrument {instrument_id} belongs to track {expected}, context says {actual}")]
    TrackMismatch {
        instrument_id: String,
        expected: String,
        actual: String,
    },

    #[error("Corrupted state for {subject}: {detail}")]
    CorruptedState { subject: String, detail: String },

    #[error("Arithmetic overflow: {0}")]
    Arithmetic(String),

    #[error("Invalid transition for {subject}: {from} -> {to} ({reason})")]
    InvalidTransition {
        subject: String,
        from: CircuitState,
        to: CircuitState,
        reason: String,
    },

    #[error("Internal fault: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Reloaded config changes the instrument/track set: {0}")]
    TopologyChanged(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RiskError>;
