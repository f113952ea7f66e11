//! Engine errors

use sentinel_risk_manager::{ConfigError, RiskError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Instrument {0} is not configured")]
    UnknownInstrument(String),

    #[error("Instrument {0} already has a running loop")]
    AlreadyRunning(String),

    #[error("No loop is running for instrument {0}")]
    NotRunning(String),

    #[error("Tick queue full for {0}, tick dropped")]
    Backpressure(String),

    #[error("Loop for {0} has stopped")]
    LoopClosed(String),

    #[error("Risk error: {0}")]
    Risk(#[from] RiskError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
