//! Risk configuration snapshots
//!
//! A [`RiskConfig`] is an immutable, versioned snapshot of every limit the
//! risk manager enforces. Evaluations load the current snapshot through a
//! [`ConfigHandle`]; a reload swaps the whole snapshot atomically, so limits
//! are never changed in place while an evaluation is in flight.

use arc_swap::ArcSwap;
use log::info;
use rust_decimal::Decimal;
use sentinel_core::{InstrumentId, TrackId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{ConfigError, RiskError};
use crate::kill_switch::KillSwitchConfig;
use crate::parameters::check_duration;
use crate::parameters::{CircuitBreakerLimits, DrawdownLimits, PortfolioLimits};

/// Configuration for a single instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Track (risk pool) this instrument belongs to
    pub track_id: TrackId,
    /// L1 limits
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerLimits,
    /// Per-instrument notional ceiling (overrides the portfolio default)
    #[serde(default)]
    pub max_notional: Option<Decimal>,
}

impl InstrumentConfig {
    pub fn new(track_id: impl Into<TrackId>) -> Self {
        Self {
            track_id: track_id.into(),
            circuit_breaker: CircuitBreakerLimits::default(),
            max_notional: None,
        }
    }

    pub fn with_circuit_breaker(mut self, limits: CircuitBreakerLimits) -> Self {
        self.circuit_breaker = limits;
        self
    }

    pub fn with_max_notional(mut self, max_notional: Decimal) -> Self {
        self.max_notional = Some(max_notional);
        self
    }
}

/// Configuration for a single track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackConfig {
    /// Equity the track starts with until the first daily reset
    pub starting_equity: Decimal,
    /// L2 limits
    #[serde(default)]
    pub drawdown: DrawdownLimits,
}

impl TrackConfig {
    pub fn new(starting_equity: Decimal) -> Self {
        Self {
            starting_equity,
            drawdown: DrawdownLimits::default(),
        }
    }

    pub fn with_drawdown(mut self, limits: DrawdownLimits) -> Self {
        self.drawdown = limits;
        self
    }
}

/// Complete risk configuration snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Snapshot version (assigned by the handle on reload)
    #[serde(default)]
    pub version: u64,
    pub instruments: BTreeMap<InstrumentId, InstrumentConfig>,
    pub tracks: BTreeMap<TrackId, TrackConfig>,
    /// L3 limits
    #[serde(default)]
    pub portfolio: PortfolioLimits,
    /// How long a decision stays valid (ms)
    #[serde(default = "default_decision_ttl_ms")]
    pub decision_ttl_ms: u64,
    #[serde(default)]
    pub kill_switch: KillSwitchConfig,
}

fn default_decision_ttl_ms() -> u64 {
    250
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            version: 0,
            instruments: BTreeMap::new(),
            tracks: BTreeMap::new(),
            portfolio: PortfolioLimits::default(),
            decision_ttl_ms: default_decision_ttl_ms(),
            kill_switch: KillSwitchConfig::default(),
        }
    }
}

impl RiskConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_track(mut self, track_id: impl Into<TrackId>, track: TrackConfig) -> Self {
        self.tracks.insert(track_id.into(), track);
        self
    }

    pub fn with_instrument(
        mut self,
        instrument_id: impl Into<InstrumentId>,
        instrument: InstrumentConfig,
    ) -> Self {
        self.instruments.insert(instrument_id.into(), instrument);
        self
    }

    pub fn with_portfolio(mut self, portfolio: PortfolioLimits) -> Self {
        self.portfolio = portfolio;
        self
    }

    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Load configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: RiskConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instruments.is_empty() {
            return Err(ConfigError::Invalid("no instruments configured".to_string()));
        }
        for (id, track) in &self.tracks {
            track
                .drawdown
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("track {}: {}", id, e)))?;
            if track.starting_equity <= Decimal::ZERO {
                return Err(ConfigError::Invalid(format!(
                    "track {}: starting_equity must be positive",
                    id
                )));
            }
        }
        for (id, instrument) in &self.instruments {
            if !self.tracks.contains_key(&instrument.track_id) {
                return Err(ConfigError::Invalid(format!(
                    "instrument {} references unknown track {}",
                    id, instrument.track_id
                )));
            }
            instrument
                .circuit_breaker
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("instrument {}: {}", id, e)))?;
            if let Some(max) = instrument.max_notional
                && max <= Decimal::ZERO
            {
                return Err(ConfigError::Invalid(format!(
                    "instrument {}: max_notional must be positive",
                    id
                )));
            }
        }
        self.portfolio
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("portfolio: {}", e)))?;
        if self.decision_ttl_ms == 0 {
            return Err(ConfigError::Invalid("decision_ttl_ms must be positive".to_string()));
        }
        check_duration("decision_ttl_ms", self.decision_ttl_ms).map_err(ConfigError::Invalid)?;
        Ok(())
    }

    pub fn instrument(&self, instrument_id: &str) -> Result<&InstrumentConfig, RiskError> {
        self.instruments
            .get(instrument_id)
            .ok_or_else(|| RiskError::UnknownInstrument(instrument_id.to_string()))
    }

    pub fn track(&self, track_id: &str) -> Result<&TrackConfig, RiskError> {
        self.tracks
            .get(track_id)
            .ok_or_else(|| RiskError::UnknownTrack(track_id.to_string()))
    }

    /// Notional ceiling for one instrument
    pub fn instrument_cap(&self, instrument_id: &str) -> Result<Decimal, RiskError> {
        Ok(self
            .instrument(instrument_id)?
            .max_notional
            .unwrap_or(self.portfolio.max_instrument_notional))
    }

    /// Instruments belonging to a track
    pub fn instruments_in_track<'a>(
        &'a self,
        track_id: &'a str,
    ) -> impl Iterator<Item = &'a InstrumentId> + 'a {
        self.instruments
            .iter()
            .filter(move |(_, cfg)| cfg.track_id == track_id)
            .map(|(id, _)| id)
    }

    /// Same instruments (with the same track membership) and same tracks
    fn same_topology(&self, other: &RiskConfig) -> Result<(), String> {
        let ours: Vec<_> = self.tracks.keys().collect();
        let theirs: Vec<_> = other.tracks.keys().collect();
        if ours != theirs {
            return Err(format!("tracks {:?} -> {:?}", ours, theirs));
        }
        let ours: Vec<_> = self
            .instruments
            .iter()
            .map(|(id, c)| (id, &c.track_id))
            .collect();
        let theirs: Vec<_> = other
            .instruments
            .iter()
            .map(|(id, c)| (id, &c.track_id))
            .collect();
        if ours != theirs {
            return Err(format!("instruments {:?} -> {:?}", ours, theirs));
        }
        Ok(())
    }
}

/// Atomically swappable handle to the current configuration snapshot
pub struct ConfigHandle {
    current: ArcSwap<RiskConfig>,
}

impl ConfigHandle {
    pub fn new(config: RiskConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            current: ArcSwap::from_pointee(config),
        })
    }

    /// Current snapshot (lock-free)
    pub fn load(&self) -> Arc<RiskConfig> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Replace the snapshot; returns the new version.
    ///
    /// The new snapshot must be valid and cover exactly the same instruments
    /// and tracks, since per-instrument and per-track state is created once.
    pub fn swap(&self, mut config: RiskConfig) -> Result<u64, ConfigError> {
        config.validate()?;
        let previous = self.current.load_full();
        previous
            .same_topology(&config)
            .map_err(ConfigError::TopologyChanged)?;
        config.version = previous.version + 1;
        let version = config.version;
        self.current.store(Arc::new(config));
        info!("[CONFIG] Risk config reloaded: v{} -> v{}", previous.version, version);
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> RiskConfig {
        RiskConfig::new()
            .with_track("fx-majors", TrackConfig::new(dec!(100_000)))
            .with_instrument("EUR-USD", InstrumentConfig::new("fx-majors"))
            .with_instrument("GBP-USD", InstrumentConfig::new("fx-majors"))
    }

    #[test]
    fn test_sample_is_valid() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_unknown_track_rejected() {
        let config = sample().with_instrument("USD-JPY", InstrumentConfig::new("fx-asia"));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_json_str() {
        let json = r#"{
            "instruments": {
                "EUR-USD": {
                    "track_id": "fx",
                    "circuit_breaker": { "max_losses": 4, "cooldown_ms": 1000 }
                }
            },
            "tracks": {
                "fx": { "starting_equity": "250000", "drawdown": { "halt_drawdown": "0.03" } }
            },
            "portfolio": { "max_account_leverage": "3" }
        }"#;
        let config = RiskConfig::from_json_str(json).unwrap();
        let eur = config.instrument("EUR-USD").unwrap();
        assert_eq!(eur.circuit_breaker.max_losses, 4);
        assert_eq!(eur.circuit_breaker.cooldown_ms, 1000);
        // Unspecified fields fall back to defaults
        assert_eq!(eur.circuit_breaker.probe_successes_required, 3);
        assert_eq!(config.track("fx").unwrap().drawdown.halt_drawdown, dec!(0.03));
        assert_eq!(config.portfolio.max_account_leverage, dec!(3));
        assert_eq!(config.decision_ttl_ms, 250);
    }

    #[test]
    fn test_duration_limits_rejected() {
        let json = r#"{
            "instruments": {
                "EUR-USD": { "track_id": "fx", "circuit_breaker": { "cooldown_ms": 18446744073709551615 } }
            },
            "tracks": { "fx": { "starting_equity": "100000" } }
        }"#;
        let err = RiskConfig::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("cooldown_ms"), "{}", err);

        let mut config = sample();
        config.decision_ttl_ms = crate::MAX_DURATION_MS + 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("decision_ttl_ms")));

        config.decision_ttl_ms = crate::MAX_DURATION_MS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            RiskConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_swap_bumps_version() {
        let handle = ConfigHandle::new(sample()).unwrap();
        assert_eq!(handle.version(), 0);

        let mut next = sample();
        next.portfolio.max_account_leverage = dec!(2);
        assert_eq!(handle.swap(next).unwrap(), 1);
        assert_eq!(handle.load().portfolio.max_account_leverage, dec!(2));
    }

    #[test]
    fn test_swap_rejects_topology_change() {
        let handle = ConfigHandle::new(sample()).unwrap();
        let next = sample().with_instrument("AUD-USD", InstrumentConfig::new("fx-majors"));
        assert!(matches!(
            handle.swap(next),
            Err(ConfigError::TopologyChanged(_))
        ));
        assert_eq!(handle.version(), 0);
    }

    #[test]
    fn test_swap_rejects_invalid_snapshot() {
        let handle = ConfigHandle::new(sample()).unwrap();
        let mut next = sample();
        next.portfolio.max_account_leverage = Decimal::ZERO;
        assert!(handle.swap(next).is_err());
        assert_eq!(handle.load().portfolio.max_account_leverage, dec!(5.0));
    }

    #[test]
    fn test_instruments_in_track() {
        let config = sample();
        let ids: Vec<_> = config.instruments_in_track("fx-majors").cloned().collect();
        assert_eq!(ids, vec!["EUR-USD".to_string(), "GBP-USD".to_string()]);
    }
}
