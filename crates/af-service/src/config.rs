//! Service configuration from environment variables.

use std::env;

use af_tuner::{OptimizeDirection, TunerConfig};
use af_types::{config_error, TunerResult};

pub const ADDR_VAR: &str = "AUTOFE_TUNER_ADDR";
pub const OPTIMIZE_MODE_VAR: &str = "AUTOFE_OPTIMIZE_MODE";
pub const FEATURE_PERCENT_VAR: &str = "AUTOFE_FEATURE_PERCENT";
pub const MAX_SAMPLE_VAR: &str = "AUTOFE_MAX_SAMPLE";
pub const SEED_VAR: &str = "AUTOFE_SEED";

pub const DEFAULT_ADDR: &str = "127.0.0.1:8091";

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub addr: String,
    /// Configuration for sessions created on first use.
    pub tuner: TunerConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            tuner: TunerConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> TunerResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys keep their defaults; set but
    /// unparseable keys are an error.
    pub fn from_lookup<F>(lookup: F) -> TunerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup(ADDR_VAR) {
            config.addr = addr;
        }
        if let Some(mode) = lookup(OPTIMIZE_MODE_VAR) {
            config.tuner.optimize_direction = mode.parse::<OptimizeDirection>()?;
        }
        if let Some(raw) = lookup(FEATURE_PERCENT_VAR) {
            config.tuner.feature_percent = parse(FEATURE_PERCENT_VAR, &raw)?;
        }
        if let Some(raw) = lookup(MAX_SAMPLE_VAR) {
            config.tuner.max_sample = parse(MAX_SAMPLE_VAR, &raw)?;
        }
        if let Some(raw) = lookup(SEED_VAR) {
            config.tuner.seed = Some(parse(SEED_VAR, &raw)?);
        }

        config.tuner.validate()?;
        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> TunerResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| config_error!("{key} has invalid value '{raw}'"))
}
