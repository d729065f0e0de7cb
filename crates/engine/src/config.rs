//! Engine configuration, loaded from the environment.
//!
//! Every knob has a default, so a bare `reverie-engine` starts without any
//! configuration. Variables use the `REVERIE_` prefix
//! (`REVERIE_PORT=8080`).

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "defaults::host")]
    pub host: String,
    #[serde(default = "defaults::port")]
    pub port: u16,
    /// Maximum nested sub-program depth before a call overflows
    #[serde(default = "defaults::max_call_depth")]
    pub max_call_depth: usize,
    /// Visited-node history kept per execution state
    #[serde(default = "defaults::history_cap")]
    pub history_cap: usize,
    /// Non-suspending steps one call may take before it is presumed stuck
    #[serde(default = "defaults::step_budget")]
    pub step_budget: u32,
    /// Idle minutes before a suspended execution is expired
    #[serde(default = "defaults::retention_minutes")]
    pub retention_minutes: i64,
    /// Seconds between expiry sweeps
    #[serde(default = "defaults::reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

mod defaults {
    pub fn host() -> String {
        "0.0.0.0".to_string()
    }
    pub fn port() -> u16 {
        3000
    }
    pub fn max_call_depth() -> usize {
        8
    }
    pub fn history_cap() -> usize {
        64
    }
    pub fn step_budget() -> u32 {
        256
    }
    pub fn retention_minutes() -> i64 {
        240
    }
    pub fn reaper_interval_secs() -> u64 {
        300
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: defaults::host(),
            port: defaults::port(),
            max_call_depth: defaults::max_call_depth(),
            history_cap: defaults::history_cap(),
            step_budget: defaults::step_budget(),
            retention_minutes: defaults::retention_minutes(),
            reaper_interval_secs: defaults::reaper_interval_secs(),
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("REVERIE"))
            .build()?
            .try_deserialize()
    }
}
