//! # Configuration Management
//!
//! Environment-driven configuration plus the versioned, copy-on-reload
//! snapshot cache shared by in-flight cycles.
//!
//! Cycles never observe a config change mid-stage: the cache hands out an
//! immutable `Arc<OrbitConfig>` snapshot, and [`ConfigCache::reload`] is
//! rejected while the active-cycle counter is above zero.

use std::env;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{OrbitError, Result};
use crate::orchestration::active_cycles::ActiveCycleCounter;

/// HTTP method allowed for outbound dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DispatchMethod {
    Post,
    Put,
}

impl Default for DispatchMethod {
    fn default() -> Self {
        Self::Post
    }
}

impl std::fmt::Display for DispatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
        }
    }
}

impl std::str::FromStr for DispatchMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            other => Err(format!("Unknown dispatch method: {other}")),
        }
    }
}

/// One configured dispatch endpoint, keyed by a stable string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEndpoint {
    pub key: String,
    pub url: String,
    #[serde(default)]
    pub method: DispatchMethod,
    #[serde(default)]
    pub token: Option<String>,
}

/// Externally-owned recurring execution configuration.
///
/// The run-profile driver iterates enabled profiles and starts one cycle
/// per profile, carrying these fields as the cycle context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunProfile {
    pub run_profile_id: String,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub instruction_id: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct OrbitConfig {
    pub database_url: String,
    pub http_port: u16,
    pub global_pause: bool,
    /// Period of the time-based cycle trigger; `None` disables it.
    pub cycle_interval_secs: Option<u64>,
    /// Period of the run-profile driver; `None` disables it.
    pub run_profile_interval_secs: Option<u64>,
    pub max_dispatch_retries: u32,
    pub transformation_retry_limit: u32,
    pub backoff_base_ms: u64,
    pub endpoints: Vec<DispatchEndpoint>,
    pub run_profiles: Vec<RunProfile>,
}

impl Default for OrbitConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            http_port: 3000,
            global_pause: false,
            cycle_interval_secs: None,
            run_profile_interval_secs: None,
            max_dispatch_retries: 3,
            transformation_retry_limit: 3,
            backoff_base_ms: 250,
            endpoints: Vec::new(),
            run_profiles: Vec::new(),
        }
    }
}

impl OrbitConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(db_url) = env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        if let Ok(port) = env::var("PORT") {
            config.http_port = port
                .parse()
                .map_err(|e| OrbitError::Configuration(format!("Invalid PORT: {e}")))?;
        }

        config.global_pause = env::var("ORBIT_GLOBAL_PAUSE").as_deref() == Ok("true");

        if let Ok(interval) = env::var("ORBIT_CYCLE_INTERVAL_SECS") {
            config.cycle_interval_secs = Some(interval.parse().map_err(|e| {
                OrbitError::Configuration(format!("Invalid ORBIT_CYCLE_INTERVAL_SECS: {e}"))
            })?);
        }

        if let Ok(interval) = env::var("ORBIT_RUN_PROFILE_INTERVAL_SECS") {
            config.run_profile_interval_secs = Some(interval.parse().map_err(|e| {
                OrbitError::Configuration(format!("Invalid ORBIT_RUN_PROFILE_INTERVAL_SECS: {e}"))
            })?);
        }

        if let Ok(retries) = env::var("ORBIT_MAX_DISPATCH_RETRIES") {
            config.max_dispatch_retries = retries.parse().map_err(|e| {
                OrbitError::Configuration(format!("Invalid ORBIT_MAX_DISPATCH_RETRIES: {e}"))
            })?;
        }

        if let Ok(limit) = env::var("ORBIT_TRANSFORMATION_RETRY_LIMIT") {
            config.transformation_retry_limit = limit.parse().map_err(|e| {
                OrbitError::Configuration(format!("Invalid ORBIT_TRANSFORMATION_RETRY_LIMIT: {e}"))
            })?;
        }

        if let Ok(base) = env::var("ORBIT_BACKOFF_BASE_MS") {
            config.backoff_base_ms = base.parse().map_err(|e| {
                OrbitError::Configuration(format!("Invalid ORBIT_BACKOFF_BASE_MS: {e}"))
            })?;
        }

        config.endpoints = parse_json_env("ORBIT_DISPATCH_ENDPOINTS");
        config.run_profiles = parse_json_env("ORBIT_RUN_PROFILES");

        Ok(config)
    }

    pub fn endpoint(&self, key: &str) -> Option<&DispatchEndpoint> {
        self.endpoints.iter().find(|e| e.key == key)
    }

    pub fn enabled_run_profiles(&self) -> impl Iterator<Item = &RunProfile> {
        self.run_profiles.iter().filter(|rp| rp.enabled)
    }

    /// Retry parameters for transformation tier attempts.
    pub fn transformation_retry_policy(&self) -> crate::resilience::RetryPolicy {
        crate::resilience::RetryPolicy {
            max_attempts: self.transformation_retry_limit,
            base_delay: std::time::Duration::from_millis(self.backoff_base_ms),
            multiplier: 2.0,
        }
    }
}

/// Parse a JSON-valued environment variable into a list.
///
/// Invalid or absent config yields an empty list; the dispatcher surfaces
/// the gap later as a configuration-missing failure on the affected unit.
fn parse_json_env<T: serde::de::DeserializeOwned>(key: &str) -> Vec<T> {
    let Ok(raw) = env::var(key) else {
        return Vec::new();
    };
    match serde_json::from_str(&raw) {
        Ok(parsed) => parsed,
        Err(error) => {
            warn!(%error, env_var = key, "Ignoring unparseable JSON configuration");
            Vec::new()
        }
    }
}

/// A numbered, immutable configuration snapshot.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub config: Arc<OrbitConfig>,
}

/// Copy-on-reload configuration cache.
///
/// Readers take a cheap `Arc` clone of the current snapshot; a reload swaps
/// the whole snapshot under a short write lock and bumps the version.
/// Reloads are refused while any cycle is in flight so a stage never sees
/// two different configs.
#[derive(Debug)]
pub struct ConfigCache {
    snapshot: RwLock<ConfigSnapshot>,
    active_cycles: ActiveCycleCounter,
}

impl ConfigCache {
    pub fn new(config: OrbitConfig, active_cycles: ActiveCycleCounter) -> Self {
        Self {
            snapshot: RwLock::new(ConfigSnapshot {
                version: 1,
                config: Arc::new(config),
            }),
            active_cycles,
        }
    }

    pub fn current(&self) -> ConfigSnapshot {
        self.snapshot.read().clone()
    }

    /// Swap in a new snapshot, returning the new version number.
    pub fn reload(&self, config: OrbitConfig) -> Result<u64> {
        let in_flight = self.active_cycles.count();
        if in_flight > 0 {
            return Err(OrbitError::Configuration(format!(
                "Refusing config reload while {in_flight} cycle(s) are in flight"
            )));
        }
        let mut guard = self.snapshot.write();
        guard.version += 1;
        guard.config = Arc::new(config);
        Ok(guard.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_lookup_by_key() {
        let config = OrbitConfig {
            endpoints: vec![DispatchEndpoint {
                key: "default-endpoint".to_string(),
                url: "https://sink.example/receive".to_string(),
                method: DispatchMethod::Post,
                token: None,
            }],
            ..OrbitConfig::default()
        };

        assert!(config.endpoint("default-endpoint").is_some());
        assert!(config.endpoint("other").is_none());
    }

    #[test]
    fn reload_bumps_version_when_idle() {
        let counter = ActiveCycleCounter::new();
        let cache = ConfigCache::new(OrbitConfig::default(), counter);

        assert_eq!(cache.current().version, 1);
        let version = cache.reload(OrbitConfig::default()).expect("idle reload");
        assert_eq!(version, 2);
    }

    #[test]
    fn reload_rejected_while_cycles_in_flight() {
        let counter = ActiveCycleCounter::new();
        let cache = ConfigCache::new(OrbitConfig::default(), counter.clone());

        let _guard = counter.enter();
        assert!(cache.reload(OrbitConfig::default()).is_err());
        drop(_guard);
        assert!(cache.reload(OrbitConfig::default()).is_ok());
    }

    #[test]
    fn dispatch_method_round_trips_from_str() {
        assert_eq!("POST".parse::<DispatchMethod>(), Ok(DispatchMethod::Post));
        assert_eq!("PUT".parse::<DispatchMethod>(), Ok(DispatchMethod::Put));
        assert!("PATCH".parse::<DispatchMethod>().is_err());
    }
}
