//! Configuration resolution for `SpaceBook`.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`~/.config/spacebook/settings.json`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)
//!
//! Files may be partial: they are merged key by key on top of the layer below.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete `SpaceBook` configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub booking: BookingConfig,
    #[serde(default)]
    pub push: PushConfig,
}

/// HTTP server and storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub database_path: Option<PathBuf>,
    pub max_connections: u32,
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            database_path: None,
            max_connections: 5,
            log_json: false,
        }
    }
}

/// Reservation lifecycle policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BookingConfig {
    /// How long a pending reservation may wait for confirmation.
    pub confirmation_deadline_secs: u64,
    /// Interval between penalization monitor sweeps.
    pub monitor_interval_secs: u64,
    /// Length of the window a penalization stays effective.
    pub penalty_duration_secs: u64,
    /// Attempts made to free a slot before giving up.
    pub release_attempts: u32,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            confirmation_deadline_secs: 10 * 60,
            monitor_interval_secs: 5,
            penalty_duration_secs: 5 * 60,
            release_attempts: 3,
        }
    }
}

impl BookingConfig {
    pub const fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}

/// Web push delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PushConfig {
    /// Contact URI sent to push services (`mailto:` or `https:`).
    pub vapid_subject: String,
    /// Application server public key, base64url. Optional; when set it must
    /// match the private key.
    pub vapid_public_key: Option<String>,
    /// Application server private key: the raw P-256 scalar, base64url.
    /// Push is disabled when it is missing.
    pub vapid_private_key: Option<String>,
    /// How long the push service should keep an undelivered message.
    pub ttl_secs: u32,
    /// Per-recipient delivery timeout.
    pub recipient_timeout_ms: u64,
    /// Wall-clock budget for one whole fan-out.
    pub dispatch_budget_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            vapid_subject: "mailto:admin@spacebook.local".to_string(),
            vapid_public_key: None,
            vapid_private_key: None,
            ttl_secs: 24 * 60 * 60,
            recipient_timeout_ms: 5_000,
            dispatch_budget_ms: 15_000,
        }
    }
}

impl PushConfig {
    pub const fn recipient_timeout(&self) -> Duration {
        Duration::from_millis(self.recipient_timeout_ms)
    }

    pub const fn dispatch_budget(&self) -> Duration {
        Duration::from_millis(self.dispatch_budget_ms)
    }

    /// Whether enough VAPID material is configured to talk to push services.
    pub const fn is_enabled(&self) -> bool {
        self.vapid_private_key.is_some()
    }
}

/// Load configuration with hierarchical resolution from the real environment.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    load_config_from(
        global_config_path().as_deref(),
        explicit,
        |name| std::env::var(name).ok(),
    )
}

/// Load configuration from the given layers.
///
/// `env` looks up an environment variable by name; injected so the layering
/// can be exercised without mutating the process environment.
pub fn load_config_from(
    global: Option<&Path>,
    explicit: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(global_path) = global {
        if global_path.exists() {
            merge_json(&mut merged, load_config_file(global_path)?);
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }
        merge_json(&mut merged, load_config_file(path)?);
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;
    apply_env_overrides(&mut config, env);
    validate(&config)?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("settings.json"))
}

/// Get the default database path.
pub fn database_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("spacebook.db"))
}

fn config_dir() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
        .map(|p| p.join("spacebook"))
}

fn load_config_file(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Recursively merge `overlay` into `base`; objects merge key by key,
/// everything else is replaced.
fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// First non-blank value among several variable names.
fn first_env(env: &impl Fn(&str) -> Option<String>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| env(name))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn apply_env_overrides(config: &mut Config, env: impl Fn(&str) -> Option<String>) {
    if let Some(val) = first_env(&env, &["SPACEBOOK_ADDR"]) {
        config.server.addr = val;
    }
    if let Some(val) = first_env(&env, &["SPACEBOOK_DB_PATH"]) {
        config.server.database_path = Some(PathBuf::from(val));
    }
    if let Some(n) = first_env(&env, &["SPACEBOOK_CONFIRMATION_DEADLINE_SECS"])
        .and_then(|v| v.parse().ok())
    {
        config.booking.confirmation_deadline_secs = n;
    }
    if let Some(n) =
        first_env(&env, &["SPACEBOOK_MONITOR_INTERVAL_SECS"]).and_then(|v| v.parse().ok())
    {
        config.booking.monitor_interval_secs = n;
    }
    if let Some(n) =
        first_env(&env, &["SPACEBOOK_PENALTY_DURATION_SECS"]).and_then(|v| v.parse().ok())
    {
        config.booking.penalty_duration_secs = n;
    }
    if let Some(val) = first_env(&env, &["SPACEBOOK_VAPID_SUBJECT", "VAPID_SUBJECT"]) {
        config.push.vapid_subject = val;
    }
    if let Some(val) = first_env(
        &env,
        &["SPACEBOOK_VAPID_PUBLIC_KEY", "VAPID_PUBLIC_KEY", "PUBLIC_VAPID_KEY"],
    ) {
        config.push.vapid_public_key = Some(val);
    }
    if let Some(val) = first_env(
        &env,
        &[
            "SPACEBOOK_VAPID_PRIVATE_KEY",
            "VAPID_PRIVATE_KEY",
            "PRIVATE_VAPID_KEY",
            "VITE_VAPID_PRIVATE_KEY",
        ],
    ) {
        config.push.vapid_private_key = Some(val);
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.booking.monitor_interval_secs == 0 {
        return Err(Error::Config(
            "booking.monitor_interval_secs must be greater than zero".to_string(),
        ));
    }
    if config.booking.release_attempts == 0 {
        return Err(Error::Config(
            "booking.release_attempts must be greater than zero".to_string(),
        ));
    }
    if config.push.recipient_timeout_ms > config.push.dispatch_budget_ms {
        return Err(Error::Config(
            "push.recipient_timeout_ms cannot exceed push.dispatch_budget_ms".to_string(),
        ));
    }
    Ok(())
}
