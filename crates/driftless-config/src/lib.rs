//! Configuration for hosts embedding the driftless engine.
//!
//! TOML profiles and per-resource tuning, layered as built-in defaults,
//! then the config file, then `DRIFTLESS_` environment variables. The
//! result is translated into `driftless_core::ReconcileConfig` /
//! `WaitConfig` per resource kind and into `driftless_api` transport
//! settings per endpoint profile.

mod duration;
pub mod logging;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use driftless_api::{HttpCollectionClient, TlsMode, TransportConfig};
use driftless_core::{BackoffConfig, Keyed, ReconcileConfig, WaitConfig};

pub use logging::init_tracing;

const APP_NAME: &str = "driftless";
const ENV_PREFIX: &str = "DRIFTLESS_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("unknown profile '{profile}'")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to build client: {0}")]
    Client(#[from] driftless_api::Error),

    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── Tuning ──────────────────────────────────────────────────────────

/// Fully resolved engine tuning for one resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Tuning {
    /// Mutation attempts before a version conflict is surfaced.
    pub max_attempts: u32,

    /// Retries of a throttled or transiently failing read.
    pub read_retries: u32,

    #[serde(with = "duration")]
    pub initial_backoff: Duration,

    #[serde(with = "duration")]
    pub max_backoff: Duration,

    /// Sleep after a non-terminal first poll.
    #[serde(with = "duration")]
    pub wait_delay: Duration,

    #[serde(with = "duration")]
    pub poll_interval: Duration,

    #[serde(with = "duration")]
    pub wait_timeout: Duration,

    pub not_found_checks: u32,

    pub continuous_target_occurrence: u32,
}

impl Default for Tuning {
    fn default() -> Self {
        let core = ReconcileConfig::default();
        Self {
            max_attempts: core.max_attempts,
            read_retries: core.read_retries,
            initial_backoff: core.backoff.initial_delay,
            max_backoff: core.backoff.max_delay,
            wait_delay: core.settle.delay,
            poll_interval: core.settle.poll_interval,
            wait_timeout: core.settle.timeout,
            not_found_checks: core.settle.not_found_checks,
            continuous_target_occurrence: core.settle.continuous_target_occurrence,
        }
    }
}

impl Tuning {
    /// Layer per-kind overrides on top of these values.
    pub fn apply(mut self, over: &TuningOverride) -> Self {
        if let Some(v) = over.max_attempts {
            self.max_attempts = v;
        }
        if let Some(v) = over.read_retries {
            self.read_retries = v;
        }
        if let Some(v) = over.initial_backoff {
            self.initial_backoff = v;
        }
        if let Some(v) = over.max_backoff {
            self.max_backoff = v;
        }
        if let Some(v) = over.wait_delay {
            self.wait_delay = v;
        }
        if let Some(v) = over.poll_interval {
            self.poll_interval = v;
        }
        if let Some(v) = over.wait_timeout {
            self.wait_timeout = v;
        }
        if let Some(v) = over.not_found_checks {
            self.not_found_checks = v;
        }
        if let Some(v) = over.continuous_target_occurrence {
            self.continuous_target_occurrence = v;
        }
        self
    }

    /// `scope` names the table being checked in error messages.
    pub fn validate(&self, scope: &str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(invalid(
                format!("{scope}.max_attempts"),
                "must be at least 1",
            ));
        }
        if self.wait_timeout.is_zero() {
            return Err(invalid(format!("{scope}.wait_timeout"), "must be non-zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid(format!("{scope}.poll_interval"), "must be non-zero"));
        }
        if self.poll_interval > self.wait_timeout {
            return Err(invalid(
                format!("{scope}.poll_interval"),
                format!(
                    "{} exceeds wait_timeout {}",
                    humantime::format_duration(self.poll_interval),
                    humantime::format_duration(self.wait_timeout)
                ),
            ));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(invalid(
                format!("{scope}.initial_backoff"),
                "exceeds max_backoff",
            ));
        }
        Ok(())
    }

    pub fn wait_config(&self) -> WaitConfig {
        WaitConfig::new(self.wait_timeout, self.poll_interval)
            .with_delay(self.wait_delay)
            .with_not_found_checks(self.not_found_checks)
            .with_continuous_target_occurrence(self.continuous_target_occurrence)
    }

    pub fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.initial_backoff,
            max_delay: self.max_backoff,
        }
    }

    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            max_attempts: self.max_attempts,
            read_retries: self.read_retries,
            backoff: self.backoff_config(),
            settle: self.wait_config(),
        }
    }
}

/// Per-kind overrides; unset fields inherit from `[defaults]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TuningOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_retries: Option<u32>,

    #[serde(default, with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub initial_backoff: Option<Duration>,

    #[serde(default, with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub max_backoff: Option<Duration>,

    #[serde(default, with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub wait_delay: Option<Duration>,

    #[serde(default, with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<Duration>,

    #[serde(default, with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub wait_timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_found_checks: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuous_target_occurrence: Option<u32>,
}

// ── Profiles ────────────────────────────────────────────────────────

/// A named remote endpoint.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Base URL of the collection API (e.g. "https://api.internal/v1/").
    pub endpoint: String,

    /// API key (plaintext, prefer keyring or env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable name containing the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Path to a custom CA certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    #[serde(default)]
    pub insecure: bool,

    #[serde(default, with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

// ── Top-level config ────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Tuning,

    /// Overrides keyed by resource kind (`sgrule`, `eniaddr`, `plentry`, ...).
    #[serde(default)]
    pub resources: HashMap<String, TuningOverride>,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Tuning::default(),
            resources: HashMap::new(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Effective tuning for a resource kind.
    pub fn tuning(&self, kind: &str) -> Tuning {
        self.resources
            .get(kind)
            .map_or(self.defaults, |over| self.defaults.apply(over))
    }

    /// Validated engine budget for a resource kind.
    pub fn reconcile_config(&self, kind: &str) -> Result<ReconcileConfig, ConfigError> {
        let tuning = self.tuning(kind);
        tuning.validate(&format!("resources.{kind}"))?;
        Ok(tuning.reconcile_config())
    }

    /// Validated engine budget for the element type `E`.
    pub fn reconcile_config_for<E: Keyed>(&self) -> Result<ReconcileConfig, ConfigError> {
        self.reconcile_config(E::KIND)
    }

    /// Validated wait schedule for a resource kind.
    pub fn wait_config(&self, kind: &str) -> Result<WaitConfig, ConfigError> {
        let tuning = self.tuning(kind);
        tuning.validate(&format!("resources.{kind}"))?;
        Ok(tuning.wait_config())
    }

    /// Check the defaults and every override table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.defaults.validate("defaults")?;
        for kind in self.resources.keys() {
            self.tuning(kind).validate(&format!("resources.{kind}"))?;
        }
        for (name, profile) in &self.profiles {
            parse_endpoint(name, &profile.endpoint)?;
        }
        Ok(())
    }

    /// Look up a profile by name, falling back to `default_profile`.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|p| (name, p))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", APP_NAME, APP_NAME).map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push(APP_NAME);
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file at `path`, then `DRIFTLESS_` variables.
///
/// Nested keys use a double underscore:
/// `DRIFTLESS_RESOURCES__SGRULE__WAIT_TIMEOUT=5m`.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Extract and validate a config from any figment.
pub fn extract(figment: &Figment) -> Result<Config, ConfigError> {
    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Load the full config from the canonical file and environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    extract(&figment(path))
}

/// Load config, returning the defaults if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credentials and transport ───────────────────────────────────────

/// Resolve an API key: profile env var, then system keyring, then
/// plaintext. `None` means the endpoint is used unauthenticated.
pub fn resolve_api_key(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    if let Some(ref env_name) = profile.api_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    if let Ok(entry) = keyring::Entry::new(APP_NAME, &format!("{profile_name}/api-key")) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    profile
        .api_key
        .as_ref()
        .map(|key| SecretString::from(key.clone()))
}

fn parse_endpoint(profile_name: &str, endpoint: &str) -> Result<url::Url, ConfigError> {
    let url: url::Url = endpoint.parse().map_err(|_| {
        invalid(
            format!("profiles.{profile_name}.endpoint"),
            format!("invalid URL: {endpoint}"),
        )
    })?;
    if url.cannot_be_a_base() {
        return Err(invalid(
            format!("profiles.{profile_name}.endpoint"),
            format!("not a base URL: {endpoint}"),
        ));
    }
    Ok(url)
}

/// Build transport settings from a profile.
pub fn transport_config(profile: &Profile, profile_name: &str) -> TransportConfig {
    let tls = if profile.insecure {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    let defaults = TransportConfig::default();
    TransportConfig {
        tls,
        timeout: profile.timeout.unwrap_or(defaults.timeout),
        api_key: resolve_api_key(profile, profile_name),
    }
}

/// Build an HTTP client for one collection type on a profile's endpoint.
pub fn collection_client(
    profile: &Profile,
    profile_name: &str,
    collection: &str,
) -> Result<HttpCollectionClient, ConfigError> {
    let url = parse_endpoint(profile_name, &profile.endpoint)?;
    let transport = transport_config(profile, profile_name);
    Ok(HttpCollectionClient::new(url, collection, &transport)?)
}
