//! Configuration for the vdev runner.
//!
//! TOML file plus `VDEV_`-prefixed environment overlay, gateway credential
//! resolution (env + keyring + plaintext), and translation to the runtime
//! types `vdev_core` takes. Core never reads config files itself.

use std::collections::{BTreeMap, BTreeSet};
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

use vdev_core::fields::garage::VARIABLE_FIELDS;
use vdev_core::{FieldValue, GarageConfig, GatewayConfig, TimingConfig};

const KEYRING_SERVICE: &str = "vdev";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no gateway password configured for user '{username}'")]
    NoCredentials { username: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
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

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub timing: TimingSection,

    #[serde(default)]
    pub storage: StorageSection,

    /// One entry per virtual garage.
    #[serde(default)]
    pub garage: Vec<GarageSection>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GatewaySection {
    /// Gateway base URL (e.g. "http://192.168.1.50:8080").
    #[serde(default = "default_gateway_url")]
    pub url: String,

    #[serde(default = "default_username")]
    pub username: String,

    /// Plaintext password. Prefer `password_env` or the keyring.
    pub password: Option<String>,

    /// Environment variable holding the password.
    pub password_env: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_gateway_timeout")]
    pub timeout: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            username: default_username(),
            password: None,
            password_env: None,
            timeout: default_gateway_timeout(),
        }
    }
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:8080".into()
}
fn default_username() -> String {
    "admin".into()
}
fn default_gateway_timeout() -> u64 {
    5
}

/// Tick cadences in seconds.
#[derive(Debug, Deserialize, Serialize)]
pub struct TimingSection {
    #[serde(default = "default_fast_tick")]
    pub fast_tick: u64,

    #[serde(default = "default_slow_tick")]
    pub slow_tick: u64,

    /// Give up reconnecting the event stream after this many failures.
    /// 0 retries forever.
    #[serde(default = "default_max_retries")]
    pub stream_max_retries: u32,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            fast_tick: default_fast_tick(),
            slow_tick: default_slow_tick(),
            stream_max_retries: default_max_retries(),
        }
    }
}

fn default_fast_tick() -> u64 {
    5
}
fn default_slow_tick() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    10
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StorageSection {
    /// Field store document. Defaults to `fields.json` in the data dir.
    pub data_file: Option<PathBuf>,

    /// Directory holding deprecated per-device artifacts to migrate.
    pub legacy_dir: Option<PathBuf>,
}

/// `controller = false | true | "host"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ControllerSetting {
    Flag(bool),
    Host(String),
}

impl From<&ControllerSetting> for FieldValue {
    fn from(setting: &ControllerSetting) -> Self {
        match setting {
            ControllerSetting::Flag(b) => Self::Bool(*b),
            ControllerSetting::Host(h) => Self::Text(h.clone()),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GarageSection {
    pub name: String,

    /// Stable device address. Derived from the name when omitted.
    pub address: Option<String>,

    pub controller: Option<ControllerSetting>,

    /// `<field>T` / `<field>Id` variable bindings, e.g. `doorT = 1`, `doorId = 12`.
    #[serde(flatten)]
    pub variables: BTreeMap<String, i64>,
}

impl GarageSection {
    pub fn address(&self) -> String {
        self.address.clone().unwrap_or_else(|| {
            self.name
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .collect::<String>()
                .to_ascii_lowercase()
        })
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "vdev", "vdev")
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("vdev");
    p
}

/// Resolve the config file path via platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Where the field store lives unless `storage.data_file` says otherwise.
pub fn default_data_file() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("fields.json"),
        |dirs| dirs.data_dir().join("fields.json"),
    )
}

impl StorageSection {
    pub fn data_file(&self) -> PathBuf {
        self.data_file.clone().unwrap_or_else(default_data_file)
    }
}

// ── Loading / saving ────────────────────────────────────────────────

/// Load config from `path` (or the default path) merged with `VDEV_`
/// environment variables. Nested keys use `__`, e.g.
/// `VDEV_GATEWAY__URL`.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    tracing::debug!(path = %path.display(), "loading config");

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("VDEV_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// A starter config with one garage in variable mode.
pub fn template() -> Config {
    let mut variables = BTreeMap::new();
    variables.insert("doorT".to_owned(), 1);
    variables.insert("doorId".to_owned(), 0);
    Config {
        gateway: GatewaySection {
            password_env: Some("VDEV_GATEWAY_PASSWORD".into()),
            ..GatewaySection::default()
        },
        garage: vec![GarageSection {
            name: "Garage".into(),
            address: None,
            controller: Some(ControllerSetting::Flag(false)),
            variables,
        }],
        ..Config::default()
    }
}

// ── Credential resolution ───────────────────────────────────────────

/// Gateway password: `password_env` variable, then the system keyring,
/// then plaintext in the config.
pub fn resolve_password(gateway: &GatewaySection) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = gateway.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("gateway/{}", gateway.username)) {
        if let Ok(pw) = entry.get_password() {
            return Ok(SecretString::from(pw));
        }
    }

    if let Some(ref pw) = gateway.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        username: gateway.username.clone(),
    })
}

// ── Translation ─────────────────────────────────────────────────────

pub fn gateway_config(cfg: &Config) -> Result<GatewayConfig, ConfigError> {
    let gateway = &cfg.gateway;
    let url: url::Url = gateway
        .url
        .parse()
        .map_err(|_| invalid("gateway.url", format!("invalid URL: {}", gateway.url)))?;
    if gateway.timeout == 0 {
        return Err(invalid("gateway.timeout", "must be at least 1 second"));
    }

    Ok(GatewayConfig {
        url,
        username: gateway.username.clone(),
        password: resolve_password(gateway)?,
        timeout: Duration::from_secs(gateway.timeout),
    })
}

pub fn timing_config(cfg: &Config) -> Result<TimingConfig, ConfigError> {
    let timing = &cfg.timing;
    if timing.fast_tick == 0 {
        return Err(invalid("timing.fast_tick", "must be at least 1 second"));
    }
    if timing.slow_tick < timing.fast_tick {
        return Err(invalid("timing.slow_tick", "must not be shorter than fast_tick"));
    }

    let mut out = TimingConfig {
        fast_tick: Duration::from_secs(timing.fast_tick),
        slow_tick: Duration::from_secs(timing.slow_tick),
        ..TimingConfig::default()
    };
    out.reconnect.max_retries = (timing.stream_max_retries > 0).then_some(timing.stream_max_retries);
    Ok(out)
}

/// Every `[[garage]]` entry, validated.
pub fn garage_configs(cfg: &Config) -> Result<Vec<GarageConfig>, ConfigError> {
    let allowed: BTreeSet<&str> = VARIABLE_FIELDS
        .iter()
        .flat_map(|(_, t, id)| [*t, *id])
        .collect();
    let mut seen = BTreeSet::new();

    cfg.garage
        .iter()
        .map(|section| {
            let name = section.name.trim();
            if name.is_empty() {
                return Err(invalid("garage.name", "must not be empty"));
            }
            if !seen.insert(name.to_owned()) {
                return Err(invalid("garage.name", format!("duplicate garage '{name}'")));
            }

            let mut garage = GarageConfig::new(name, section.address());
            if let Some(ref controller) = section.controller {
                garage = garage.with_controller(controller);
            }
            for (key, value) in &section.variables {
                if !allowed.contains(key.as_str()) {
                    return Err(invalid(format!("garage '{name}'"), format!("unknown key '{key}'")));
                }
                if *value < 0 {
                    return Err(invalid(format!("garage '{name}'.{key}"), "must not be negative"));
                }
                garage.variables.set(key, *value);
            }
            Ok(garage)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn load(text: &str) -> Config {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, text).unwrap();
        load_config(Some(&path)).unwrap()
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg.timing.fast_tick, 5);
        assert_eq!(cfg.timing.slow_tick, 60);
        assert!(cfg.garage.is_empty());
    }

    #[test]
    fn garages_translate_with_bindings() {
        let cfg = load(
            r#"
            [gateway]
            url = "http://10.0.0.2:8080"
            password = "hunter2"

            [[garage]]
            name = "Big Garage"
            controller = "10.0.0.40"
            doorT = 2
            doorId = 12

            [[garage]]
            name = "Shed"
            address = "shed01"
            controller = false
            "#,
        );

        let garages = garage_configs(&cfg).unwrap();
        assert_eq!(garages.len(), 2);
        assert_eq!(garages[0].address, "biggarage");
        assert_eq!(garages[0].controller, FieldValue::Text("10.0.0.40".into()));
        assert_eq!(garages[0].variables.int("doorT"), 2);
        assert_eq!(garages[0].variables.int("doorId"), 12);
        assert_eq!(garages[1].address, "shed01");
        assert_eq!(garages[1].controller, FieldValue::Bool(false));

        let gateway = gateway_config(&cfg).unwrap();
        assert_eq!(gateway.url.as_str(), "http://10.0.0.2:8080/");
        assert_eq!(gateway.password.expose_secret(), "hunter2");
    }

    #[test]
    fn unknown_garage_key_is_rejected() {
        let cfg = load(
            r#"
            [[garage]]
            name = "Garage"
            doorTypo = 3
            "#,
        );
        let err = garage_configs(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }), "{err}");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let cfg = load(
            r#"
            [[garage]]
            name = "Garage"
            [[garage]]
            name = "Garage"
            "#,
        );
        assert!(garage_configs(&cfg).is_err());
    }

    #[test]
    fn timing_validation_and_retry_cap() {
        let mut cfg = Config::default();
        cfg.timing.stream_max_retries = 0;
        let timing = timing_config(&cfg).unwrap();
        assert_eq!(timing.reconnect.max_retries, None);

        cfg.timing.slow_tick = 1;
        assert!(timing_config(&cfg).is_err());
    }

    #[test]
    fn template_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        save_config(&template(), &path).unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        let garages = garage_configs(&cfg).unwrap();
        assert_eq!(garages.len(), 1);
        assert_eq!(garages[0].name, "Garage");
        assert_eq!(cfg.gateway.password_env.as_deref(), Some("VDEV_GATEWAY_PASSWORD"));
    }
}
