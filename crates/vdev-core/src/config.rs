// ── Runtime device configuration ──
//
// These types describe what a device talks to and how often. They carry
// credentials and tuning but never touch disk; the config crate builds
// them and hands them in.

use std::net::IpAddr;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;
use vdev_api::{GatewayClient, ReconnectConfig, TransportConfig};

use crate::error::CoreError;
use crate::fields::{FieldRegistry, FieldValue, FieldValues};

/// Host assumed when the controller is configured as plain `true`.
pub const DEFAULT_CONTROLLER_HOST: &str = "ratgdov25i-fad8fd.local";

/// Gateway connection settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway root, e.g. `http://192.168.1.50:8080/`.
    pub url: Url,
    pub username: String,
    pub password: SecretString,
    /// Per-request timeout for variable reads and writes.
    pub timeout: Duration,
}

impl GatewayConfig {
    /// Build the variable client for this gateway.
    pub fn client(&self) -> Result<GatewayClient, CoreError> {
        let transport = TransportConfig {
            timeout: self.timeout,
            ..TransportConfig::default()
        };
        Ok(GatewayClient::new(
            self.url.clone(),
            self.username.clone(),
            self.password.clone(),
            &transport,
        )?)
    }
}

/// Cadences and limits shared by every device.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    pub fast_tick: Duration,
    pub slow_tick: Duration,
    /// Delay between the sequential direct-poll requests.
    pub poll_spacing: Duration,
    /// Per-request timeout for direct polls, commands and the identity probe.
    pub poll_timeout: Duration,
    /// Unmatched event records older than this are dropped.
    pub stale_after: Duration,
    /// Re-evaluation period while records are deferred.
    pub reevaluate_every: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            fast_tick: Duration::from_secs(5),
            slow_tick: Duration::from_secs(60),
            poll_spacing: Duration::from_millis(200),
            poll_timeout: Duration::from_secs(3),
            stale_after: Duration::from_secs(120),
            reevaluate_every: Duration::from_secs(5),
            reconnect: ReconnectConfig::default(),
        }
    }
}

// ── Controller address ───────────────────────────────────────────

/// Where the door controller lives, if anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerAddress {
    /// Variable mode: state comes from gateway variables.
    Disabled,
    /// Controller mode: `host` or `host:port`.
    Host(String),
}

impl ControllerAddress {
    /// Interpret the `controller` field: `false` disables, `true` means the
    /// default host, anything else must be an IP address or hostname.
    pub fn parse(value: &FieldValue) -> Result<Self, CoreError> {
        let text = match value {
            FieldValue::Bool(false) => return Ok(Self::Disabled),
            FieldValue::Bool(true) => return Ok(Self::Host(DEFAULT_CONTROLLER_HOST.to_owned())),
            FieldValue::Text(s) => s.trim(),
            other => return Err(address_error(&other.to_string())),
        };

        match text {
            "" | "false" | "False" => Ok(Self::Disabled),
            "true" | "True" => Ok(Self::Host(DEFAULT_CONTROLLER_HOST.to_owned())),
            host if is_valid_host(host) => Ok(Self::Host(host.to_owned())),
            bad => Err(address_error(bad)),
        }
    }

    pub fn host(&self) -> Option<&str> {
        match self {
            Self::Disabled => None,
            Self::Host(h) => Some(h),
        }
    }
}

fn address_error(value: &str) -> CoreError {
    CoreError::Config {
        field: "controller".into(),
        reason: format!("address error: {value}"),
    }
}

fn is_valid_host(text: &str) -> bool {
    if text.parse::<IpAddr>().is_ok() {
        return true;
    }
    if text.contains(['/', '@', '?', '#']) || text.chars().any(char::is_whitespace) {
        return false;
    }
    let Ok(url) = Url::parse(&format!("http://{text}/")) else {
        return false;
    };
    match url.host() {
        Some(url::Host::Ipv4(_) | url::Host::Ipv6(_)) => true,
        Some(url::Host::Domain(domain)) => domain.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        }),
        None => false,
    }
}

// ── Garage ───────────────────────────────────────────────────────

/// One garage device as configured.
#[derive(Debug, Clone)]
pub struct GarageConfig {
    /// Display name, also the persistence key.
    pub name: String,
    /// Stable device address, used as the legacy record key.
    pub address: String,
    /// Raw `controller` value (`false`, `true`, hostname or IP).
    pub controller: FieldValue,
    /// `<f>T` / `<f>Id` variable bindings.
    pub variables: FieldValues,
}

impl GarageConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            controller: FieldValue::Bool(false),
            variables: FieldValues::default(),
        }
    }

    pub fn with_controller(mut self, controller: impl Into<FieldValue>) -> Self {
        self.controller = controller.into();
        self
    }

    /// Bind a state field to a gateway variable.
    pub fn with_variable(mut self, type_field: &str, var_type: i64, id_field: &str, var_id: i64) -> Self {
        self.variables.set(type_field, var_type);
        self.variables.set(id_field, var_id);
        self
    }

    /// Overwrite the config-kind fields of `values` with configured ones.
    /// Fields not configured keep their current value.
    pub fn apply_to(&self, values: &mut FieldValues, registry: &FieldRegistry) {
        for (name, _) in registry.config_fields() {
            if name == crate::fields::garage::CONTROLLER {
                values.set(name, self.controller.clone());
            } else if let Some(value) = self.variables.get(name) {
                values.set(name, value.clone());
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fields::GARAGE_FIELDS;

    #[test]
    fn controller_address_forms() {
        assert_eq!(
            ControllerAddress::parse(&false.into()).unwrap(),
            ControllerAddress::Disabled
        );
        assert_eq!(
            ControllerAddress::parse(&"False".into()).unwrap(),
            ControllerAddress::Disabled
        );
        assert_eq!(
            ControllerAddress::parse(&true.into()).unwrap().host(),
            Some(DEFAULT_CONTROLLER_HOST)
        );
        assert_eq!(
            ControllerAddress::parse(&"192.168.1.40".into()).unwrap().host(),
            Some("192.168.1.40")
        );
        assert_eq!(
            ControllerAddress::parse(&"garage-door.lan:8080".into()).unwrap().host(),
            Some("garage-door.lan:8080")
        );
    }

    #[test]
    fn bad_controller_address_is_config_error() {
        for bad in ["not a host", "http://x/y", "a..b", "-bad.lan"] {
            let err = ControllerAddress::parse(&bad.into()).unwrap_err();
            assert!(matches!(err, CoreError::Config { .. }), "{bad}");
        }
        assert!(ControllerAddress::parse(&FieldValue::Int(3)).is_err());
    }

    #[test]
    fn apply_only_touches_config_fields() {
        let config = GarageConfig::new("Garage", "g1")
            .with_controller("10.0.0.9")
            .with_variable("doorT", 2, "doorId", 17);
        let mut values = GARAGE_FIELDS.defaults();
        values.set("door", 100);

        let mut extra = config.clone();
        extra.variables.set("door", 0);
        extra.apply_to(&mut values, &GARAGE_FIELDS);

        assert_eq!(values.int("doorT"), 2);
        assert_eq!(values.int("doorId"), 17);
        assert_eq!(values.int("lightId"), 0);
        assert_eq!(values.int("door"), 100);
        assert_eq!(values.get("controller"), Some(&FieldValue::Text("10.0.0.9".into())));
    }
}
