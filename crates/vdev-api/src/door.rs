// Door controller REST client
//
// The controller exposes six entities as JSON documents plus POST
// actions on them. Entity identifiers on the event stream use the same
// names with `/` replaced by `-` (`cover/door` -> `cover-door`).

use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

// ── Entities ────────────────────────────────────────────────────────

/// One of the six entities the controller reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Entity {
    Light,
    Door,
    Motion,
    Motor,
    Lock,
    Obstruction,
}

impl Entity {
    /// Direct-poll order.
    pub const POLL_ORDER: [Self; 6] = [
        Self::Light,
        Self::Door,
        Self::Motion,
        Self::Motor,
        Self::Lock,
        Self::Obstruction,
    ];

    /// REST path relative to the controller root.
    pub fn path(self) -> &'static str {
        match self {
            Self::Light => "light/light",
            Self::Door => "cover/door",
            Self::Motion => "binary_sensor/motion",
            Self::Motor => "binary_sensor/motor",
            Self::Lock => "lock/lock_remotes",
            Self::Obstruction => "binary_sensor/obstruction",
        }
    }

    /// Identifier the controller puts in the `id` field.
    pub fn id(self) -> &'static str {
        match self {
            Self::Light => "light-light",
            Self::Door => "cover-door",
            Self::Motion => "binary_sensor-motion",
            Self::Motor => "binary_sensor-motor",
            Self::Lock => "lock-lock_remotes",
            Self::Obstruction => "binary_sensor-obstruction",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::POLL_ORDER.into_iter().find(|e| e.id() == id)
    }
}

/// JSON body the controller returns for an entity, also carried by
/// `state` events.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EntityStatus {
    pub id: String,
    #[serde(default)]
    pub state: Option<String>,
    /// Position fraction for the cover, boolean for binary sensors.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub current_operation: Option<String>,
}

impl EntityStatus {
    pub fn entity(&self) -> Option<Entity> {
        Entity::from_id(&self.id)
    }

    /// Numeric `value`, if the controller sent one.
    pub fn value_f64(&self) -> Option<f64> {
        self.value.as_ref().and_then(serde_json::Value::as_f64)
    }
}

// ── Commands ────────────────────────────────────────────────────────

/// Actions that can be POSTed to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DoorCommand {
    LightOn,
    LightOff,
    DoorOpen,
    DoorClose,
    DoorStop,
    /// Press the wall-button equivalent.
    DoorTrigger,
    Lock,
    Unlock,
}

impl DoorCommand {
    pub fn path(self) -> &'static str {
        match self {
            Self::LightOn => "light/light/turn_on",
            Self::LightOff => "light/light/turn_off",
            Self::DoorOpen => "cover/door/open",
            Self::DoorClose => "cover/door/close",
            Self::DoorStop => "cover/door/stop",
            Self::DoorTrigger => "button/toggle_door/press",
            Self::Lock => "lock/lock_remotes/lock",
            Self::Unlock => "lock/lock_remotes/unlock",
        }
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// Request/response client for one door controller.
#[derive(Clone)]
pub struct DoorClient {
    http: reqwest::Client,
    base_url: Url,
}

impl DoorClient {
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self::with_client(transport.build_client()?, base_url))
    }

    /// Controller reachable as plain HTTP on `host` (name, IP, optional port).
    pub fn for_host(host: &str, transport: &TransportConfig) -> Result<Self, Error> {
        let base_url = Url::parse(&format!("http://{host}/"))?;
        Self::new(base_url, transport)
    }

    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    /// URL of the server-sent event stream.
    pub fn events_url(&self) -> Result<Url, Error> {
        self.url("events")
    }

    /// Fetch the current status of one entity.
    pub async fn status(&self, entity: Entity) -> Result<EntityStatus, Error> {
        let url = self.url(entity.path())?;
        debug!("GET {}", url);

        let resp = self.http.get(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: body.clone(),
            }
        })
    }

    /// Issue an action.
    pub async fn send(&self, command: DoorCommand) -> Result<(), Error> {
        let url = self.url(command.path())?;
        debug!("POST {}", url);

        let resp = self.http.post(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        info!(%command, "door controller command sent");
        Ok(())
    }

    /// Identity probe: the light entity must answer with its own id.
    pub async fn identify(&self) -> Result<bool, Error> {
        let status = self.status(Entity::Light).await?;
        Ok(status.id == Entity::Light.id())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn entity_ids_round_trip() {
        for entity in Entity::POLL_ORDER {
            assert_eq!(Entity::from_id(entity.id()), Some(entity));
            assert_eq!(entity.id(), entity.path().replace('/', "-"));
        }
        assert_eq!(Entity::from_id("sensor-wifi_signal"), None);
    }

    #[test]
    fn poll_order_is_light_door_motion_motor_lock_obstruction() {
        let names: Vec<String> = Entity::POLL_ORDER.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            ["light", "door", "motion", "motor", "lock", "obstruction"]
        );
    }

    #[test]
    fn status_tolerates_missing_fields() {
        let status: EntityStatus =
            serde_json::from_str(r#"{"id":"binary_sensor-motion","state":"ON","value":true}"#)
                .unwrap();
        assert_eq!(status.entity(), Some(Entity::Motion));
        assert_eq!(status.value_f64(), None);
        assert!(status.current_operation.is_none());

        let cover: EntityStatus = serde_json::from_str(
            r#"{"id":"cover-door","state":"OPEN","value":0.5,"current_operation":"IDLE"}"#,
        )
        .unwrap();
        assert_eq!(cover.value_f64(), Some(0.5));
    }

    #[test]
    fn trigger_uses_button_endpoint() {
        assert_eq!(DoorCommand::DoorTrigger.path(), "button/toggle_door/press");
        assert_eq!(DoorCommand::Lock.path(), "lock/lock_remotes/lock");
    }
}
