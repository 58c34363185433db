// ── Entity setters ──
//
// Map one controller entity status onto device fields. Shared by the
// event reconciliation loop and the direct poll. Every setter is
// idempotent and ignores states it does not recognize.

use tracing::debug;
use vdev_api::{Entity, EntityStatus};

use crate::fields::FieldValues;
use crate::fields::garage::{DOOR, LIGHT, LOCK, MOTION, MOTOR, OBSTRUCT, POSITION};

/// Door status codes as exposed on the door channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum DoorStatus {
    Closed,
    Open,
    Unknown,
    Stopped,
    Closing,
    Opening,
}

impl DoorStatus {
    pub fn code(self) -> i64 {
        match self {
            Self::Closed => 0,
            Self::Open => 100,
            Self::Unknown => 101,
            Self::Stopped => 102,
            Self::Closing => 103,
            Self::Opening => 104,
        }
    }

    /// Combine `current_operation` and `state`; motion in the operation
    /// wins. `None` when neither says anything.
    pub fn from_status(current_operation: Option<&str>, state: Option<&str>) -> Option<Self> {
        match current_operation {
            Some("OPENING") => return Some(Self::Opening),
            Some("CLOSING") => return Some(Self::Closing),
            _ => {}
        }
        state.map(|s| match s {
            "CLOSED" => Self::Closed,
            "OPEN" => Self::Open,
            "OPENING" => Self::Opening,
            "STOPPED" => Self::Stopped,
            "CLOSING" => Self::Closing,
            _ => Self::Unknown,
        })
    }
}

/// Position percent reported for an out-of-range fraction.
pub const POSITION_UNKNOWN: i64 = 101;

#[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
fn position_percent(fraction: f64) -> i64 {
    let percent = (fraction * 100.0).round();
    if (0.0..=100.0).contains(&percent) {
        percent as i64
    } else {
        POSITION_UNKNOWN
    }
}

fn set_on_off(values: &mut FieldValues, field: &str, status: &EntityStatus, on: &str, off: &str) -> bool {
    match status.state.as_deref() {
        Some(s) if s == on => values.set(field, 1),
        Some(s) if s == off => values.set(field, 0),
        _ => false,
    }
}

fn set_door(values: &mut FieldValues, status: &EntityStatus) -> bool {
    let mut changed = false;
    if let Some(door) = DoorStatus::from_status(status.current_operation.as_deref(), status.state.as_deref()) {
        changed |= values.set(DOOR, door.code());
    }
    if let Some(fraction) = status.value_f64() {
        changed |= values.set(POSITION, position_percent(fraction));
    }
    changed
}

/// Apply `status` for `entity`. Returns `true` if any field changed.
pub fn apply_status(values: &mut FieldValues, entity: Entity, status: &EntityStatus) -> bool {
    debug!(
        %entity,
        state = ?status.state,
        value = ?status.value,
        current_operation = ?status.current_operation,
        "applying entity status"
    );
    match entity {
        Entity::Light => set_on_off(values, LIGHT, status, "ON", "OFF"),
        Entity::Door => set_door(values, status),
        Entity::Motion => set_on_off(values, MOTION, status, "ON", "OFF"),
        Entity::Motor => set_on_off(values, MOTOR, status, "ON", "OFF"),
        Entity::Lock => set_on_off(values, LOCK, status, "LOCKED", "UNLOCKED"),
        Entity::Obstruction => set_on_off(values, OBSTRUCT, status, "ON", "OFF"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::fields::GARAGE_FIELDS;

    fn status(body: serde_json::Value) -> EntityStatus {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn door_setter_is_idempotent() {
        let mut values = GARAGE_FIELDS.defaults();
        values.set(DOOR, 100);
        values.set(POSITION, 40);
        let closed = status(json!({
            "id": "cover-door", "state": "CLOSED", "value": 0.0, "current_operation": "IDLE"
        }));

        assert!(apply_status(&mut values, Entity::Door, &closed));
        assert_eq!((values.int(DOOR), values.int(POSITION)), (0, 0));
        assert!(!apply_status(&mut values, Entity::Door, &closed));
        assert_eq!((values.int(DOOR), values.int(POSITION)), (0, 0));
    }

    #[test]
    fn operation_dominates_state() {
        let mut values = GARAGE_FIELDS.defaults();
        for state in ["CLOSED", "OPEN", "STOPPED", "garbage"] {
            let moving = status(json!({
                "id": "cover-door", "state": state, "value": 0.3, "current_operation": "OPENING"
            }));
            apply_status(&mut values, Entity::Door, &moving);
            assert_eq!(values.int(DOOR), 104, "{state}");
        }
        let closing = status(json!({"id": "cover-door", "state": "OPEN", "current_operation": "CLOSING"}));
        apply_status(&mut values, Entity::Door, &closing);
        assert_eq!(values.int(DOOR), 103);
    }

    #[test]
    fn idle_stopped_and_out_of_range_position() {
        let mut values = GARAGE_FIELDS.defaults();
        let stopped = status(json!({
            "id": "cover-door", "state": "STOPPED", "value": 1.5, "current_operation": "IDLE"
        }));
        apply_status(&mut values, Entity::Door, &stopped);
        assert_eq!(values.int(DOOR), 102);
        assert_eq!(values.int(POSITION), 101);

        let odd = status(json!({"id": "cover-door", "state": "JAMMED", "value": 0.25}));
        apply_status(&mut values, Entity::Door, &odd);
        assert_eq!(values.int(DOOR), 101);
        assert_eq!(values.int(POSITION), 25);
    }

    #[test]
    fn binary_setters_touch_only_their_field() {
        let mut values = GARAGE_FIELDS.defaults();
        let before = values.clone();

        apply_status(&mut values, Entity::Lock, &status(json!({"id": "lock-lock_remotes", "state": "LOCKED"})));
        apply_status(&mut values, Entity::Motor, &status(json!({"id": "binary_sensor-motor", "state": "ON", "value": true})));
        assert_eq!(values.int(LOCK), 1);
        assert_eq!(values.int(MOTOR), 1);
        assert_eq!(values.int(MOTION), 0);

        assert!(!apply_status(&mut values, Entity::Light, &status(json!({"id": "light-light", "state": "DIM"}))));
        assert_ne!(values, before);
        assert_eq!(values.int(LIGHT), 0);
    }
}
