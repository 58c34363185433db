// ── Field registry ──
//
// Static per-device-type table of field name -> (channel, default, kind).
// Built once, never mutated. Device state is a name -> value map holding
// every registry field, persisted as a whole record.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

// ── Channel ──────────────────────────────────────────────────────

/// Exposed status slot on a device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Channel {
    Gv0,
    Gv1,
    Gv2,
    Gv3,
    Gv4,
    Gv5,
    Gv6,
    Gv7,
    Gv8,
    Gv9,
}

// ── FieldValue ───────────────────────────────────────────────────

/// Typed scalar stored in a field. Serialized untagged so persisted
/// records stay plain JSON objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Integral values become `Int`, everything else `Float`.
    #[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
    pub fn from_number(value: f64) -> Self {
        if value.fract() == 0.0 && value.abs() < 9.0e15 {
            Self::Int(value as i64)
        } else {
            Self::Float(value)
        }
    }

    #[allow(clippy::as_conversions, clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Integer view: ints, integral floats, bools and numeric text.
    #[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Some(*f as i64),
            Self::Float(_) => None,
            Self::Text(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                        .map(|f| f as i64)
                })
            }
        }
    }

    /// Equality by numeric value when both sides are numeric.
    #[allow(clippy::float_cmp)]
    pub fn numeric_eq(&self, other: &Self) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

// ── FieldSpec ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Changes at runtime, pushed to its channel.
    State,
    /// Set once from configuration, never pushed.
    Config,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub channel: Option<Channel>,
    pub default: FieldValue,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn state(channel: Channel, default: impl Into<FieldValue>) -> Self {
        Self {
            channel: Some(channel),
            default: default.into(),
            kind: FieldKind::State,
        }
    }

    pub fn config(default: impl Into<FieldValue>) -> Self {
        Self {
            channel: None,
            default: default.into(),
            kind: FieldKind::Config,
        }
    }

    /// Channel present and kind is `State`.
    pub fn should_update(&self) -> bool {
        self.channel.is_some() && self.kind == FieldKind::State
    }
}

// ── FieldRegistry ────────────────────────────────────────────────

/// Ordered table of the fields one device type carries.
#[derive(Debug, Clone)]
pub struct FieldRegistry {
    fields: Vec<(&'static str, FieldSpec)>,
}

impl FieldRegistry {
    pub fn new(fields: Vec<(&'static str, FieldSpec)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, s)| s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldSpec)> {
        self.fields.iter().map(|(n, s)| (*n, s))
    }

    /// `(name, channel)` for every field that is pushed to a channel.
    pub fn channel_fields(&self) -> impl Iterator<Item = (&'static str, Channel)> + '_ {
        self.iter()
            .filter(|(_, spec)| spec.should_update())
            .filter_map(|(name, spec)| spec.channel.map(|c| (name, c)))
    }

    pub fn config_fields(&self) -> impl Iterator<Item = (&'static str, &FieldSpec)> {
        self.iter().filter(|(_, spec)| spec.kind == FieldKind::Config)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn defaults(&self) -> FieldValues {
        FieldValues(
            self.iter()
                .map(|(name, spec)| (name.to_owned(), spec.default.clone()))
                .collect(),
        )
    }
}

// ── FieldValues ──────────────────────────────────────────────────

/// Name -> value for every registry field of one device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldValues(BTreeMap<String, FieldValue>);

impl FieldValues {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    /// Integer view of a field, `0` when absent or non-numeric.
    pub fn int(&self, name: &str) -> i64 {
        self.get(name).and_then(FieldValue::as_i64).unwrap_or(0)
    }

    /// Set a field. Returns `true` if the stored value changed.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> bool {
        let value = value.into();
        match self.0.get_mut(name) {
            Some(current) if current.numeric_eq(&value) => false,
            Some(current) => {
                *current = value;
                true
            }
            None => {
                self.0.insert(name.to_owned(), value);
                true
            }
        }
    }

    /// Take each registry field from `src` when present there; keep the
    /// current value otherwise. Keys outside the registry are ignored.
    pub fn apply(&mut self, src: &FieldValues, registry: &FieldRegistry) {
        for (name, _) in registry.iter() {
            if let Some(value) = src.get(name) {
                self.0.insert(name.to_owned(), value.clone());
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, FieldValue)> for FieldValues {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ── Garage registry ──────────────────────────────────────────────

/// Field names of the garage device.
pub mod garage {
    pub const LIGHT: &str = "light";
    pub const DOOR: &str = "door";
    pub const DCOMMAND: &str = "dcommand";
    pub const MOTION: &str = "motion";
    pub const LOCK: &str = "lock";
    pub const OBSTRUCT: &str = "obstruct";
    pub const MOTOR: &str = "motor";
    pub const POSITION: &str = "position";
    pub const CONTROLLER: &str = "controller";

    /// State fields that may be mirrored to a gateway variable, each with
    /// its `<f>T` / `<f>Id` config pair.
    pub const VARIABLE_FIELDS: [(&str, &str, &str); 8] = [
        (LIGHT, "lightT", "lightId"),
        (DOOR, "doorT", "doorId"),
        (DCOMMAND, "dcommandT", "dcommandId"),
        (MOTION, "motionT", "motionId"),
        (LOCK, "lockT", "lockId"),
        (OBSTRUCT, "obstructT", "obstructId"),
        (MOTOR, "motorT", "motorId"),
        (POSITION, "positionT", "positionId"),
    ];

    /// `(type field, id field)` for a state field.
    pub fn variable_of(field: &str) -> Option<(&'static str, &'static str)> {
        VARIABLE_FIELDS
            .iter()
            .find(|(f, _, _)| *f == field)
            .map(|(_, t, id)| (*t, *id))
    }
}

fn garage_registry() -> FieldRegistry {
    use garage::{CONTROLLER, DCOMMAND, DOOR, LIGHT, LOCK, MOTION, MOTOR, OBSTRUCT, POSITION};

    let mut fields = vec![
        (LIGHT, FieldSpec::state(Channel::Gv0, 0)),
        (DOOR, FieldSpec::state(Channel::Gv1, 0)),
        (DCOMMAND, FieldSpec::state(Channel::Gv2, 0)),
        (MOTION, FieldSpec::state(Channel::Gv3, 0)),
        (LOCK, FieldSpec::state(Channel::Gv4, 0)),
        (OBSTRUCT, FieldSpec::state(Channel::Gv5, 0)),
        (MOTOR, FieldSpec::state(Channel::Gv8, 0)),
        (POSITION, FieldSpec::state(Channel::Gv9, 0)),
    ];
    for (_, type_field, id_field) in garage::VARIABLE_FIELDS {
        fields.push((type_field, FieldSpec::config(1)));
        fields.push((id_field, FieldSpec::config(0)));
    }
    fields.push((CONTROLLER, FieldSpec::config(false)));
    FieldRegistry::new(fields)
}

/// Registry of the garage device.
pub static GARAGE_FIELDS: LazyLock<FieldRegistry> = LazyLock::new(garage_registry);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn should_update_needs_channel_and_state() {
        assert!(FieldSpec::state(Channel::Gv0, 0).should_update());
        assert!(!FieldSpec::config(1).should_update());
        let odd = FieldSpec {
            channel: Some(Channel::Gv3),
            default: 0.into(),
            kind: FieldKind::Config,
        };
        assert!(!odd.should_update());
    }

    #[test]
    fn garage_registry_layout() {
        let reg = &*GARAGE_FIELDS;
        assert_eq!(reg.len(), 8 + 16 + 1);

        let channels: Vec<(&str, String)> = reg
            .channel_fields()
            .map(|(n, c)| (n, c.to_string()))
            .collect();
        assert_eq!(
            channels,
            vec![
                ("light", "GV0".to_string()),
                ("door", "GV1".to_string()),
                ("dcommand", "GV2".to_string()),
                ("motion", "GV3".to_string()),
                ("lock", "GV4".to_string()),
                ("obstruct", "GV5".to_string()),
                ("motor", "GV8".to_string()),
                ("position", "GV9".to_string()),
            ]
        );
        assert_eq!(reg.get("doorT").unwrap().default, FieldValue::Int(1));
        assert_eq!(reg.get("doorId").unwrap().default, FieldValue::Int(0));
        assert_eq!(reg.get("controller").unwrap().default, FieldValue::Bool(false));
    }

    #[test]
    fn values_serialize_as_plain_json() {
        let mut values = GARAGE_FIELDS.defaults();
        values.set("light", 1);
        values.set("controller", "10.0.0.5");
        let json = serde_json::to_value(&values).unwrap();
        assert_eq!(json["light"], serde_json::json!(1));
        assert_eq!(json["controller"], serde_json::json!("10.0.0.5"));

        let back: FieldValues = serde_json::from_value(json).unwrap();
        assert_eq!(back.get("controller"), Some(&FieldValue::Text("10.0.0.5".into())));
    }

    #[test]
    fn set_reports_change_by_numeric_value() {
        let mut values = GARAGE_FIELDS.defaults();
        assert!(!values.set("door", FieldValue::Float(0.0)));
        assert!(values.set("door", 100));
        assert!(!values.set("door", FieldValue::from_number(100.0)));
    }

    #[test]
    fn apply_ignores_unknown_and_keeps_missing() {
        let mut values = GARAGE_FIELDS.defaults();
        values.set("lock", 1);
        let src: FieldValues = [
            ("light".to_string(), FieldValue::Int(1)),
            ("created".to_string(), FieldValue::Text("yes".into())),
        ]
        .into_iter()
        .collect();
        values.apply(&src, &GARAGE_FIELDS);
        assert_eq!(values.int("light"), 1);
        assert_eq!(values.int("lock"), 1);
        assert!(values.get("created").is_none());
    }

    #[test]
    fn integer_views() {
        assert_eq!(FieldValue::Text("12".into()).as_i64(), Some(12));
        assert_eq!(FieldValue::Text("12.0".into()).as_i64(), Some(12));
        assert_eq!(FieldValue::Float(2.5).as_i64(), None);
        assert_eq!(FieldValue::Bool(true).as_i64(), Some(1));
        assert_eq!(FieldValue::from_number(3.0), FieldValue::Int(3));
        assert_eq!(FieldValue::from_number(3.5), FieldValue::Float(3.5));
    }
}
