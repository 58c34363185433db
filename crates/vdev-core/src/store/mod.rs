// ── Persistent field store ──
//
// Loads a device's fields from key/value persistence (keyed by device
// name), falling back to a one-time migration of the deprecated on-disk
// artifact set, then to registry defaults. Every load finishes with a
// write-back and a forced push of all channel fields.

mod file;
mod legacy;
mod memory;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::channels::ChannelBoard;
use crate::error::CoreError;
use crate::fields::{FieldRegistry, FieldValue, FieldValues};

pub use file::FilePersistence;
pub use legacy::{LegacyArtifacts, legacy_key};
pub use memory::MemoryPersistence;

/// Key/value persistence, one opaque record per device name.
pub trait Persistence: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<FieldValues>, CoreError>;

    /// Whole-record overwrite. Last writer wins.
    fn put(&self, name: &str, values: &FieldValues) -> Result<(), CoreError>;
}

pub struct FieldStore {
    persistence: Arc<dyn Persistence>,
    legacy_dir: Option<PathBuf>,
}

impl FieldStore {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            legacy_dir: None,
        }
    }

    /// Directory holding deprecated per-device artifacts to migrate from.
    pub fn with_legacy_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.legacy_dir = Some(dir.into());
        self
    }

    /// Load a device's fields. Never fails: unreadable sources degrade to
    /// registry defaults.
    pub fn load(
        &self,
        name: &str,
        address: &str,
        registry: &FieldRegistry,
        channels: &ChannelBoard,
    ) -> FieldValues {
        let mut values = registry.defaults();

        let persisted = match self.persistence.get(name) {
            Ok(found) => found,
            Err(e) => {
                warn!(device = name, error = %e, "persisted record unreadable, ignoring");
                None
            }
        };

        if let Some(record) = persisted {
            values.apply(&record, registry);
            info!(device = name, "loaded from persistence");
        } else if let Some(record) = self.migrate(name, address) {
            values.apply(&record, registry);
            info!(device = name, "migrated from legacy artifacts");
        } else {
            info!(device = name, "no stored fields, using defaults");
        }

        if let Err(e) = self.store(name, &values) {
            warn!(device = name, error = %e, "initial store failed");
        }
        Self::push_channels(name, &values, registry, channels);
        values
    }

    fn migrate(&self, name: &str, address: &str) -> Option<FieldValues> {
        let dir = self.legacy_dir.as_deref()?;
        let artifacts = LegacyArtifacts::discover(dir, name)?;
        info!(device = name, files = artifacts.candidates().len(), "legacy artifacts found, migrating");

        let record = match artifacts.read_record(address) {
            Ok(record) => record,
            Err(e) => {
                warn!(device = name, error = %e, "legacy migration aborted");
                return None;
            }
        };

        let failures = artifacts.remove();
        if failures.is_empty() {
            info!(device = name, base = %artifacts.base().display(), "deleted legacy artifacts");
        }
        for (path, e) in failures {
            warn!(device = name, path = %path.display(), error = %e, "could not delete legacy artifact");
        }
        record
    }

    pub fn store(&self, name: &str, values: &FieldValues) -> Result<(), CoreError> {
        self.persistence.put(name, values)
    }

    /// Force-publish every channel field.
    pub fn push_channels(
        name: &str,
        values: &FieldValues,
        registry: &FieldRegistry,
        channels: &ChannelBoard,
    ) {
        for (field, channel) in registry.channel_fields() {
            let value = values.get(field).and_then(FieldValue::as_f64).unwrap_or(0.0);
            channels.publish(name, channel, value, true);
        }
    }
}
