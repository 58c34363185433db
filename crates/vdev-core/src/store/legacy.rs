// Deprecated per-device artifact set.
//
// One base file per device, `<dir>/<name with spaces as '_'>`, plus any
// siblings named `<base>.*`. Each holds a JSON object of records keyed
// `key<address>`. Read once, then deleted.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::fields::FieldValues;

/// Record key inside an artifact.
pub fn legacy_key(address: &str) -> String {
    format!("key{address}")
}

#[derive(Debug, Clone)]
pub struct LegacyArtifacts {
    base: PathBuf,
    candidates: Vec<PathBuf>,
}

impl LegacyArtifacts {
    /// Find the artifact set for a device. `None` when nothing is on disk.
    pub fn discover(dir: &Path, device_name: &str) -> Option<Self> {
        let base_name = device_name.replace(' ', "_");
        let sibling_prefix = format!("{base_name}.");

        let entries = std::fs::read_dir(dir).ok()?;
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| {
                let file_name = entry.file_name();
                let file_name = file_name.to_string_lossy();
                file_name == base_name.as_str() || file_name.starts_with(&sibling_prefix)
            })
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();

        if candidates.is_empty() {
            return None;
        }
        candidates.sort();
        Some(Self {
            base: dir.join(base_name),
            candidates,
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// Read the record for `address` from the first artifact that parses.
    ///
    /// `Ok(None)` means an artifact was readable but held no record for
    /// this address. `Err` means no artifact was readable at all.
    pub fn read_record(&self, address: &str) -> Result<Option<FieldValues>, CoreError> {
        let key = legacy_key(address);
        let mut last_reason = String::from("no candidates");

        for path in &self.candidates {
            let parsed = std::fs::read_to_string(path)
                .map_err(|e| e.to_string())
                .and_then(|text| {
                    serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&text)
                        .map_err(|e| e.to_string())
                });

            let mut records = match parsed {
                Ok(records) => records,
                Err(reason) => {
                    tracing::debug!(path = %path.display(), %reason, "skipping unreadable artifact");
                    last_reason = reason;
                    continue;
                }
            };

            return match records.remove(&key) {
                Some(record) => serde_json::from_value(record).map(Some).map_err(|e| {
                    CoreError::Migration {
                        path: path.clone(),
                        reason: format!("record {key}: {e}"),
                    }
                }),
                None => Ok(None),
            };
        }

        Err(CoreError::Migration {
            path: self.base.clone(),
            reason: last_reason,
        })
    }

    /// Delete every artifact. Returns the ones that could not be removed.
    pub fn remove(&self) -> Vec<(PathBuf, io::Error)> {
        self.candidates
            .iter()
            .filter_map(|path| std::fs::remove_file(path).err().map(|e| (path.clone(), e)))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn discover_matches_base_and_dotted_siblings_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["My_Door", "My_Door.dat", "My_Door.dir", "My_Doorbell.db", "Other.db"] {
            fs::write(dir.path().join(name), "{}").unwrap();
        }

        let found = LegacyArtifacts::discover(dir.path(), "My Door").unwrap();
        let names: Vec<String> = found
            .candidates()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["My_Door", "My_Door.dat", "My_Door.dir"]);
        assert_eq!(found.base(), dir.path().join("My_Door"));
    }

    #[test]
    fn missing_dir_or_files_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LegacyArtifacts::discover(dir.path(), "Garage").is_none());
        assert!(LegacyArtifacts::discover(&dir.path().join("nope"), "Garage").is_none());
    }

    #[test]
    fn readable_artifact_without_record_is_empty_success() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Garage.db"), r#"{"keyother": {"light": 1}}"#).unwrap();

        let found = LegacyArtifacts::discover(dir.path(), "Garage").unwrap();
        assert!(found.read_record("g1").unwrap().is_none());
    }

    #[test]
    fn unreadable_set_is_migration_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Garage.db"), "garbage").unwrap();

        let found = LegacyArtifacts::discover(dir.path(), "Garage").unwrap();
        assert!(matches!(
            found.read_record("g1"),
            Err(CoreError::Migration { .. })
        ));
        assert!(found.remove().is_empty());
        assert!(LegacyArtifacts::discover(dir.path(), "Garage").is_none());
    }
}
