// Single-document JSON persistence.
//
// Every device record lives in one file; each `put` rewrites the whole
// document through a temp file and rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::Persistence;
use crate::error::CoreError;
use crate::fields::FieldValues;

#[derive(Debug)]
pub struct FilePersistence {
    path: PathBuf,
    records: Mutex<BTreeMap<String, FieldValues>>,
}

impl FilePersistence {
    /// Open (or lazily create) the document at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let records = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&text).map_err(|e| CoreError::Persistence {
                    message: format!("{}: {e}", path.display()),
                })?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_document(&self, records: &BTreeMap<String, FieldValues>) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Persistence for FilePersistence {
    fn get(&self, name: &str) -> Result<Option<FieldValues>, CoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(name).cloned())
    }

    fn put(&self, name: &str, values: &FieldValues) -> Result<(), CoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(name.to_owned(), values.clone());
        self.write_document(&records)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fields::GARAGE_FIELDS;

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("fields.json");

        let mut values = GARAGE_FIELDS.defaults();
        values.set("door", 100);
        {
            let store = FilePersistence::open(&path).unwrap();
            store.put("Garage", &values).unwrap();
            store.put("Shed", &GARAGE_FIELDS.defaults()).unwrap();
        }

        let reopened = FilePersistence::open(&path).unwrap();
        assert_eq!(reopened.get("Garage").unwrap(), Some(values));
        assert!(reopened.get("Shed").unwrap().is_some());
        assert!(reopened.get("Barn").unwrap().is_none());
    }

    #[test]
    fn corrupt_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fields.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert!(matches!(
            FilePersistence::open(&path),
            Err(CoreError::Persistence { .. })
        ));
    }
}
