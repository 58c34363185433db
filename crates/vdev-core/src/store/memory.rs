use dashmap::DashMap;

use super::Persistence;
use crate::error::CoreError;
use crate::fields::FieldValues;

/// In-process persistence, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    records: DashMap<String, FieldValues>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for MemoryPersistence {
    fn get(&self, name: &str) -> Result<Option<FieldValues>, CoreError> {
        Ok(self.records.get(name).map(|r| r.value().clone()))
    }

    fn put(&self, name: &str, values: &FieldValues) -> Result<(), CoreError> {
        self.records.insert(name.to_owned(), values.clone());
        Ok(())
    }
}
