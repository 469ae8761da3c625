use std::sync::Mutex;

use dreams_core::{DreamEntry, DreamUpdate};

use crate::{apply_update, remove, DocumentStore, StoreError};

/// A [`DocumentStore`] that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    dreams: Mutex<Vec<DreamEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dreams(dreams: Vec<DreamEntry>) -> Self {
        Self {
            dreams: Mutex::new(dreams),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DreamEntry>> {
        self.dreams.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl DocumentStore for MemoryStore {
    fn list_all(&self) -> Result<Vec<DreamEntry>, StoreError> {
        Ok(self.lock().clone())
    }

    fn append(&self, dreams: Vec<DreamEntry>) -> Result<(), StoreError> {
        self.lock().extend(dreams);
        Ok(())
    }

    fn update(&self, id: &str, update: DreamUpdate) -> Result<Option<DreamEntry>, StoreError> {
        Ok(apply_update(&mut self.lock(), id, update))
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(remove(&mut self.lock(), id))
    }
}
