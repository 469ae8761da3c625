use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use dreams_core::{DreamEntry, DreamUpdate};
use serde_json::Value;

use crate::atomic::atomic_write;
use crate::{apply_update, remove, DocumentStore, StoreError};

/// The board as a pretty-printed JSON array on disk.
///
/// A missing or blank file is an empty board. A file that does not hold a valid
/// dream list is an error and is never overwritten. Records stored without an
/// identity get one on first read, and the file is rewritten to keep it.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn read(&self) -> Result<Vec<DreamEntry>, StoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(&self.path, err)),
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let records: Vec<Value> = serde_json::from_str(&text)
            .map_err(|err| self.unreadable(StoreError::from(err)))?;
        let missing_ids = records.iter().filter(|record| record.get("id").is_none()).count();
        let dreams = records
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<DreamEntry>, _>>()
            .map_err(|err| self.unreadable(StoreError::from(err)))?;

        // Identities minted during deserialization must be stable across reads.
        if missing_ids > 0 {
            tracing::info!(
                target: "dreams.store",
                path = %self.path.display(),
                count = missing_ids,
                "assigned identities to records without one"
            );
            self.write(&dreams)?;
        }
        Ok(dreams)
    }

    fn unreadable(&self, err: StoreError) -> StoreError {
        tracing::error!(
            target: "dreams.store",
            path = %self.path.display(),
            error = %err,
            "data file is not a valid dream list"
        );
        err
    }

    fn write(&self, dreams: &[DreamEntry]) -> Result<(), StoreError> {
        let mut bytes = serde_json::to_vec_pretty(dreams)?;
        bytes.push(b'\n');
        atomic_write(&self.path, &bytes)?;
        tracing::debug!(
            target: "dreams.store",
            path = %self.path.display(),
            count = dreams.len(),
            "wrote data file"
        );
        Ok(())
    }
}

impl DocumentStore for JsonFileStore {
    fn list_all(&self) -> Result<Vec<DreamEntry>, StoreError> {
        let _guard = self.guard();
        self.read()
    }

    fn append(&self, dreams: Vec<DreamEntry>) -> Result<(), StoreError> {
        if dreams.is_empty() {
            return Ok(());
        }
        let _guard = self.guard();
        let mut all = self.read()?;
        all.extend(dreams);
        self.write(&all)
    }

    fn update(&self, id: &str, update: DreamUpdate) -> Result<Option<DreamEntry>, StoreError> {
        let _guard = self.guard();
        let mut all = self.read()?;
        let Some(updated) = apply_update(&mut all, id, update) else {
            return Ok(None);
        };
        self.write(&all)?;
        Ok(Some(updated))
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.guard();
        let mut all = self.read()?;
        if !remove(&mut all, id) {
            return Ok(false);
        }
        self.write(&all)?;
        Ok(true)
    }
}
