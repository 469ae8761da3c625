//! Persistence for dream records.
//!
//! The board is a single JSON document (an array of [`DreamEntry`]). Every
//! mutation rewrites the whole document; concurrent writers get last-write-wins.

mod atomic;
mod error;
mod file;
mod memory;

use dreams_core::{DreamEntry, DreamUpdate};

pub use error::StoreError;
pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Document-store capability consumed by the service layer.
pub trait DocumentStore: Send + Sync {
    fn list_all(&self) -> Result<Vec<DreamEntry>, StoreError>;

    fn get(&self, id: &str) -> Result<Option<DreamEntry>, StoreError> {
        Ok(self.list_all()?.into_iter().find(|dream| dream.id == id))
    }

    fn append(&self, dreams: Vec<DreamEntry>) -> Result<(), StoreError>;

    /// Apply `update` to the record with `id`, returning the updated record.
    ///
    /// `None` fields leave the stored values untouched. Returns `Ok(None)` when no
    /// record has that identity.
    fn update(&self, id: &str, update: DreamUpdate) -> Result<Option<DreamEntry>, StoreError>;

    /// Returns whether a record was removed.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

fn apply_update(dreams: &mut [DreamEntry], id: &str, update: DreamUpdate) -> Option<DreamEntry> {
    let dream = dreams.iter_mut().find(|dream| dream.id == id)?;
    dream.apply(update);
    Some(dream.clone())
}

fn remove(dreams: &mut Vec<DreamEntry>, id: &str) -> bool {
    let before = dreams.len();
    dreams.retain(|dream| dream.id != id);
    dreams.len() != before
}
