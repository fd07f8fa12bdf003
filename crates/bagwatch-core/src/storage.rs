//! Persistent storage for tracked items.
//!
//! Items are scoped by owner. [`ItemStore`] is the document-store seam the
//! registry writes through; [`JsonFileStore`] keeps one JSON file per owner
//! and [`MemoryStore`] keeps everything in process.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::types::{ItemId, OwnerId, ProximityStatus, TrackedItem};

/// Errors raised by item stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No item with this id exists for the owner.
    #[error("item not found: {item_id}")]
    NotFound {
        /// The missing item.
        item_id: String,
    },

    /// The item already has a different beacon linked.
    #[error("item {item_id} is already linked to {device_id}")]
    AlreadyLinked {
        /// The targeted item.
        item_id: String,
        /// The beacon the store holds.
        device_id: String,
    },

    /// An owner document could not be read.
    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An owner document could not be written.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An owner document is not valid JSON.
    #[error("failed to parse {}: {source}", path.display())]
    ParseError {
        /// File that failed.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Items could not be serialized.
    #[error("failed to serialize items: {0}")]
    SerializeError(#[from] serde_json::Error),

    /// The storage directory could not be created.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirError {
        /// Directory that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Result alias for store operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A field-level update of a stored item. `None` leaves a field untouched.
///
/// With `require_unlinked` set the store applies the patch only if the item
/// has no beacon, or already has the one being linked, checked under the
/// same write that applies it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPatch {
    /// Refuse with [`StorageError::AlreadyLinked`] if another beacon is linked.
    pub require_unlinked: bool,
    /// New beacon link (`Some(None)` clears it).
    pub linked_device_id: Option<Option<String>>,
    /// New classification.
    pub proximity_status: Option<ProximityStatus>,
    /// New last RSSI (`Some(None)` clears it).
    pub last_signal_strength: Option<Option<i16>>,
    /// New last observation time (`Some(None)` clears it).
    pub last_observed_at: Option<Option<DateTime<Utc>>>,
}

impl ItemPatch {
    /// Link a beacon and reset the item to its unclassified state.
    #[must_use]
    pub fn link(device_id: String) -> Self {
        Self {
            require_unlinked: true,
            linked_device_id: Some(Some(device_id)),
            ..Self::reset()
        }
    }

    /// Drop the beacon link and reset the item to its unclassified state.
    #[must_use]
    pub fn unlink() -> Self {
        Self {
            linked_device_id: Some(None),
            ..Self::reset()
        }
    }

    /// Record one classified reading.
    #[must_use]
    pub const fn reading(status: ProximityStatus, rssi: i16, at: DateTime<Utc>) -> Self {
        Self {
            require_unlinked: false,
            linked_device_id: None,
            proximity_status: Some(status),
            last_signal_strength: Some(Some(rssi)),
            last_observed_at: Some(Some(at)),
        }
    }

    const fn reset() -> Self {
        Self {
            require_unlinked: false,
            linked_device_id: None,
            proximity_status: Some(ProximityStatus::Unknown),
            last_signal_strength: Some(None),
            last_observed_at: Some(None),
        }
    }

    /// Apply the patch in place.
    pub fn apply_to(&self, item: &mut TrackedItem) {
        if let Some(device) = &self.linked_device_id {
            item.linked_device_id.clone_from(device);
        }
        if let Some(status) = self.proximity_status {
            item.proximity_status = status;
        }
        if let Some(rssi) = self.last_signal_strength {
            item.last_signal_strength = rssi;
        }
        if let Some(at) = self.last_observed_at {
            item.last_observed_at = at;
        }
    }
}

/// Document store for tracked items, keyed by owner.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Create a new item.
    async fn insert(&self, item: &TrackedItem) -> StorageResult<()>;

    /// Fetch one of the owner's items.
    async fn get(&self, owner: &OwnerId, id: ItemId) -> StorageResult<Option<TrackedItem>>;

    /// Apply a field update and return the updated item.
    async fn update(
        &self,
        owner: &OwnerId,
        id: ItemId,
        patch: &ItemPatch,
    ) -> StorageResult<TrackedItem>;

    /// Delete one of the owner's items.
    async fn delete(&self, owner: &OwnerId, id: ItemId) -> StorageResult<()>;

    /// All of the owner's items, newest first.
    async fn list(&self, owner: &OwnerId) -> StorageResult<Vec<TrackedItem>>;
}

/// Order items newest first by creation time.
pub fn sort_newest_first(items: &mut [TrackedItem]) {
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}

fn not_found(id: ItemId) -> StorageError {
    StorageError::NotFound {
        item_id: id.to_string(),
    }
}

fn patch_in(
    items: &mut [TrackedItem],
    id: ItemId,
    patch: &ItemPatch,
) -> StorageResult<TrackedItem> {
    let item = items
        .iter_mut()
        .find(|item| item.id == id)
        .ok_or_else(|| not_found(id))?;

    if patch.require_unlinked {
        if let Some(current) = &item.linked_device_id {
            let wanted = patch.linked_device_id.as_ref().and_then(Option::as_deref);
            if wanted.is_some_and(|wanted| current.eq_ignore_ascii_case(wanted)) {
                return Ok(item.clone());
            }
            return Err(StorageError::AlreadyLinked {
                item_id: id.to_string(),
                device_id: current.clone(),
            });
        }
    }

    patch.apply_to(item);
    Ok(item.clone())
}

fn remove_from(items: &mut Vec<TrackedItem>, id: ItemId) -> StorageResult<()> {
    let before = items.len();
    items.retain(|item| item.id != id);
    if items.len() == before {
        return Err(not_found(id));
    }
    Ok(())
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<OwnerId, Vec<TrackedItem>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn insert(&self, item: &TrackedItem) -> StorageResult<()> {
        self.items
            .write()
            .await
            .entry(item.owner_id.clone())
            .or_default()
            .push(item.clone());
        Ok(())
    }

    async fn get(&self, owner: &OwnerId, id: ItemId) -> StorageResult<Option<TrackedItem>> {
        Ok(self
            .items
            .read()
            .await
            .get(owner)
            .and_then(|items| items.iter().find(|item| item.id == id).cloned()))
    }

    async fn update(
        &self,
        owner: &OwnerId,
        id: ItemId,
        patch: &ItemPatch,
    ) -> StorageResult<TrackedItem> {
        let mut guard = self.items.write().await;
        let items = guard.get_mut(owner).ok_or_else(|| not_found(id))?;
        patch_in(items, id, patch)
    }

    async fn delete(&self, owner: &OwnerId, id: ItemId) -> StorageResult<()> {
        let mut guard = self.items.write().await;
        let items = guard.get_mut(owner).ok_or_else(|| not_found(id))?;
        remove_from(items, id)
    }

    async fn list(&self, owner: &OwnerId) -> StorageResult<Vec<TrackedItem>> {
        let mut items = self.items.read().await.get(owner).cloned().unwrap_or_default();
        sort_newest_first(&mut items);
        Ok(items)
    }
}

// =============================================================================
// JSON FILE STORE
// =============================================================================

/// One pretty-printed JSON array per owner at `<data_dir>/items/<owner>.json`.
///
/// Writes go to a temporary file first and are renamed into place.
#[derive(Debug)]
pub struct JsonFileStore {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Create a store rooted at `data_dir`.
    #[must_use]
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            write_lock: Mutex::new(()),
        }
    }

    fn owner_path(&self, owner: &OwnerId) -> PathBuf {
        self.data_dir
            .join("items")
            .join(format!("{}.json", owner.as_str()))
    }

    fn load(&self, owner: &OwnerId) -> StorageResult<Vec<TrackedItem>> {
        let path = self.owner_path(owner);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path).map_err(|source| StorageError::ReadError {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StorageError::ParseError { path, source })
    }

    fn save(&self, owner: &OwnerId, items: &[TrackedItem]) -> StorageResult<()> {
        let path = self.owner_path(owner);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = serde_json::to_string_pretty(items)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|source| StorageError::WriteError {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| StorageError::WriteError { path, source })
    }
}

#[async_trait]
impl ItemStore for JsonFileStore {
    async fn insert(&self, item: &TrackedItem) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.load(&item.owner_id)?;
        items.push(item.clone());
        self.save(&item.owner_id, &items)
    }

    async fn get(&self, owner: &OwnerId, id: ItemId) -> StorageResult<Option<TrackedItem>> {
        Ok(self.load(owner)?.into_iter().find(|item| item.id == id))
    }

    async fn update(
        &self,
        owner: &OwnerId,
        id: ItemId,
        patch: &ItemPatch,
    ) -> StorageResult<TrackedItem> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.load(owner)?;
        let updated = patch_in(&mut items, id, patch)?;
        self.save(owner, &items)?;
        Ok(updated)
    }

    async fn delete(&self, owner: &OwnerId, id: ItemId) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.load(owner)?;
        remove_from(&mut items, id)?;
        self.save(owner, &items)
    }

    async fn list(&self, owner: &OwnerId) -> StorageResult<Vec<TrackedItem>> {
        let mut items = self.load(owner)?;
        sort_newest_first(&mut items);
        Ok(items)
    }
}
