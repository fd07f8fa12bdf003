//! Device registry: tracked items scoped to the signed-in owner.
//!
//! Every operation resolves the current owner through [`AuthProvider`] and
//! fails with [`Error::AuthRequired`] when nobody is signed in. Writes go
//! through the [`ItemStore`] and are announced to subscribers of that owner.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::alerts::{HapticKind, Haptics};
use crate::auth::AuthProvider;
use crate::error::{Error, Result};
use crate::storage::{ItemPatch, ItemStore};
use crate::types::{ItemId, OwnerId, ProximityStatus, TrackedItem};

/// Longest accepted scanned code.
pub const MAX_EXTERNAL_CODE_LENGTH: usize = 256;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// MAC addresses (`AA:BB:CC:DD:EE:FF`) and platform UUIDs both match.
static DEVICE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9:_-]{1,64}$").expect("valid device id regex"));

/// Check that a peripheral id looks like something a radio reports.
#[must_use]
pub fn is_valid_device_id(id: &str) -> bool {
    DEVICE_ID_RE.is_match(id)
}

fn validate_external_code(code: &str) -> Result<String> {
    let code = code.trim();
    if code.is_empty() {
        return Err(Error::InvalidInput("scanned code is empty".into()));
    }
    if code.chars().count() > MAX_EXTERNAL_CODE_LENGTH {
        return Err(Error::InvalidInput(format!(
            "scanned code exceeds {MAX_EXTERNAL_CODE_LENGTH} characters"
        )));
    }
    Ok(code.to_string())
}

fn validate_device_id(id: &str) -> Result<&str> {
    let id = id.trim();
    if is_valid_device_id(id) {
        Ok(id)
    } else {
        Err(Error::InvalidInput(format!("invalid device id: '{id}'")))
    }
}

/// Owner-scoped registry of tracked items.
#[derive(Clone)]
pub struct DeviceRegistry {
    store: Arc<dyn ItemStore>,
    auth: Arc<dyn AuthProvider>,
    haptics: Option<Arc<dyn Haptics>>,
    changes: broadcast::Sender<OwnerId>,
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl DeviceRegistry {
    /// Create a registry over a store and an auth provider.
    #[must_use]
    pub fn new(store: Arc<dyn ItemStore>, auth: Arc<dyn AuthProvider>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            store,
            auth,
            haptics: None,
            changes,
        }
    }

    /// Pulse `Success`/`Error` haptics on registration and linking.
    #[must_use]
    pub fn with_haptics(mut self, haptics: Arc<dyn Haptics>) -> Self {
        self.haptics = Some(haptics);
        self
    }

    /// Number of live subscriptions across all owners.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    /// The signed-in owner.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthRequired`] if nobody is signed in.
    pub async fn owner(&self) -> Result<OwnerId> {
        self.auth.current_owner().await.ok_or(Error::AuthRequired)
    }

    /// Register a scanned code as a new, unlinked item.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthRequired`] without a signed-in owner
    /// - [`Error::InvalidInput`] for an empty or oversized code
    /// - [`Error::PersistenceError`] if the store rejects the write
    pub async fn register(&self, external_code: &str) -> Result<ItemId> {
        let result = self.try_register(external_code).await;
        self.feedback(result.is_ok()).await;
        result
    }

    async fn try_register(&self, external_code: &str) -> Result<ItemId> {
        let owner = self.owner().await?;
        let code = validate_external_code(external_code)?;

        let item = TrackedItem::new(owner.clone(), code);
        self.store.insert(&item).await?;

        tracing::info!(
            item_id = %item.id,
            external_code = %item.external_code,
            owner_id = %owner,
            "item registered"
        );
        self.announce(owner);
        Ok(item.id)
    }

    /// Pair a beacon with one of the owner's items.
    ///
    /// Linking the beacon that is already linked changes nothing. A fresh
    /// link resets the item to `unknown` with no readings. The store applies
    /// the link only while the item is still unlinked, so of two concurrent
    /// links to different beacons exactly one succeeds.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthRequired`] without a signed-in owner
    /// - [`Error::InvalidInput`] for a malformed device id
    /// - [`Error::NotFound`] if the owner has no such item (nothing changes)
    /// - [`Error::AlreadyLinked`] if a different beacon is linked
    pub async fn link_device(&self, item_id: ItemId, device_id: &str) -> Result<TrackedItem> {
        let result = self.try_link(item_id, device_id).await;
        self.feedback(result.is_ok()).await;
        result
    }

    async fn try_link(&self, item_id: ItemId, device_id: &str) -> Result<TrackedItem> {
        let owner = self.owner().await?;
        let device_id = validate_device_id(device_id)?;
        let item = self.require(&owner, item_id).await?;

        if item.is_linked_to(device_id) {
            tracing::debug!(%item_id, device_id, "device already linked");
            return Ok(item);
        }
        if let Some(linked) = item.linked_device_id {
            return Err(Error::AlreadyLinked {
                item_id: item_id.to_string(),
                device_id: linked,
            });
        }

        let updated = self
            .store
            .update(&owner, item_id, &ItemPatch::link(device_id.to_string()))
            .await?;
        tracing::info!(%item_id, device_id, "device linked");
        self.announce(owner);
        Ok(updated)
    }

    /// Remove the beacon link and reset the item to `unknown`.
    ///
    /// # Errors
    ///
    /// [`Error::AuthRequired`] or [`Error::NotFound`].
    pub async fn unlink_device(&self, item_id: ItemId) -> Result<TrackedItem> {
        let owner = self.owner().await?;
        let item = self.require(&owner, item_id).await?;
        if !item.is_trackable() {
            return Ok(item);
        }

        let updated = self.store.update(&owner, item_id, &ItemPatch::unlink()).await?;
        tracing::info!(%item_id, "device unlinked");
        self.announce(owner);
        Ok(updated)
    }

    /// Delete one of the owner's items.
    ///
    /// # Errors
    ///
    /// [`Error::AuthRequired`] or [`Error::NotFound`].
    pub async fn remove(&self, item_id: ItemId) -> Result<()> {
        let owner = self.owner().await?;
        self.store.delete(&owner, item_id).await?;
        tracing::info!(%item_id, "item removed");
        self.announce(owner);
        Ok(())
    }

    /// Fetch one of the owner's items.
    ///
    /// # Errors
    ///
    /// [`Error::AuthRequired`] or [`Error::NotFound`].
    pub async fn get(&self, item_id: ItemId) -> Result<TrackedItem> {
        let owner = self.owner().await?;
        self.require(&owner, item_id).await
    }

    /// The owner's items, newest first.
    ///
    /// # Errors
    ///
    /// [`Error::AuthRequired`] or [`Error::PersistenceError`].
    pub async fn list(&self) -> Result<Vec<TrackedItem>> {
        let owner = self.owner().await?;
        self.list_for(&owner).await
    }

    pub(crate) async fn list_for(&self, owner: &OwnerId) -> Result<Vec<TrackedItem>> {
        Ok(self.store.list(owner).await?)
    }

    /// Watch the signed-in owner's items.
    ///
    /// `callback` gets the full list right away and again after every
    /// change. Dropping the handle cancels the subscription.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthRequired`] if nobody is signed in.
    pub async fn subscribe<F>(&self, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(Vec<TrackedItem>) + Send + Sync + 'static,
    {
        let owner = self.owner().await?;
        Ok(self.subscribe_owner(owner, callback))
    }

    /// Watch a specific owner's items. See [`DeviceRegistry::subscribe`].
    ///
    /// Must be called inside a tokio runtime.
    pub fn subscribe_owner<F>(&self, owner: OwnerId, callback: F) -> SubscriptionHandle
    where
        F: Fn(Vec<TrackedItem>) + Send + Sync + 'static,
    {
        // Subscribe before the first read so no change falls in between.
        let mut changes = self.changes.subscribe();
        let store = Arc::clone(&self.store);

        let task = tokio::spawn(async move {
            deliver(store.as_ref(), &owner, &callback).await;
            loop {
                match changes.recv().await {
                    Ok(changed) if changed == owner => {
                        deliver(store.as_ref(), &owner, &callback).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, owner_id = %owner, "subscriber lagged, resyncing");
                        deliver(store.as_ref(), &owner, &callback).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        SubscriptionHandle { task: Some(task) }
    }

    /// Persist one classified reading.
    pub(crate) async fn apply_reading(
        &self,
        owner: &OwnerId,
        item_id: ItemId,
        status: ProximityStatus,
        rssi: i16,
        at: DateTime<Utc>,
    ) -> Result<TrackedItem> {
        let updated = self
            .store
            .update(owner, item_id, &ItemPatch::reading(status, rssi, at))
            .await?;
        self.announce(owner.clone());
        Ok(updated)
    }

    async fn require(&self, owner: &OwnerId, item_id: ItemId) -> Result<TrackedItem> {
        self.store
            .get(owner, item_id)
            .await?
            .ok_or_else(|| Error::NotFound(item_id.to_string()))
    }

    fn announce(&self, owner: OwnerId) {
        // No receivers is fine.
        let _ = self.changes.send(owner);
    }

    async fn feedback(&self, ok: bool) {
        let Some(haptics) = &self.haptics else {
            return;
        };
        let kind = if ok { HapticKind::Success } else { HapticKind::Error };
        if let Err(err) = haptics.pulse(kind).await {
            tracing::debug!(%err, ?kind, "haptic pulse failed");
        }
    }
}

async fn deliver<F>(store: &dyn ItemStore, owner: &OwnerId, callback: &F)
where
    F: Fn(Vec<TrackedItem>),
{
    match store.list(owner).await {
        Ok(items) => callback(items),
        Err(err) => tracing::warn!(%err, owner_id = %owner, "failed to load items for subscriber"),
    }
}

/// Keeps a registry subscription alive.
#[derive(Debug)]
pub struct SubscriptionHandle {
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Stop deliveries. Calling this again does nothing.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether deliveries are still flowing.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::alerts::testing::RecordingHaptics;
    use crate::auth::SessionAuth;
    use crate::storage::testing::TestStore;
    use crate::storage::MemoryStore;

    fn registry() -> (DeviceRegistry, Arc<SessionAuth>) {
        let auth = Arc::new(SessionAuth::signed_in(OwnerId::new("alice")));
        let registry = DeviceRegistry::new(Arc::new(MemoryStore::new()), auth.clone());
        (registry, auth)
    }

    #[tokio::test]
    async fn test_register_then_list() {
        let (registry, _) = registry();

        let first = registry.register("bag:1001").await.unwrap();
        let second = registry.register("bag:1002").await.unwrap();

        let items = registry.list().await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().any(|i| i.id == first));
        assert!(items.iter().any(|i| i.id == second));
        assert!(items
            .iter()
            .all(|i| i.proximity_status == ProximityStatus::Unknown && !i.is_trackable()));
    }

    #[tokio::test]
    async fn test_register_requires_owner() {
        let (registry, auth) = registry();
        auth.sign_out();

        assert!(matches!(
            registry.register("bag:1001").await,
            Err(Error::AuthRequired)
        ));
        assert!(matches!(registry.list().await, Err(Error::AuthRequired)));
    }

    #[tokio::test]
    async fn test_register_rejects_bad_codes() {
        let (registry, _) = registry();

        assert!(matches!(
            registry.register("   ").await,
            Err(Error::InvalidInput(_))
        ));
        let long = "x".repeat(MAX_EXTERNAL_CODE_LENGTH + 1);
        assert!(matches!(
            registry.register(&long).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_link_missing_item_changes_nothing() {
        let (registry, _) = registry();
        let id = registry.register("bag:1001").await.unwrap();

        let err = registry.link_device(ItemId::new(), "AA:BB:CC").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let item = registry.get(id).await.unwrap();
        assert!(item.linked_device_id.is_none());
    }

    #[tokio::test]
    async fn test_link_same_device_is_noop_and_other_device_is_rejected() {
        let (registry, _) = registry();
        let id = registry.register("bag:1001").await.unwrap();

        let linked = registry.link_device(id, "AA:BB:CC").await.unwrap();
        assert_eq!(linked.linked_device_id.as_deref(), Some("AA:BB:CC"));

        let again = registry.link_device(id, "aa:bb:cc").await.unwrap();
        assert_eq!(again, linked);

        let err = registry.link_device(id, "11:22:33").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyLinked { .. }));

        tokio_test::assert_ok!(registry.unlink_device(id).await);
        let relinked = registry.link_device(id, "11:22:33").await.unwrap();
        assert_eq!(relinked.linked_device_id.as_deref(), Some("11:22:33"));
    }

    #[tokio::test]
    async fn test_concurrent_links_to_different_beacons() {
        let auth = Arc::new(SessionAuth::signed_in(OwnerId::new("alice")));
        let registry = DeviceRegistry::new(Arc::new(TestStore::yielding()), auth);
        let id = registry.register("bag:1001").await.unwrap();

        let (first, second) = tokio::join!(
            registry.link_device(id, "AA:BB:CC"),
            registry.link_device(id, "11:22:33"),
        );

        let stored = registry.get(id).await.unwrap().linked_device_id;
        let (winner, loser) = match (first, second) {
            (Ok(item), Err(err)) | (Err(err), Ok(item)) => (item, err),
            (first, second) => panic!("expected one link to win: {first:?} / {second:?}"),
        };
        assert_eq!(winner.linked_device_id, stored);
        assert!(matches!(
            loser,
            Error::AlreadyLinked { ref device_id, .. } if Some(device_id) == stored.as_ref()
        ));
    }

    #[tokio::test]
    async fn test_items_are_scoped_to_owner() {
        let (registry, auth) = registry();
        let id = registry.register("bag:1001").await.unwrap();

        auth.sign_in("bob").unwrap();
        assert!(registry.list().await.unwrap().is_empty());
        assert!(matches!(registry.get(id).await, Err(Error::NotFound(_))));
        assert!(matches!(registry.remove(id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_deletes_item() {
        let (registry, _) = registry();
        let id = registry.register("bag:1001").await.unwrap();

        tokio_test::assert_ok!(registry.remove(id).await);
        assert!(registry.list().await.unwrap().is_empty());
        tokio_test::assert_err!(registry.remove(id).await);
    }

    #[tokio::test]
    async fn test_haptics_follow_outcome() {
        let haptics = Arc::new(RecordingHaptics::default());
        let (registry, _) = registry();
        let registry = registry.with_haptics(haptics.clone());

        let id = registry.register("bag:1001").await.unwrap();
        let _ = registry.link_device(id, "not a mac!").await;

        assert_eq!(haptics.pulses(), vec![HapticKind::Success, HapticKind::Error]);
    }

    #[tokio::test]
    async fn test_subscribe_delivers_initial_list_and_changes() {
        let (registry, _) = registry();
        registry.register("bag:1001").await.unwrap();

        let seen: Arc<Mutex<Vec<usize>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let mut handle = registry
            .subscribe(move |items| sink.lock().unwrap().push(items.len()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.register("bag:1002").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);

        handle.cancel();
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_active());

        registry.register("bag:1003").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_subscription_ignores_other_owners() {
        let (registry, _) = registry();

        let seen: Arc<Mutex<Vec<usize>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let _handle = registry.subscribe_owner(OwnerId::new("bob"), move |items| {
            sink.lock().unwrap().push(items.len());
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.register("bag:1001").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*seen.lock().unwrap(), vec![0]);
    }
}
