//! Tracking coordinator.
//!
//! Owns the monitoring loop: it follows the owner's items through a registry
//! subscription, runs one scan window per tick for all linked items,
//! classifies each matching reading, persists it and raises alerts on
//! transitions.
//!
//! ```text
//!  registry ──subscribe──▶ watch<Vec<TrackedItem>> ──tick──▶ scan window
//!                                                              │
//!            alerts ◀── classify + persist ◀── match by device id
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use utoipa::ToSchema;

use crate::alerts::AlertEmitter;
use crate::bluetooth::{BleScanner, RadioState};
use crate::classifier::classify;
use crate::config::{ProximityConfig, ProximityConfigPatch};
use crate::error::{Error, Result};
use crate::registry::{DeviceRegistry, SubscriptionHandle};
use crate::types::{ItemId, OwnerId, ProximityStatus, TrackedItem};

/// Where a single item is in the monitoring cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    /// No beacon linked; never scanned for.
    Unlinked,
    /// Linked and waiting for the next tick.
    Idle,
    /// Included in the running scan window.
    Scanning,
    /// A reading arrived and is being persisted.
    Updating,
}

/// Outcome of one monitoring cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CycleReport {
    /// Another scan held the radio, so this cycle did nothing.
    pub skipped: bool,
    /// Items with a linked beacon.
    pub linked_items: usize,
    /// Distinct peripherals heard during the window.
    pub devices_seen: usize,
    /// Items that received a reading.
    pub updated: Vec<ItemId>,
    /// Alerts raised.
    pub alerts: usize,
    /// Radio failure that cut the window short.
    pub scan_error: Option<String>,
}

/// Snapshot of the coordinator for status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MonitoringStatus {
    /// Whether the monitoring loop is running.
    pub active: bool,
    /// Owner being monitored.
    pub owner_id: Option<OwnerId>,
    /// Whether a scan currently holds the radio.
    pub scanning: bool,
    /// Current radio state.
    pub radio_state: RadioState,
    /// Active proximity configuration.
    pub config: ProximityConfig,
}

struct Monitor {
    owner: OwnerId,
    task: JoinHandle<()>,
    subscription: SubscriptionHandle,
}

#[derive(Debug)]
struct Tracked {
    state: TrackingState,
    device_id: String,
    last_status: ProximityStatus,
    /// Last observation the store is known to hold.
    stored_observed_at: Option<DateTime<Utc>>,
}

struct Inner {
    registry: DeviceRegistry,
    scanner: BleScanner,
    alerts: AlertEmitter,
    config: RwLock<ProximityConfig>,
    monitor: Mutex<Option<Monitor>>,
    tracked: Mutex<HashMap<ItemId, Tracked>>,
}

/// Drives proximity monitoring for the signed-in owner.
///
/// Cheap to clone; clones share one monitoring loop.
#[derive(Clone)]
pub struct TrackingCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TrackingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingCoordinator")
            .field("monitoring", &self.is_monitoring())
            .field("scanner", &self.inner.scanner)
            .finish_non_exhaustive()
    }
}

impl TrackingCoordinator {
    /// Assemble a coordinator. `config` is expected to be validated already
    /// (as [`crate::Config::load`] does).
    #[must_use]
    pub fn new(
        registry: DeviceRegistry,
        scanner: BleScanner,
        alerts: AlertEmitter,
        config: ProximityConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                scanner,
                alerts,
                config: RwLock::new(config),
                monitor: Mutex::new(None),
                tracked: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The registry this coordinator follows.
    #[must_use]
    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    /// The scanner this coordinator drives.
    #[must_use]
    pub fn scanner(&self) -> &BleScanner {
        &self.inner.scanner
    }

    /// Current proximity configuration.
    #[must_use]
    pub fn proximity_config(&self) -> ProximityConfig {
        self.inner.config()
    }

    /// Apply a partial configuration update. Takes effect from the next
    /// classification; a changed interval from the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] (and keeps the old configuration) if
    /// the result would be invalid, e.g. near below far.
    pub fn update_proximity_config(&self, patch: &ProximityConfigPatch) -> Result<ProximityConfig> {
        let mut config = self
            .inner
            .config
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let updated = config.merged(patch);
        updated.validate()?;
        *config = updated;
        tracing::info!(
            near_threshold = updated.near_threshold,
            far_threshold = updated.far_threshold,
            scan_interval_ms = updated.scan_interval_ms,
            scan_window_ms = updated.scan_window_ms,
            "proximity configuration updated"
        );
        Ok(updated)
    }

    /// Start the monitoring loop for the signed-in owner.
    ///
    /// Calling it again for the same owner does nothing. If a different
    /// owner is now signed in, the old loop and its subscription are torn
    /// down first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthRequired`] if nobody is signed in.
    pub async fn start_proximity_monitoring(&self) -> Result<()> {
        let owner = self.inner.registry.owner().await?;

        let mut slot = self.inner.lock_monitor();
        if let Some(existing) = slot.as_ref() {
            if existing.owner == owner && !existing.task.is_finished() {
                tracing::debug!(owner_id = %owner, "monitoring already running");
                return Ok(());
            }
        }
        if let Some(mut previous) = slot.take() {
            previous.subscription.cancel();
            previous.task.abort();
            tracing::info!(
                previous_owner = %previous.owner,
                owner_id = %owner,
                "owner changed, restarting monitoring"
            );
        }

        let (items_tx, items_rx) = watch::channel(Vec::new());
        let subscription = self
            .inner
            .registry
            .subscribe_owner(owner.clone(), move |items| {
                items_tx.send_replace(items);
            });

        let period = self.inner.config().scan_interval();
        let task = tokio::spawn(run_monitor(
            Arc::downgrade(&self.inner),
            owner.clone(),
            items_rx,
            period,
        ));

        tracing::info!(
            owner_id = %owner,
            interval_ms = period.as_millis(),
            "proximity monitoring started"
        );
        *slot = Some(Monitor {
            owner,
            task,
            subscription,
        });
        Ok(())
    }

    /// Stop monitoring: cancel the loop and the subscription and release the
    /// radio. Safe to call at any time, any number of times.
    pub async fn stop_all_monitoring(&self) {
        let monitor = self.inner.lock_monitor().take();
        if let Some(mut monitor) = monitor {
            monitor.subscription.cancel();
            monitor.task.abort();
            let _ = monitor.task.await;
            tracing::info!(owner_id = %monitor.owner, "proximity monitoring stopped");
        }
        self.inner.scanner.stop_active().await;
        self.inner.settle();
    }

    /// Whether the monitoring loop is running.
    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        self.inner
            .lock_monitor()
            .as_ref()
            .is_some_and(|monitor| !monitor.task.is_finished())
    }

    /// Run one cycle now against the stored items, outside the loop.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthRequired`] if nobody is signed in
    /// - [`Error::RadioUnavailable`] / [`Error::ScanError`] if the scan
    ///   could not start
    /// - [`Error::PersistenceError`] if the items could not be loaded
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let owner = self.inner.registry.owner().await?;
        let items = self.inner.registry.list_for(&owner).await?;
        self.inner.cycle(&owner, items).await
    }

    /// Where an item is in the monitoring cycle.
    ///
    /// # Errors
    ///
    /// [`Error::AuthRequired`] or [`Error::NotFound`].
    pub async fn tracking_state(&self, item_id: ItemId) -> Result<TrackingState> {
        let item = self.inner.registry.get(item_id).await?;
        if !item.is_trackable() {
            return Ok(TrackingState::Unlinked);
        }
        Ok(self
            .inner
            .lock_tracked()
            .get(&item_id)
            .map_or(TrackingState::Idle, |tracked| tracked.state))
    }

    /// Status snapshot.
    pub async fn status(&self) -> MonitoringStatus {
        let (active, owner_id) = {
            let slot = self.inner.lock_monitor();
            match slot.as_ref() {
                Some(monitor) => (!monitor.task.is_finished(), Some(monitor.owner.clone())),
                None => (false, None),
            }
        };
        MonitoringStatus {
            active,
            owner_id,
            scanning: self.inner.scanner.is_scanning(),
            radio_state: self.inner.scanner.radio_state().await,
            config: self.inner.config(),
        }
    }
}

impl Inner {
    fn config(&self) -> ProximityConfig {
        *self
            .config
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_monitor(&self) -> MutexGuard<'_, Option<Monitor>> {
        self.monitor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_tracked(&self) -> MutexGuard<'_, HashMap<ItemId, Tracked>> {
        self.tracked
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// One scan window fanned out to every linked item.
    async fn cycle(&self, owner: &OwnerId, items: Vec<TrackedItem>) -> Result<CycleReport> {
        let linked: Vec<TrackedItem> =
            items.into_iter().filter(TrackedItem::is_trackable).collect();
        self.sync_tracked(&linked);

        let mut report = CycleReport {
            linked_items: linked.len(),
            ..CycleReport::default()
        };
        if linked.is_empty() {
            return Ok(report);
        }

        let config = self.config();
        self.set_states(&linked, TrackingState::Scanning);

        let session = match self.scanner.scan(config.scan_window()).await {
            Ok(session) => session,
            Err(Error::ScanInProgress) => {
                self.set_states(&linked, TrackingState::Idle);
                tracing::debug!(owner_id = %owner, "radio busy, skipping cycle");
                report.skipped = true;
                return Ok(report);
            }
            Err(err) => {
                self.set_states(&linked, TrackingState::Idle);
                return Err(err);
            }
        };

        let scan = session.collect().await;
        report.devices_seen = scan.devices.len();
        if let Some(err) = &scan.error {
            tracing::warn!(
                %err,
                devices = scan.devices.len(),
                "scan ended early, using partial results"
            );
            report.scan_error = Some(err.to_string());
        }

        for item in &linked {
            let reading = item
                .linked_device_id
                .as_deref()
                .and_then(|device_id| scan.find(device_id))
                .and_then(|device| device.signal_strength.map(|rssi| (rssi, device.discovered_at)));
            let Some((rssi, observed_at)) = reading else {
                self.set_state(item.id, TrackingState::Idle);
                continue;
            };

            self.set_state(item.id, TrackingState::Updating);
            let previous = self.last_status(item.id).unwrap_or(item.proximity_status);
            let status = classify(rssi, previous, &config);
            tracing::debug!(item_id = %item.id, rssi, %previous, %status, "reading classified");

            let stored = match self
                .registry
                .apply_reading(owner, item.id, status, rssi, observed_at)
                .await
            {
                Ok(updated) => {
                    report.updated.push(item.id);
                    updated.last_observed_at
                }
                Err(err) => {
                    tracing::warn!(
                        %err,
                        item_id = %item.id,
                        "failed to persist reading, keeping in-memory status"
                    );
                    None
                }
            };
            self.remember(item.id, status, stored);

            if self.alerts.notify(item, previous, status).await {
                report.alerts += 1;
            }
            self.set_state(item.id, TrackingState::Idle);
        }

        Ok(report)
    }

    /// Align the tracking table with the current linked items.
    ///
    /// An entry starts over from the stored status when the beacon changed,
    /// or when the store lost readings the entry saw persisted (unlink and
    /// relink of the same beacon resets them).
    fn sync_tracked(&self, linked: &[TrackedItem]) {
        let mut tracked = self.lock_tracked();
        tracked.retain(|id, _| linked.iter().any(|item| item.id == *id));
        for item in linked {
            let Some(device_id) = item.linked_device_id.as_deref() else {
                continue;
            };
            let current = tracked.get(&item.id).is_some_and(|entry| {
                entry.device_id.eq_ignore_ascii_case(device_id)
                    && !(item.last_observed_at.is_none() && entry.stored_observed_at.is_some())
            });
            if !current {
                tracked.insert(
                    item.id,
                    Tracked {
                        state: TrackingState::Idle,
                        device_id: device_id.to_string(),
                        last_status: item.proximity_status,
                        stored_observed_at: item.last_observed_at,
                    },
                );
            }
        }
    }

    fn set_state(&self, id: ItemId, state: TrackingState) {
        if let Some(entry) = self.lock_tracked().get_mut(&id) {
            entry.state = state;
        }
    }

    fn set_states(&self, items: &[TrackedItem], state: TrackingState) {
        let mut tracked = self.lock_tracked();
        for item in items {
            if let Some(entry) = tracked.get_mut(&item.id) {
                entry.state = state;
            }
        }
    }

    fn last_status(&self, id: ItemId) -> Option<ProximityStatus> {
        self.lock_tracked().get(&id).map(|entry| entry.last_status)
    }

    /// Record the classified status; `stored` is the observation time the
    /// store now holds, if the write went through.
    fn remember(&self, id: ItemId, status: ProximityStatus, stored: Option<DateTime<Utc>>) {
        if let Some(entry) = self.lock_tracked().get_mut(&id) {
            entry.last_status = status;
            if stored.is_some() {
                entry.stored_observed_at = stored;
            }
        }
    }

    /// Anything mid-cycle goes back to idle.
    fn settle(&self) {
        for entry in self.lock_tracked().values_mut() {
            entry.state = TrackingState::Idle;
        }
    }
}

fn ticker(period: Duration, immediate: bool) -> Interval {
    let start = if immediate {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn run_monitor(
    coordinator: Weak<Inner>,
    owner: OwnerId,
    mut items: watch::Receiver<Vec<TrackedItem>>,
    mut period: Duration,
) {
    // Wait for the subscription's first delivery.
    if items.changed().await.is_err() {
        return;
    }

    let mut ticks = ticker(period, true);
    loop {
        ticks.tick().await;
        let Some(inner) = coordinator.upgrade() else {
            break;
        };

        let snapshot = items.borrow_and_update().clone();
        match inner.cycle(&owner, snapshot).await {
            Ok(report) => tracing::trace!(
                skipped = report.skipped,
                linked = report.linked_items,
                updated = report.updated.len(),
                alerts = report.alerts,
                "monitoring cycle finished"
            ),
            Err(err) => tracing::warn!(%err, owner_id = %owner, "monitoring cycle failed"),
        }

        let wanted = inner.config().scan_interval();
        if wanted != period {
            tracing::info!(interval_ms = wanted.as_millis(), "monitoring interval changed");
            period = wanted;
            ticks = ticker(period, false);
        }
    }
}
