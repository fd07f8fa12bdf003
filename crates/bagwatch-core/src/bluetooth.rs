//! Bluetooth Low Energy scanning.
//!
//! This module provides:
//! - [`Radio`], the platform seam (adapter state, start/stop discovery)
//! - [`BleScanner`], which runs one bounded discovery window at a time
//! - [`ScanSession`] / [`ScanReport`], the events and results of a window
//!
//! The radio is an exclusive resource: at most one scan runs at a time and a
//! window that nobody stops is torn down by a watchdog when it expires.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::DiscoveredDevice;

#[cfg(feature = "bluetooth")]
mod bluez;
#[cfg(any(test, feature = "mock-bluetooth"))]
mod mock;

#[cfg(feature = "bluetooth")]
pub use bluez::BluezRadio;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub use mock::MockRadio;

/// Power/authorization state of the platform radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RadioState {
    /// Ready to scan.
    PoweredOn,
    /// Present but switched off.
    PoweredOff,
    /// The process may not use Bluetooth.
    Unauthorized,
    /// No usable adapter.
    Unsupported,
    /// State could not be determined.
    Unknown,
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PoweredOn => "powered_on",
            Self::PoweredOff => "powered_off",
            Self::Unauthorized => "unauthorized",
            Self::Unsupported => "unsupported",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Errors raised by radio backends.
#[derive(Debug, Error)]
pub enum BluetoothError {
    /// No Bluetooth adapter was found on this system.
    #[error("no Bluetooth adapter found")]
    AdapterNotFound,

    /// The adapter is not in a state that allows scanning.
    #[error("Bluetooth adapter is not powered on (state: {0})")]
    NotPoweredOn(RadioState),

    /// The platform Bluetooth session could not be opened.
    #[error("failed to open Bluetooth session: {message}")]
    SessionInitFailed {
        /// Platform error text.
        message: String,
    },

    /// Device discovery could not be started or failed mid-way.
    #[error("discovery failed: {message}")]
    DiscoveryFailed {
        /// Platform error text.
        message: String,
    },

    /// Anything else the backend reports.
    #[error("internal Bluetooth error: {message}")]
    Internal {
        /// Platform error text.
        message: String,
    },
}

/// Result alias for radio backends.
pub type BluetoothResult<T> = std::result::Result<T, BluetoothError>;

/// Restricts discovery to peripherals advertising these services.
/// Empty means every peripheral.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    /// Advertised service UUIDs to match.
    pub services: Vec<Uuid>,
}

/// One advertisement as reported by the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Peripheral identifier.
    pub id: String,
    /// Advertised local name.
    pub name: Option<String>,
    /// RSSI in dBm.
    pub rssi: Option<i16>,
    /// Whether the peripheral is connectable.
    pub is_connectable: Option<bool>,
}

/// Events delivered by a running radio scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// A peripheral was seen.
    Advertisement(Advertisement),
    /// The radio failed; no further events follow.
    Error(String),
}

/// The platform Bluetooth API.
///
/// `start_scan` hands back a channel; the scan ends when the backend drops
/// the sender or `stop_scan` is called.
#[async_trait]
pub trait Radio: Send + Sync {
    /// Current adapter state.
    async fn state(&self) -> RadioState;

    /// Begin discovery.
    async fn start_scan(
        &self,
        filter: &ScanFilter,
    ) -> BluetoothResult<mpsc::Receiver<RadioEvent>>;

    /// End discovery. Stopping an idle radio is not an error.
    async fn stop_scan(&self) -> BluetoothResult<()>;
}

/// Radio for hosts without Bluetooth support.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedRadio;

#[async_trait]
impl Radio for UnsupportedRadio {
    async fn state(&self) -> RadioState {
        RadioState::Unsupported
    }

    async fn start_scan(
        &self,
        _filter: &ScanFilter,
    ) -> BluetoothResult<mpsc::Receiver<RadioEvent>> {
        Err(BluetoothError::AdapterNotFound)
    }

    async fn stop_scan(&self) -> BluetoothResult<()> {
        Ok(())
    }
}

// =============================================================================
// EXCLUSIVE SCAN LOCK
// =============================================================================

/// Tracks which scan (by generation) currently owns the radio.
#[derive(Debug, Default)]
struct ScanLock {
    state: Mutex<LockState>,
}

#[derive(Debug, Default)]
struct LockState {
    next_generation: u64,
    active: Option<u64>,
}

impl ScanLock {
    fn try_acquire(&self) -> Option<u64> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.active.is_some() {
            return None;
        }
        state.next_generation += 1;
        let generation = state.next_generation;
        state.active = Some(generation);
        Some(generation)
    }

    fn current(&self) -> Option<u64> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).active
    }

    /// Release only if `generation` still holds the lock.
    fn release(&self, generation: u64) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.active == Some(generation) {
            state.active = None;
            true
        } else {
            false
        }
    }
}

// =============================================================================
// SCANNER
// =============================================================================

/// Runs bounded discovery windows on a shared [`Radio`].
#[derive(Clone)]
pub struct BleScanner {
    radio: Arc<dyn Radio>,
    lock: Arc<ScanLock>,
    filter: ScanFilter,
}

impl fmt::Debug for BleScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BleScanner")
            .field("active_scan", &self.lock.current())
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl BleScanner {
    /// Create a scanner that discovers every peripheral.
    #[must_use]
    pub fn new(radio: Arc<dyn Radio>) -> Self {
        Self::with_filter(radio, ScanFilter::default())
    }

    /// Create a scanner restricted by `filter`.
    #[must_use]
    pub fn with_filter(radio: Arc<dyn Radio>, filter: ScanFilter) -> Self {
        Self {
            radio,
            lock: Arc::new(ScanLock::default()),
            filter,
        }
    }

    /// Whether a scan currently holds the radio.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.lock.current().is_some()
    }

    /// Current radio state.
    pub async fn radio_state(&self) -> RadioState {
        self.radio.state().await
    }

    /// Start a discovery window of `duration`.
    ///
    /// # Errors
    ///
    /// - [`Error::ScanInProgress`] if another window is running
    /// - [`Error::RadioUnavailable`] if the radio is not powered on
    /// - [`Error::ScanError`] if the backend refuses to start
    pub async fn scan(&self, duration: Duration) -> Result<ScanSession> {
        let generation = self.lock.try_acquire().ok_or(Error::ScanInProgress)?;

        let state = self.radio.state().await;
        if state != RadioState::PoweredOn {
            self.lock.release(generation);
            return Err(Error::RadioUnavailable(state));
        }

        let events = match self.radio.start_scan(&self.filter).await {
            Ok(events) => events,
            Err(err) => {
                self.lock.release(generation);
                return Err(err.into());
            }
        };

        tracing::debug!(generation, window_ms = duration.as_millis(), "scan started");

        let watchdog = tokio::spawn(expire_scan(
            Arc::clone(&self.radio),
            Arc::clone(&self.lock),
            generation,
            duration,
        ));

        Ok(ScanSession {
            radio: Arc::clone(&self.radio),
            lock: Arc::clone(&self.lock),
            generation,
            events,
            deadline: Instant::now() + duration,
            watchdog: Some(watchdog),
            finished: false,
        })
    }

    /// Stop whatever scan holds the radio. Safe to call when idle.
    pub async fn stop_active(&self) {
        let Some(generation) = self.lock.current() else {
            return;
        };
        if let Err(err) = self.radio.stop_scan().await {
            tracing::warn!(%err, generation, "failed to stop active scan");
        }
        if self.lock.release(generation) {
            tracing::debug!(generation, "active scan stopped");
        }
    }
}

/// Tear down a window that outlived its deadline without being stopped.
async fn expire_scan(
    radio: Arc<dyn Radio>,
    lock: Arc<ScanLock>,
    generation: u64,
    after: Duration,
) {
    tokio::time::sleep(after).await;
    if lock.current() != Some(generation) {
        return;
    }
    if let Err(err) = radio.stop_scan().await {
        tracing::warn!(%err, generation, "failed to stop expired scan");
    }
    if lock.release(generation) {
        tracing::debug!(generation, "scan window expired, radio released");
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// A single, non-restartable discovery window.
///
/// Yields each observation as it arrives; ends at the deadline, when the
/// radio closes the stream, or after the first radio error.
pub struct ScanSession {
    radio: Arc<dyn Radio>,
    lock: Arc<ScanLock>,
    generation: u64,
    events: mpsc::Receiver<RadioEvent>,
    deadline: Instant,
    watchdog: Option<JoinHandle<()>>,
    finished: bool,
}

impl fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanSession")
            .field("generation", &self.generation)
            .field("deadline", &self.deadline)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl ScanSession {
    /// The next observation, `Some(Err(ScanError))` once if the radio fails,
    /// then `None`.
    pub async fn next_device(&mut self) -> Option<Result<DiscoveredDevice>> {
        if self.finished {
            return None;
        }
        match tokio::time::timeout_at(self.deadline, self.events.recv()).await {
            Ok(Some(RadioEvent::Advertisement(ad))) => Some(Ok(DiscoveredDevice {
                id: ad.id,
                name: ad.name,
                signal_strength: ad.rssi,
                is_connectable: ad.is_connectable,
                discovered_at: Utc::now(),
            })),
            Ok(Some(RadioEvent::Error(message))) => {
                tracing::warn!(generation = self.generation, %message, "radio error during scan");
                self.finish().await;
                Some(Err(Error::ScanError(message)))
            }
            Ok(None) | Err(_) => {
                self.finish().await;
                None
            }
        }
    }

    /// Drain the whole window into a [`ScanReport`].
    pub async fn collect(mut self) -> ScanReport {
        let started_at = Utc::now();
        let mut devices: Vec<DiscoveredDevice> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut error = None;

        while let Some(next) = self.next_device().await {
            match next {
                Ok(device) => match index.get(&device.id.to_ascii_uppercase()) {
                    Some(&slot) => merge_reading(&mut devices[slot], device),
                    None => {
                        index.insert(device.id.to_ascii_uppercase(), devices.len());
                        devices.push(device);
                    }
                },
                Err(err) => error = Some(err),
            }
        }

        ScanReport {
            devices,
            error,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// End the window early.
    pub async fn stop(mut self) {
        self.finish().await;
    }

    async fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        if self.lock.current() == Some(self.generation) {
            if let Err(err) = self.radio.stop_scan().await {
                tracing::warn!(%err, generation = self.generation, "failed to stop scan");
            }
            self.lock.release(self.generation);
        }
        self.events.close();
        tracing::debug!(generation = self.generation, "scan finished");
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        if !self.lock.release(self.generation) {
            return;
        }
        tracing::debug!(generation = self.generation, "scan session dropped mid-window");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let radio = Arc::clone(&self.radio);
            let lock = Arc::clone(&self.lock);
            handle.spawn(async move {
                // A newer scan may already own the radio.
                if lock.current().is_none() {
                    if let Err(err) = radio.stop_scan().await {
                        tracing::warn!(%err, "failed to stop abandoned scan");
                    }
                }
            });
        }
    }
}

/// Latest reading wins; fields the newer advertisement omits are kept.
fn merge_reading(existing: &mut DiscoveredDevice, newer: DiscoveredDevice) {
    existing.signal_strength = newer.signal_strength.or(existing.signal_strength);
    if newer.name.is_some() {
        existing.name = newer.name;
    }
    if newer.is_connectable.is_some() {
        existing.is_connectable = newer.is_connectable;
    }
    existing.discovered_at = newer.discovered_at;
}

/// Everything observed during one window.
#[derive(Debug)]
pub struct ScanReport {
    /// Distinct peripherals in first-seen order.
    pub devices: Vec<DiscoveredDevice>,
    /// Radio failure that ended the window early, if any.
    pub error: Option<Error>,
    /// When collection began.
    pub started_at: DateTime<Utc>,
    /// When the window closed.
    pub finished_at: DateTime<Utc>,
}

impl ScanReport {
    /// Look up a peripheral by id (MAC addresses compare case-insensitively).
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&DiscoveredDevice> {
        self.devices.iter().find(|d| d.id.eq_ignore_ascii_case(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner(radio: &Arc<MockRadio>) -> BleScanner {
        BleScanner::new(Arc::clone(radio) as Arc<dyn Radio>)
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_collects_and_dedupes_latest_wins() {
        let radio = Arc::new(MockRadio::new());
        radio.push_scan(vec![
            MockRadio::advert("AA:BB:CC", -70),
            MockRadio::advert("11:22:33", -60),
            MockRadio::advert("aa:bb:cc", -40),
        ]);
        let scanner = scanner(&radio);

        let report = scanner
            .scan(Duration::from_secs(2))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(report.devices.len(), 2);
        assert_eq!(report.find("AA:BB:CC").unwrap().signal_strength, Some(-40));
        assert!(report.error.is_none());
        assert!(!scanner.is_scanning());
        assert_eq!(radio.scans_stopped(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_scan_is_rejected_while_first_runs() {
        let radio = Arc::new(MockRadio::new());
        let scanner = scanner(&radio);

        let first = scanner.scan(Duration::from_secs(5)).await.unwrap();
        let second = scanner.scan(Duration::from_secs(5)).await;
        assert!(matches!(second, Err(Error::ScanInProgress)));

        first.stop().await;
        assert!(scanner.scan(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_powered_off_radio_does_not_start() {
        let radio = Arc::new(MockRadio::with_state(RadioState::PoweredOff));
        let scanner = scanner(&radio);

        let err = scanner.scan(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::RadioUnavailable(RadioState::PoweredOff)));
        assert_eq!(radio.scans_started(), 0);
        assert!(!scanner.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_radio_error_keeps_partial_results() {
        let radio = Arc::new(MockRadio::new());
        radio.push_scan(vec![
            MockRadio::advert("AA:BB:CC", -55),
            RadioEvent::Error("authorization revoked".into()),
            MockRadio::advert("11:22:33", -60),
        ]);
        let scanner = scanner(&radio);

        let report = scanner
            .scan(Duration::from_secs(2))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(report.devices.len(), 1);
        assert!(matches!(report.error, Some(Error::ScanError(ref m)) if m.contains("revoked")));
        assert!(!scanner.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unstopped_scan_is_released_by_watchdog() {
        let radio = Arc::new(MockRadio::new());
        let scanner = scanner(&radio);

        let session = scanner.scan(Duration::from_millis(500)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert!(!scanner.is_scanning());
        assert_eq!(radio.scans_stopped(), 1);
        drop(session);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_session_releases_radio() {
        let radio = Arc::new(MockRadio::new());
        let scanner = scanner(&radio);

        let session = scanner.scan(Duration::from_secs(30)).await.unwrap();
        drop(session);

        assert!(!scanner.is_scanning());
        assert!(scanner.scan(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_active_is_idempotent() {
        let radio = Arc::new(MockRadio::new());
        let scanner = scanner(&radio);

        let mut session = scanner.scan(Duration::from_secs(30)).await.unwrap();
        scanner.stop_active().await;
        scanner.stop_active().await;

        assert!(!scanner.is_scanning());
        assert!(session.next_device().await.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_radio_reports_state() {
        let scanner = BleScanner::new(Arc::new(UnsupportedRadio));
        assert_eq!(scanner.radio_state().await, RadioState::Unsupported);
        assert!(matches!(
            scanner.scan(Duration::from_secs(1)).await,
            Err(Error::RadioUnavailable(RadioState::Unsupported))
        ));
    }
}
