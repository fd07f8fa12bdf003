//! # bagwatch-core
//!
//! Core logic for the bagwatch luggage proximity tracker.
//!
//! This crate provides:
//! - Registration of scanned luggage codes and pairing with BLE beacons
//! - Bounded, exclusive BLE discovery windows
//! - RSSI classification with hysteresis and alerts on transitions
//! - Configuration and persistent storage for tracked items
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`registry`] - Owner-scoped tracked items, linking and change subscriptions
//! - [`bluetooth`] - Radio seam, exclusive scanner and scan sessions
//! - [`classifier`] - RSSI to `nearby` / `far` / `unknown`
//! - [`coordinator`] - The monitoring loop tying the pieces together
//! - [`alerts`] - Notifications and haptics on status transitions
//! - [`auth`] - Current-owner lookup and anonymous sessions
//! - [`config`] - Configuration loading, saving, and validation
//! - [`storage`] - Item stores (in-memory and JSON files)
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod alerts;
pub mod auth;
pub mod bluetooth;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod registry;
pub mod storage;
pub mod types;

// Re-export primary types for convenience
pub use alerts::{AlertEmitter, HapticKind, Haptics, LogHaptics, LogNotifier, Notifier};
pub use auth::{validate_owner_id, AuthProvider, SessionAuth};
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluezRadio;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub use bluetooth::MockRadio;
pub use bluetooth::{
    BleScanner, BluetoothError, BluetoothResult, Radio, RadioEvent, RadioState, ScanFilter,
    ScanReport, ScanSession, UnsupportedRadio,
};
pub use classifier::classify;
pub use config::{
    Config, ConfigError, ConfigResult, ProximityConfig, ProximityConfigPatch, StorageBackend,
};
pub use coordinator::{CycleReport, MonitoringStatus, TrackingCoordinator, TrackingState};
pub use error::{BagwatchError, Error, Result};
pub use registry::{DeviceRegistry, SubscriptionHandle};
pub use storage::{ItemPatch, ItemStore, JsonFileStore, MemoryStore, StorageError};
pub use types::{DiscoveredDevice, HealthResponse, ItemId, OwnerId, ProximityStatus, TrackedItem};
