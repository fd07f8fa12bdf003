//! Shared domain types and OpenAPI schemas.
//!
//! Tracked items, identifiers and proximity status live here because they
//! cross every module boundary: the registry persists them, the coordinator
//! mutates them and the HTTP layer serializes them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Identifier of a tracked item, assigned at registration.
///
/// UUID v7, so identifiers sort by creation time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
#[schema(value_type = String, format = Uuid, example = "0192f3c4-5b6a-7c8d-9e0f-a1b2c3d4e5f6")]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generate a fresh, time-ordered item id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ItemId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for ItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of the authenticated owner of tracked items.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "4f1c2a9e8d7b4c3a9f0e1d2c3b4a5968")]
pub struct OwnerId(String);

impl OwnerId {
    /// Wrap an owner id without validation.
    ///
    /// Use [`crate::auth::validate_owner_id`] for untrusted input.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proximity classification of a tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProximityStatus {
    /// Signal at or above the near threshold.
    Nearby,
    /// Signal at or below the far threshold.
    Far,
    /// No classification has been established yet.
    #[default]
    Unknown,
}

impl ProximityStatus {
    /// Whether this is a real classification (`nearby` or `far`).
    #[must_use]
    pub const fn is_established(self) -> bool {
        matches!(self, Self::Nearby | Self::Far)
    }
}

impl fmt::Display for ProximityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearby => write!(f, "nearby"),
            Self::Far => write!(f, "far"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A piece of luggage registered from a scanned code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "0192f3c4-5b6a-7c8d-9e0f-a1b2c3d4e5f6",
    "external_code": "bag:1001",
    "linked_device_id": "AA:BB:CC:DD:EE:FF",
    "proximity_status": "nearby",
    "last_signal_strength": -42,
    "last_observed_at": "2025-01-15T03:30:00Z",
    "owner_id": "4f1c2a9e8d7b4c3a9f0e1d2c3b4a5968",
    "created_at": "2025-01-15T03:00:00Z"
}))]
pub struct TrackedItem {
    /// Identifier assigned at registration.
    pub id: ItemId,

    /// Value captured from the scanned QR code.
    #[schema(example = "bag:1001")]
    pub external_code: String,

    /// Paired proximity beacon, absent until linked.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub linked_device_id: Option<String>,

    /// Current proximity classification.
    pub proximity_status: ProximityStatus,

    /// Last observed RSSI in dBm.
    #[schema(example = -42)]
    pub last_signal_strength: Option<i16>,

    /// When the last reading was taken (UTC).
    pub last_observed_at: Option<DateTime<Utc>>,

    /// Owner of this item.
    pub owner_id: OwnerId,

    /// Registration time (UTC), immutable.
    pub created_at: DateTime<Utc>,
}

impl TrackedItem {
    /// Build a freshly registered item: `unknown`, no device link.
    #[must_use]
    pub fn new(owner_id: OwnerId, external_code: String) -> Self {
        Self {
            id: ItemId::new(),
            external_code,
            linked_device_id: None,
            proximity_status: ProximityStatus::Unknown,
            last_signal_strength: None,
            last_observed_at: None,
            owner_id,
            created_at: Utc::now(),
        }
    }

    /// Whether this item takes part in proximity scanning.
    #[must_use]
    pub const fn is_trackable(&self) -> bool {
        self.linked_device_id.is_some()
    }

    /// Whether the given peripheral id is this item's beacon.
    ///
    /// MAC addresses are compared case-insensitively.
    #[must_use]
    pub fn is_linked_to(&self, device_id: &str) -> bool {
        self.linked_device_id
            .as_deref()
            .is_some_and(|linked| linked.eq_ignore_ascii_case(device_id))
    }
}

/// A peripheral observed during a single scan window. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "AA:BB:CC:DD:EE:FF",
    "name": "Tile Mate",
    "signal_strength": -45,
    "is_connectable": true,
    "discovered_at": "2025-01-15T03:30:00Z"
}))]
pub struct DiscoveredDevice {
    /// Peripheral identifier (MAC address or platform UUID).
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub id: String,

    /// Advertised local name.
    #[schema(example = "Tile Mate")]
    pub name: Option<String>,

    /// RSSI in dBm.
    #[schema(example = -45)]
    pub signal_strength: Option<i16>,

    /// Whether the peripheral accepts connections.
    pub is_connectable: Option<bool>,

    /// When this reading was observed.
    pub discovered_at: DateTime<Utc>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version.
    #[schema(example = "0.1.0")]
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_is_unknown_and_unlinked() {
        let item = TrackedItem::new(OwnerId::new("owner"), "bag:1001".into());
        assert_eq!(item.proximity_status, ProximityStatus::Unknown);
        assert!(item.linked_device_id.is_none());
        assert!(!item.is_trackable());
    }

    #[test]
    fn test_is_linked_to_ignores_case() {
        let mut item = TrackedItem::new(OwnerId::new("owner"), "bag:1001".into());
        item.linked_device_id = Some("AA:BB:CC".into());
        assert!(item.is_linked_to("aa:bb:cc"));
        assert!(!item.is_linked_to("AA:BB:CD"));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ProximityStatus::Nearby).unwrap();
        assert_eq!(json, "\"nearby\"");
        assert!(ProximityStatus::Far.is_established());
        assert!(!ProximityStatus::Unknown.is_established());
    }

    #[test]
    fn test_item_id_round_trips_through_display() {
        let id = ItemId::new();
        let parsed: ItemId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
