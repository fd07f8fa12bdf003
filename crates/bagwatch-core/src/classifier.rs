//! RSSI to proximity classification.

use crate::config::ProximityConfig;
use crate::types::ProximityStatus;

/// Classify one reading.
///
/// Readings between the thresholds keep `previous`, so an item only flips
/// once the signal clearly crosses to the other side. An item that has never
/// been classified stays `unknown` in that band.
#[must_use]
pub const fn classify(
    rssi: i16,
    previous: ProximityStatus,
    config: &ProximityConfig,
) -> ProximityStatus {
    if rssi >= config.near_threshold {
        ProximityStatus::Nearby
    } else if rssi <= config.far_threshold {
        ProximityStatus::Far
    } else {
        previous
    }
}
