//! Unified error types for the bagwatch core library.
//!
//! [`BagwatchError`] covers every failure mode the registry, scanner and
//! coordinator can surface. Modules with their own failure vocabulary
//! (`ConfigError`, `StorageError`, `BluetoothError`) convert into it.
//!
//! # Example
//!
//! ```rust
//! use bagwatch_core::error::{BagwatchError, Result};
//!
//! fn require_owner(owner: Option<&str>) -> Result<&str> {
//!     owner.ok_or(BagwatchError::AuthRequired)
//! }
//! assert!(require_owner(None).is_err());
//! ```

use thiserror::Error;

use crate::bluetooth::RadioState;

/// The unified error type for all bagwatch operations.
#[derive(Debug, Error)]
pub enum BagwatchError {
    // =========================================================================
    // REGISTRY ERRORS
    // =========================================================================
    /// No authenticated owner is available.
    #[error("Authentication required. Sign in before managing luggage.")]
    AuthRequired,

    /// No item with this id belongs to the current owner.
    #[error("Tracked item not found: '{0}'")]
    NotFound(String),

    /// The item already has a different beacon linked.
    #[error("Item '{item_id}' is already linked to device '{device_id}'. Unlink it first.")]
    AlreadyLinked {
        /// Item that was targeted.
        item_id: String,
        /// Device currently linked to the item.
        device_id: String,
    },

    /// Caller-provided input is malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// The radio is not powered on, so no scan was started.
    #[error("Bluetooth radio is unavailable (state: {0}). Turn Bluetooth on and grant access.")]
    RadioUnavailable(RadioState),

    /// Another scan currently holds the radio.
    #[error("A Bluetooth scan is already in progress")]
    ScanInProgress,

    /// The radio reported an error while scanning.
    #[error("Bluetooth scan failed: {0}")]
    ScanError(String),

    // =========================================================================
    // ALERT ERRORS
    // =========================================================================
    /// Notifications or haptics were refused by the platform.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// A proximity configuration was rejected.
    #[error("Invalid proximity configuration: {0}")]
    InvalidConfig(String),

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading items.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for bagwatch operations.
pub type Result<T> = std::result::Result<T, BagwatchError>;

/// Short alias used across the crate.
pub type Error = BagwatchError;

impl BagwatchError {
    /// Returns `true` if this error comes from the radio or scanner.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::RadioUnavailable(_) | Self::ScanInProgress | Self::ScanError(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::ConfigParseError(_))
    }

    /// Returns `true` if this error should be shown to the user after a
    /// registry call.
    #[inline]
    #[must_use]
    pub const fn is_registry_error(&self) -> bool {
        matches!(
            self,
            Self::AuthRequired
                | Self::NotFound(_)
                | Self::AlreadyLinked { .. }
                | Self::InvalidInput(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if the next monitoring tick is expected to clear it.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::ScanInProgress | Self::ScanError(_))
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) | Self::InvalidConfig(_) => 400,
            Self::AuthRequired => 401,
            Self::PermissionDenied(_) => 403,
            Self::NotFound(_) => 404,
            Self::AlreadyLinked { .. } | Self::ScanInProgress => 409,
            Self::ConfigParseError(_) => 422,
            Self::PersistenceError(_) | Self::IoError(_) => 500,
            Self::RadioUnavailable(_) | Self::ScanError(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyLinked { .. } => "ALREADY_LINKED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::RadioUnavailable(_) => "RADIO_UNAVAILABLE",
            Self::ScanInProgress => "SCAN_IN_PROGRESS",
            Self::ScanError(_) => "SCAN_ERROR",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BagwatchError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::Load(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {path}: {source}"))
            }
            ConfigError::NoConfigDir => {
                Self::PersistenceError("Cannot determine configuration directory".into())
            }
            ConfigError::ValidationError { field, message } => {
                Self::InvalidConfig(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::InvalidConfig(messages.join("; "))
            }
        }
    }
}

impl From<crate::storage::StorageError> for BagwatchError {
    fn from(err: crate::storage::StorageError) -> Self {
        use crate::storage::StorageError;
        match err {
            StorageError::NotFound { item_id } => Self::NotFound(item_id),
            StorageError::AlreadyLinked { item_id, device_id } => {
                Self::AlreadyLinked { item_id, device_id }
            }
            other => Self::PersistenceError(other.to_string()),
        }
    }
}

impl From<crate::bluetooth::BluetoothError> for BagwatchError {
    fn from(err: crate::bluetooth::BluetoothError) -> Self {
        use crate::bluetooth::BluetoothError;
        match err {
            BluetoothError::AdapterNotFound => Self::RadioUnavailable(RadioState::Unsupported),
            BluetoothError::NotPoweredOn(state) => Self::RadioUnavailable(state),
            BluetoothError::SessionInitFailed { message }
            | BluetoothError::DiscoveryFailed { message }
            | BluetoothError::Internal { message } => Self::ScanError(message),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_bluetooth_error_classification() {
        assert!(BagwatchError::RadioUnavailable(RadioState::PoweredOff).is_bluetooth_error());
        assert!(BagwatchError::ScanInProgress.is_bluetooth_error());
        assert!(BagwatchError::ScanError("fault".into()).is_bluetooth_error());
        assert!(!BagwatchError::AuthRequired.is_bluetooth_error());
    }

    #[test]
    fn test_registry_error_classification() {
        assert!(BagwatchError::AuthRequired.is_registry_error());
        assert!(BagwatchError::NotFound("x".into()).is_registry_error());
        assert!(BagwatchError::AlreadyLinked {
            item_id: "a".into(),
            device_id: "b".into()
        }
        .is_registry_error());
        assert!(!BagwatchError::ScanInProgress.is_registry_error());
    }

    #[test]
    fn test_io_error_classification() {
        assert!(BagwatchError::PersistenceError("disk full".into()).is_io_error());
        assert!(BagwatchError::IoError(IoErr::new(ErrorKind::NotFound, "test")).is_io_error());
        assert!(!BagwatchError::InvalidConfig("x".into()).is_io_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(BagwatchError::ScanInProgress.is_recoverable());
        assert!(BagwatchError::ScanError("radio reset".into()).is_recoverable());
        assert!(!BagwatchError::RadioUnavailable(RadioState::Unauthorized).is_recoverable());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(BagwatchError::InvalidConfig("x".into()).http_status_code(), 400);
        assert_eq!(BagwatchError::AuthRequired.http_status_code(), 401);
        assert_eq!(BagwatchError::NotFound("x".into()).http_status_code(), 404);
        assert_eq!(BagwatchError::ScanInProgress.http_status_code(), 409);
        assert_eq!(
            BagwatchError::PersistenceError("x".into()).http_status_code(),
            500
        );
        assert_eq!(
            BagwatchError::RadioUnavailable(RadioState::PoweredOff).http_status_code(),
            503
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(BagwatchError::AuthRequired.error_code(), "AUTH_REQUIRED");
        assert_eq!(BagwatchError::ScanInProgress.error_code(), "SCAN_IN_PROGRESS");
        assert_eq!(
            BagwatchError::InvalidConfig("x".into()).error_code(),
            "INVALID_CONFIG"
        );
    }

    #[test]
    fn test_bluetooth_error_conversion() {
        use crate::bluetooth::BluetoothError;

        let err: BagwatchError = BluetoothError::NotPoweredOn(RadioState::PoweredOff).into();
        assert!(matches!(
            err,
            BagwatchError::RadioUnavailable(RadioState::PoweredOff)
        ));

        let err: BagwatchError = BluetoothError::DiscoveryFailed {
            message: "authorization revoked".into(),
        }
        .into();
        assert!(matches!(err, BagwatchError::ScanError(ref m) if m.contains("revoked")));
    }

    #[test]
    fn test_error_display_messages() {
        let err = BagwatchError::RadioUnavailable(RadioState::PoweredOff);
        assert!(err.to_string().contains("powered_off"));

        let err = BagwatchError::AlreadyLinked {
            item_id: "bag".into(),
            device_id: "AA:BB:CC".into(),
        };
        assert!(err.to_string().contains("AA:BB:CC"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<BagwatchError>();
        assert_sync::<BagwatchError>();
    }
}
