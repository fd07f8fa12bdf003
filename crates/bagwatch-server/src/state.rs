//! Application state shared across handlers.

use std::path::PathBuf;
use std::sync::Arc;

use bagwatch_core::{
    AlertEmitter, BleScanner, Config, DeviceRegistry, ItemStore, JsonFileStore, LogHaptics,
    MemoryStore, Radio, SessionAuth, StorageBackend, TrackingCoordinator,
};
use tokio::sync::RwLock;

/// State handle passed to every handler.
pub type SharedState = Arc<AppState>;

/// Shared application state.
pub struct AppState {
    config: RwLock<Config>,
    config_path: Option<PathBuf>,
    auth: Arc<SessionAuth>,
    coordinator: TrackingCoordinator,
}

impl AppState {
    /// Build the full state from configuration: item store, radio backend,
    /// registry and coordinator.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be resolved.
    pub async fn new(config: Config, config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let store: Arc<dyn ItemStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            StorageBackend::Json => {
                let data_dir = config.storage.resolved_data_dir()?;
                tracing::info!(data_dir = %data_dir.display(), "using JSON item store");
                Arc::new(JsonFileStore::new(data_dir))
            }
        };
        let radio = open_radio().await;

        Ok(Self::from_parts(config, store, radio, AlertEmitter::logging())
            .with_config_path(config_path))
    }

    /// Assemble state from already-built parts.
    pub fn from_parts(
        config: Config,
        store: Arc<dyn ItemStore>,
        radio: Arc<dyn Radio>,
        alerts: AlertEmitter,
    ) -> Self {
        let auth = Arc::new(SessionAuth::new());
        let registry = DeviceRegistry::new(store, auth.clone()).with_haptics(Arc::new(LogHaptics));
        let coordinator =
            TrackingCoordinator::new(registry, BleScanner::new(radio), alerts, config.proximity);

        Self {
            config: RwLock::new(config),
            config_path: None,
            auth,
            coordinator,
        }
    }

    /// Save proximity changes to `path`.
    #[must_use]
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// The local session.
    pub fn auth(&self) -> &SessionAuth {
        &self.auth
    }

    /// The tracking coordinator.
    pub const fn coordinator(&self) -> &TrackingCoordinator {
        &self.coordinator
    }

    /// The device registry.
    pub fn registry(&self) -> &DeviceRegistry {
        self.coordinator.registry()
    }

    /// Get write access to config.
    pub async fn config_mut(&self) -> tokio::sync::RwLockWriteGuard<'_, Config> {
        self.config.write().await
    }

    /// Where the configuration is saved, if it came from a file.
    pub fn config_path(&self) -> Option<&std::path::Path> {
        self.config_path.as_deref()
    }
}

/// Pick the radio backend compiled in.
#[allow(clippy::unused_async)]
async fn open_radio() -> Arc<dyn Radio> {
    #[cfg(feature = "mock-bluetooth")]
    {
        tracing::warn!("using mock Bluetooth radio");
        Arc::new(bagwatch_core::MockRadio::new())
    }

    #[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
    {
        match bagwatch_core::BluezRadio::new().await {
            Ok(radio) => Arc::new(radio),
            Err(err) => {
                tracing::warn!(%err, "Bluetooth unavailable, proximity monitoring disabled");
                Arc::new(bagwatch_core::UnsupportedRadio)
            }
        }
    }

    #[cfg(not(any(feature = "bluetooth", feature = "mock-bluetooth")))]
    {
        tracing::warn!("built without Bluetooth support");
        Arc::new(bagwatch_core::UnsupportedRadio)
    }
}
