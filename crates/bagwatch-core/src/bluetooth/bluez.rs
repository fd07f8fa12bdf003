//! BlueZ radio backend (Linux, via `bluer`).

use std::sync::Mutex;

use async_trait::async_trait;
use bluer::{Adapter, AdapterEvent, AdapterProperty, Address, DiscoveryFilter, DiscoveryTransport};
use futures::{pin_mut, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{
    Advertisement, BluetoothError, BluetoothResult, Radio, RadioEvent, RadioState, ScanFilter,
};

const CHANNEL_CAPACITY: usize = 128;

/// Radio backed by the default BlueZ adapter.
///
/// Discovery runs while the spawned forwarding task holds the
/// `discover_devices` stream; aborting the task ends discovery.
pub struct BluezRadio {
    adapter: Adapter,
    discovery: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BluezRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluezRadio")
            .field("adapter", &self.adapter.name())
            .finish_non_exhaustive()
    }
}

impl BluezRadio {
    /// Open a BlueZ session on the default adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if bluetoothd is unreachable or no adapter exists.
    pub async fn new() -> BluetoothResult<Self> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| BluetoothError::SessionInitFailed {
                message: e.to_string(),
            })?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|_| BluetoothError::AdapterNotFound)?;

        tracing::info!(adapter = adapter.name(), "using Bluetooth adapter");

        Ok(Self {
            adapter,
            discovery: Mutex::new(None),
        })
    }

    fn abort_discovery(&self) -> bool {
        let task = self
            .discovery
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match task {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Radio for BluezRadio {
    async fn state(&self) -> RadioState {
        match self.adapter.is_powered().await {
            Ok(true) => RadioState::PoweredOn,
            Ok(false) => RadioState::PoweredOff,
            Err(err) if matches!(err.kind, bluer::ErrorKind::NotAuthorized) => {
                RadioState::Unauthorized
            }
            Err(err) => {
                tracing::debug!(%err, "could not read adapter power state");
                RadioState::Unknown
            }
        }
    }

    async fn start_scan(
        &self,
        filter: &ScanFilter,
    ) -> BluetoothResult<mpsc::Receiver<RadioEvent>> {
        let discovery_filter = DiscoveryFilter {
            uuids: filter.services.iter().copied().collect(),
            transport: DiscoveryTransport::Le,
            ..DiscoveryFilter::default()
        };
        self.adapter
            .set_discovery_filter(discovery_filter)
            .await
            .map_err(|e| BluetoothError::DiscoveryFailed {
                message: e.to_string(),
            })?;

        let events = self
            .adapter
            .discover_devices()
            .await
            .map_err(|e| BluetoothError::DiscoveryFailed {
                message: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let adapter = self.adapter.clone();

        let task = tokio::spawn(async move {
            pin_mut!(events);
            while let Some(event) = events.next().await {
                match event {
                    AdapterEvent::DeviceAdded(address) => {
                        let Some(ad) = read_advertisement(&adapter, address).await else {
                            continue;
                        };
                        if tx.send(RadioEvent::Advertisement(ad)).await.is_err() {
                            break;
                        }
                    }
                    AdapterEvent::PropertyChanged(AdapterProperty::Powered(false)) => {
                        let _ = tx
                            .send(RadioEvent::Error("adapter was powered off".into()))
                            .await;
                        break;
                    }
                    _ => {}
                }
            }
            tracing::debug!("BlueZ discovery stream ended");
        });

        let previous = self
            .discovery
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
            tracing::warn!("replaced a discovery task that was never stopped");
        }

        Ok(rx)
    }

    async fn stop_scan(&self) -> BluetoothResult<()> {
        if self.abort_discovery() {
            tracing::debug!("BlueZ discovery stopped");
        }
        Ok(())
    }
}

async fn read_advertisement(adapter: &Adapter, address: Address) -> Option<Advertisement> {
    let device = match adapter.device(address) {
        Ok(device) => device,
        Err(err) => {
            tracing::trace!(%address, %err, "device vanished before it could be read");
            return None;
        }
    };
    let name = device.name().await.ok().flatten();
    let rssi = device.rssi().await.ok().flatten();
    tracing::trace!(%address, ?name, ?rssi, "BLE device detected");
    Some(Advertisement {
        id: address.to_string(),
        name,
        rssi,
        is_connectable: None,
    })
}
