//! Scriptable radio for tests and for running without hardware.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    Advertisement, BluetoothError, BluetoothResult, Radio, RadioEvent, RadioState, ScanFilter,
};

const CHANNEL_CAPACITY: usize = 64;

/// A fake radio that replays queued advertisement batches, one per scan.
///
/// Each `start_scan` pops the next batch and delivers it immediately; the
/// channel then stays open until `stop_scan` (or the scanner's window
/// expires), like a real adapter that simply hears nothing more.
#[derive(Debug)]
pub struct MockRadio {
    inner: Mutex<MockInner>,
}

#[derive(Debug)]
struct MockInner {
    state: RadioState,
    scripted: VecDeque<Vec<RadioEvent>>,
    active: Option<mpsc::Sender<RadioEvent>>,
    scans_started: usize,
    scans_stopped: usize,
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRadio {
    /// A powered-on radio with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(RadioState::PoweredOn)
    }

    /// A radio reporting `state`.
    #[must_use]
    pub fn with_state(state: RadioState) -> Self {
        Self {
            inner: Mutex::new(MockInner {
                state,
                scripted: VecDeque::new(),
                active: None,
                scans_started: 0,
                scans_stopped: 0,
            }),
        }
    }

    /// Build an advertisement event.
    #[must_use]
    pub fn advert(id: &str, rssi: i16) -> RadioEvent {
        RadioEvent::Advertisement(Advertisement {
            id: id.to_string(),
            name: None,
            rssi: Some(rssi),
            is_connectable: Some(true),
        })
    }

    /// Change the reported adapter state.
    pub fn set_state(&self, state: RadioState) {
        self.lock().state = state;
    }

    /// Queue the events the next scan will deliver.
    pub fn push_scan(&self, events: Vec<RadioEvent>) {
        self.lock().scripted.push_back(events);
    }

    /// Number of scans started so far.
    #[must_use]
    pub fn scans_started(&self) -> usize {
        self.lock().scans_started
    }

    /// Number of `stop_scan` calls that ended a running scan.
    #[must_use]
    pub fn scans_stopped(&self) -> usize {
        self.lock().scans_stopped
    }

    /// Whether a scan channel is currently open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock().active.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn state(&self) -> RadioState {
        self.lock().state
    }

    async fn start_scan(
        &self,
        _filter: &ScanFilter,
    ) -> BluetoothResult<mpsc::Receiver<RadioEvent>> {
        let mut inner = self.lock();
        if inner.state != RadioState::PoweredOn {
            return Err(BluetoothError::NotPoweredOn(inner.state));
        }

        let events = inner.scripted.pop_front().unwrap_or_default();

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY.max(events.len()));
        for event in events {
            let is_error = matches!(event, RadioEvent::Error(_));
            // Capacity covers the whole batch.
            let _ = tx.try_send(event);
            if is_error {
                break;
            }
        }

        inner.scans_started += 1;
        inner.active = Some(tx);
        Ok(rx)
    }

    async fn stop_scan(&self) -> BluetoothResult<()> {
        let mut inner = self.lock();
        if inner.active.take().is_some() {
            inner.scans_stopped += 1;
        }
        Ok(())
    }
}
