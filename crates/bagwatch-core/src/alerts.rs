//! Proximity alerts: local notification plus a haptic pulse.
//!
//! Delivery is best-effort. Failures (typically a denied permission) are
//! logged and never reach the caller, so status persistence is never blocked
//! by the alert path.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ProximityStatus, TrackedItem};

/// Notification title used for every proximity alert.
pub const ALERT_TITLE: &str = "Luggage Alert";

/// Kind of haptic feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HapticKind {
    /// An operation succeeded.
    Success,
    /// Something needs attention.
    Warning,
    /// An operation failed.
    Error,
}

/// Platform notification API.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Show a notification now. Fire-and-forget.
    async fn schedule(&self, title: &str, body: &str) -> Result<()>;
}

/// Platform haptics API.
#[async_trait]
pub trait Haptics: Send + Sync {
    /// Emit one pulse.
    async fn pulse(&self, kind: HapticKind) -> Result<()>;
}

/// Notifier that writes alerts to the log. Used where no device UI exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn schedule(&self, title: &str, body: &str) -> Result<()> {
        tracing::info!(title, body, "notification");
        Ok(())
    }
}

/// Haptics that only log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHaptics;

#[async_trait]
impl Haptics for LogHaptics {
    async fn pulse(&self, kind: HapticKind) -> Result<()> {
        tracing::debug!(?kind, "haptic pulse");
        Ok(())
    }
}

/// Whether moving from `previous` to `new` deserves an alert.
///
/// Only real transitions into `nearby` or `far` alert; a reading that
/// leaves the status unchanged (including the dead-zone `unknown` case)
/// stays silent.
#[must_use]
pub fn should_alert(previous: ProximityStatus, new: ProximityStatus) -> bool {
    new != previous && new.is_established()
}

/// Message body for a status.
#[must_use]
pub fn alert_body(item: &TrackedItem, status: ProximityStatus) -> String {
    match status {
        ProximityStatus::Nearby => format!("Your luggage ({}) is nearby!", item.external_code),
        ProximityStatus::Far => format!("Your luggage ({}) is far away!", item.external_code),
        ProximityStatus::Unknown => format!("Lost track of your luggage ({}).", item.external_code),
    }
}

/// Emits notifications and haptic feedback.
#[derive(Clone)]
pub struct AlertEmitter {
    notifier: Arc<dyn Notifier>,
    haptics: Arc<dyn Haptics>,
}

impl std::fmt::Debug for AlertEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEmitter").finish_non_exhaustive()
    }
}

impl AlertEmitter {
    /// Build an emitter over the given platform APIs.
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>, haptics: Arc<dyn Haptics>) -> Self {
        Self { notifier, haptics }
    }

    /// Emitter that logs instead of touching a device.
    #[must_use]
    pub fn logging() -> Self {
        Self::new(Arc::new(LogNotifier), Arc::new(LogHaptics))
    }

    /// Alert on a status transition. Returns whether an alert was attempted.
    pub async fn notify(
        &self,
        item: &TrackedItem,
        previous: ProximityStatus,
        new: ProximityStatus,
    ) -> bool {
        if !should_alert(previous, new) {
            return false;
        }

        let body = alert_body(item, new);
        if let Err(err) = self.notifier.schedule(ALERT_TITLE, &body).await {
            tracing::warn!(%err, item_id = %item.id, "failed to schedule proximity notification");
        }
        self.feedback(HapticKind::Warning).await;

        tracing::info!(
            item_id = %item.id,
            external_code = %item.external_code,
            %previous,
            status = %new,
            "proximity alert"
        );
        true
    }

    /// One haptic pulse, errors swallowed.
    pub async fn feedback(&self, kind: HapticKind) {
        if let Err(err) = self.haptics.pulse(kind).await {
            tracing::debug!(%err, ?kind, "haptic pulse failed");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{RecordingHaptics, RecordingNotifier};
    use super::*;
    use crate::types::OwnerId;

    fn item() -> TrackedItem {
        TrackedItem::new(OwnerId::new("alice"), "bag:1001".into())
    }

    #[test]
    fn test_should_alert_rules() {
        use ProximityStatus::{Far, Nearby, Unknown};
        assert!(should_alert(Unknown, Nearby));
        assert!(should_alert(Nearby, Far));
        assert!(should_alert(Far, Nearby));
        assert!(!should_alert(Nearby, Nearby));
        assert!(!should_alert(Unknown, Unknown));
        assert!(!should_alert(Far, Unknown));
    }

    #[tokio::test]
    async fn test_notify_sends_notification_and_pulse() {
        let notifier = Arc::new(RecordingNotifier::default());
        let haptics = Arc::new(RecordingHaptics::default());
        let emitter = AlertEmitter::new(notifier.clone(), haptics.clone());

        let fired = emitter
            .notify(&item(), ProximityStatus::Nearby, ProximityStatus::Far)
            .await;

        assert!(fired);
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ALERT_TITLE);
        assert!(sent[0].1.contains("far away"));
        assert_eq!(haptics.pulses(), vec![HapticKind::Warning]);
    }

    #[tokio::test]
    async fn test_notify_skips_unchanged_status() {
        let notifier = Arc::new(RecordingNotifier::default());
        let emitter = AlertEmitter::new(notifier.clone(), Arc::new(RecordingHaptics::default()));

        let fired = emitter
            .notify(&item(), ProximityStatus::Far, ProximityStatus::Far)
            .await;

        assert!(!fired);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_denied_permission_is_swallowed() {
        let haptics = Arc::new(RecordingHaptics::default());
        let emitter = AlertEmitter::new(Arc::new(RecordingNotifier::denying()), haptics.clone());

        let fired = emitter
            .notify(&item(), ProximityStatus::Unknown, ProximityStatus::Nearby)
            .await;

        assert!(fired);
        assert_eq!(haptics.pulses(), vec![HapticKind::Warning]);
    }
}
