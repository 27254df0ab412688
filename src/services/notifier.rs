//! Preference-change and delivery events.
//!
//! Everything goes through one broadcast channel. The `/events` stream, the
//! reload listener and the sibling relay are all plain subscribers, so a
//! slow or failing subscriber never blocks the publisher.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::conversation::ConversationStore;
use crate::db::now_ts;
use crate::error::{CheckinError, Result};
use crate::history::{DeliveryStatus, NotificationKind};
use crate::preferences::{CheckInSchedule, NotificationPreference};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceChange {
    pub user_id: String,
    pub old_preferences: Value,
    pub new_preferences: Value,
    pub timestamp: i64,
}

impl PreferenceChange {
    /// Reads `is_enabled` from the new snapshot. Absent means unchanged.
    pub fn now_disabled(&self) -> bool {
        let flag = |value: &Value, key: &str| value.get(key).and_then(Value::as_bool);
        let was = flag(&self.old_preferences, "is_enabled");
        let is = flag(&self.new_preferences, "is_enabled");
        matches!((was, is), (Some(true), Some(false)) | (None, Some(false)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryEvent {
    pub user_id: String,
    pub kind: NotificationKind,
    pub status: DeliveryStatus,
    pub scheduled_for: i64,
    pub error: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// Changed through this daemon's own API.
    PreferencesChanged(PreferenceChange),
    /// Reported by a sibling through `/reload`; never relayed back.
    RemoteChange(PreferenceChange),
    Delivery(DeliveryEvent),
}

impl SchedulerEvent {
    pub fn user_id(&self) -> &str {
        match self {
            SchedulerEvent::PreferencesChanged(change) | SchedulerEvent::RemoteChange(change) => {
                &change.user_id
            }
            SchedulerEvent::Delivery(event) => &event.user_id,
        }
    }
}

#[derive(Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<SchedulerEvent>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }

    /// Having no subscriber is fine.
    pub fn publish(&self, event: SchedulerEvent) {
        let _ = self.tx.send(event);
    }

    /// Publishes only when a flag the scheduler acts on changed. Returns
    /// whether an event went out.
    pub fn preferences_updated(
        &self,
        old: &NotificationPreference,
        new: &NotificationPreference,
    ) -> bool {
        if !enabled_flags_changed(old, new) {
            return false;
        }
        self.publish_snapshots(&new.user_id, old, new)
    }

    pub fn schedule_updated(&self, old: &CheckInSchedule, new: &CheckInSchedule) -> bool {
        if old.enabled == new.enabled {
            return false;
        }
        self.publish_snapshots(&new.user_id, old, new)
    }

    fn publish_snapshots<T: Serialize>(&self, user_id: &str, old: &T, new: &T) -> bool {
        let (Ok(old_preferences), Ok(new_preferences)) =
            (serde_json::to_value(old), serde_json::to_value(new))
        else {
            warn!(user_id, "could not serialize preference snapshot");
            return false;
        };
        self.publish(SchedulerEvent::PreferencesChanged(PreferenceChange {
            user_id: user_id.to_string(),
            old_preferences,
            new_preferences,
            timestamp: now_ts(),
        }));
        true
    }
}

pub fn enabled_flags_changed(old: &NotificationPreference, new: &NotificationPreference) -> bool {
    old.is_enabled != new.is_enabled || old.whatsapp_enabled != new.whatsapp_enabled
}

/// Best-effort POST of local changes to a sibling's reload endpoint.
pub struct HttpRelay {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpRelay {
    pub fn new(url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(timeout)
            .build()
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub async fn forward(&self, change: &PreferenceChange) -> Result<()> {
        let mut request = self.client.post(&self.url).json(change);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = request
            .send()
            .await
            .map_err(|e| CheckinError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CheckinError::Http(format!(
                "sibling reload returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    pub fn spawn(self, mut rx: broadcast::Receiver<SchedulerEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SchedulerEvent::PreferencesChanged(change)) => {
                        match self.forward(&change).await {
                            Ok(()) => debug!(user_id = %change.user_id, "relayed preference change"),
                            Err(err) => warn!(
                                user_id = %change.user_id,
                                error = %err,
                                "preference relay failed"
                            ),
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "preference relay lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Drops a pending question when its user gets disabled.
pub fn spawn_reload_listener(
    mut rx: broadcast::Receiver<SchedulerEvent>,
    conversations: Arc<ConversationStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let change = match rx.recv().await {
                Ok(SchedulerEvent::PreferencesChanged(change))
                | Ok(SchedulerEvent::RemoteChange(change)) => change,
                Ok(SchedulerEvent::Delivery(_)) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            if !change.now_disabled() {
                continue;
            }
            match conversations.clear(&change.user_id).await {
                Ok(true) => info!(user_id = %change.user_id, "cleared pending check-in for disabled user"),
                Ok(false) => {}
                Err(err) => warn!(user_id = %change.user_id, error = %err, "failed to clear conversation"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_enabled_flags_publish() {
        let notifier = ChangeNotifier::new(8);
        let mut rx = notifier.subscribe();
        let old = NotificationPreference::defaults_for("u1");

        let mut quiet = old.clone();
        quiet.start_hour = 10;
        assert!(!notifier.preferences_updated(&old, &quiet));

        let mut disabled = old.clone();
        disabled.is_enabled = false;
        assert!(notifier.preferences_updated(&old, &disabled));

        match rx.try_recv().unwrap() {
            SchedulerEvent::PreferencesChanged(change) => {
                assert_eq!(change.user_id, "u1");
                assert!(change.now_disabled());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn change_uses_camel_case_on_the_wire() {
        let change = PreferenceChange {
            user_id: "u1".to_string(),
            old_preferences: json!({"is_enabled": true}),
            new_preferences: json!({"is_enabled": false}),
            timestamp: 42,
        };
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["newPreferences"]["is_enabled"], false);
        assert!(value.get("user_id").is_none());
    }
}
