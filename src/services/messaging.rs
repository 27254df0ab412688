use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{CheckinError, Result};
use crate::history::{DeliveryStatus, HistoryEntry, NotificationHistoryStore};
use crate::interfaces::clock::Clock;
use crate::interfaces::messaging::MessageSender;
use crate::services::notifier::{ChangeNotifier, DeliveryEvent, SchedulerEvent};

/// WhatsApp Cloud API text sender.
pub struct WhatsAppSender {
    client: reqwest::Client,
    api_url: String,
    phone_number_id: String,
    access_token: String,
}

impl WhatsAppSender {
    pub fn new(api_url: &str, phone_number_id: &str, access_token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CheckinError::Runtime(e.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            phone_number_id: phone_number_id.to_string(),
            access_token: access_token.to_string(),
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.api_url, self.phone_number_id)
    }
}

#[async_trait]
impl MessageSender for WhatsAppSender {
    fn channel(&self) -> &str {
        "whatsapp"
    }

    async fn send(&self, to: &str, text: &str) -> Result<()> {
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": text },
        });
        let response = self
            .client
            .post(self.messages_url())
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
            .json(&payload)
            .send()
            .await
            .map_err(|e| CheckinError::Http(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(CheckinError::Http(format!("whatsapp api returned {status}: {body}")))
    }
}

/// Dry-run sender: logs instead of delivering.
pub struct LogSender;

#[async_trait]
impl MessageSender for LogSender {
    fn channel(&self) -> &str {
        "log"
    }

    async fn send(&self, to: &str, text: &str) -> Result<()> {
        info!(to, text, "dry-run message");
        Ok(())
    }
}

/// Sends messages and settles the ledger row that authorised them.
#[derive(Clone)]
pub struct Dispatcher {
    sender: Arc<dyn MessageSender>,
    history: Arc<NotificationHistoryStore>,
    events: ChangeNotifier,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        sender: Arc<dyn MessageSender>,
        history: Arc<NotificationHistoryStore>,
        events: ChangeNotifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sender,
            history,
            events,
            clock,
        }
    }

    pub fn channel(&self) -> &str {
        self.sender.channel()
    }

    /// Sends `text` for a claimed row and marks it `sent` or `failed`.
    /// A send failure is recorded, not returned.
    pub async fn deliver(&self, entry: &HistoryEntry, to: &str, text: &str) -> Result<DeliveryStatus> {
        let (status, error) = match self.sender.send(to, text).await {
            Ok(()) => {
                self.history
                    .mark_sent(entry.id, self.clock.now().timestamp())
                    .await?;
                info!(
                    user_id = %entry.user_id,
                    kind = %entry.kind,
                    scheduled_for = entry.scheduled_for,
                    channel = self.sender.channel(),
                    "notification sent"
                );
                (DeliveryStatus::Sent, None)
            }
            Err(err) => {
                let message = err.to_string();
                self.history.mark_failed(entry.id, &message).await?;
                warn!(
                    user_id = %entry.user_id,
                    kind = %entry.kind,
                    scheduled_for = entry.scheduled_for,
                    error = %message,
                    "notification failed"
                );
                (DeliveryStatus::Failed, Some(message))
            }
        };
        self.events.publish(SchedulerEvent::Delivery(DeliveryEvent {
            user_id: entry.user_id.clone(),
            kind: entry.kind,
            status,
            scheduled_for: entry.scheduled_for,
            error,
            timestamp: self.clock.now().timestamp(),
        }));
        Ok(status)
    }

    /// Conversational replies (feedback, re-prompts) are not ledgered.
    pub async fn reply(&self, to: &str, text: &str) -> Result<()> {
        self.sender.send(to, text).await
    }
}
