//! Channel senders and the notification dispatcher.
//!
//! Each channel sender posts to a provider webhook when an endpoint is
//! configured, and runs in simulated mode otherwise (logs the message and
//! fabricates a receipt). Simulated mode is what tests and local development
//! use; the webhook mode is how a deployment plugs in its email/SMS/push
//! providers.
//!
//! Dispatch is fire-and-forget relative to the API boundary: for every
//! contact × enabled channel the dispatcher persists a pending ledger entry,
//! then spawns an independent background task that attempts delivery under a
//! bounded timeout and records the outcome. A failure or timeout on one
//! channel never blocks or rolls back another; it becomes a `failed` ledger
//! entry, never an error to the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::alert::Alert;
use crate::contact::Contact;
use crate::model::{Channel, NotificationStatus};
use crate::storage::Storage;

/// Default bound on a single delivery attempt: 5 seconds.
pub const DEFAULT_SENDER_TIMEOUT_MS: u64 = 5_000;

/// Ledger contact ID used for the emergency-services channel.
pub const EMERGENCY_CONTACT_ID: &str = "emergency-services";

/// Successful delivery handoff.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    /// Provider message ID, or a generated ID in simulated mode.
    pub id: String,
}

/// A single delivery attempt failure.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The provider did not answer within the bounded timeout.
    #[error("delivery timed out")]
    Timeout,

    /// The provider answered with an error.
    #[error("provider error: {0}")]
    Provider(String),

    /// The channel has no usable destination or endpoint.
    #[error("not configured: {0}")]
    NotConfigured(String),
}

/// One provider-backed (or simulated) channel.
#[derive(Clone)]
struct WebhookSender {
    client: reqwest::Client,
    endpoint: Option<String>,
    channel: Channel,
}

impl WebhookSender {
    fn new(client: reqwest::Client, endpoint: Option<String>, channel: Channel) -> Self {
        Self {
            client,
            endpoint,
            channel,
        }
    }

    /// Post the payload to the provider, or simulate delivery when no
    /// endpoint is configured.
    async fn deliver(&self, payload: serde_json::Value) -> Result<DeliveryReceipt, SendError> {
        let Some(endpoint) = &self.endpoint else {
            let id = format!("sim-{}", Uuid::new_v4());
            info!(
                channel = %self.channel,
                receipt = %id,
                "Simulated delivery (no provider endpoint configured)"
            );
            return Ok(DeliveryReceipt { id });
        };

        let response = self
            .client
            .post(endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SendError::Timeout
                } else {
                    SendError::Provider(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(SendError::Provider(format!(
                "provider returned {}",
                response.status()
            )));
        }

        // Providers differ in what they return; take an id if one is there.
        let id = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| {
                v.get("id")
                    .or_else(|| v.get("message_id"))
                    .and_then(|id| id.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(DeliveryReceipt { id })
    }
}

/// The full set of channel senders plus the per-attempt timeout.
#[derive(Clone)]
pub struct ChannelSenders {
    email: WebhookSender,
    sms: WebhookSender,
    push: WebhookSender,
    emergency: Option<WebhookSender>,
    timeout: Duration,
}

impl ChannelSenders {
    /// Build senders from optional provider endpoints. `None` endpoints run
    /// in simulated mode; a missing emergency endpoint disables that channel.
    pub fn new(
        email_endpoint: Option<String>,
        sms_endpoint: Option<String>,
        push_endpoint: Option<String>,
        emergency_endpoint: Option<String>,
        timeout_ms: u64,
    ) -> Self {
        let timeout = Duration::from_millis(timeout_ms.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            email: WebhookSender::new(client.clone(), email_endpoint, Channel::Email),
            sms: WebhookSender::new(client.clone(), sms_endpoint, Channel::Sms),
            push: WebhookSender::new(client.clone(), push_endpoint, Channel::Push),
            emergency: emergency_endpoint
                .map(|e| WebhookSender::new(client, Some(e), Channel::Emergency)),
            timeout,
        }
    }

    /// Simulated senders for tests and local development.
    pub fn simulated() -> Self {
        Self::new(None, None, None, None, DEFAULT_SENDER_TIMEOUT_MS)
    }

    /// Send an email.
    pub async fn send_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<DeliveryReceipt, SendError> {
        self.email
            .deliver(json!({ "to": to, "subject": subject, "body": body }))
            .await
    }

    /// Send an SMS.
    pub async fn send_sms(&self, to: &str, body: &str) -> Result<DeliveryReceipt, SendError> {
        self.sms.deliver(json!({ "to": to, "body": body })).await
    }

    /// Send a push notification.
    pub async fn send_push(
        &self,
        title: &str,
        message: &str,
        priority: i64,
    ) -> Result<DeliveryReceipt, SendError> {
        self.push
            .deliver(json!({ "title": title, "message": message, "priority": priority }))
            .await
    }

    /// Notify emergency services, if the channel is configured.
    pub async fn send_emergency(
        &self,
        subject_id: &str,
        message: &str,
        location: Option<&str>,
    ) -> Result<DeliveryReceipt, SendError> {
        let Some(sender) = &self.emergency else {
            return Err(SendError::NotConfigured(
                "emergency-services channel has no endpoint".to_string(),
            ));
        };
        sender
            .deliver(json!({
                "subject_id": subject_id,
                "message": message,
                "location": location,
            }))
            .await
    }

    /// Whether the emergency-services channel is configured.
    pub fn emergency_configured(&self) -> bool {
        self.emergency.is_some()
    }
}

/// Fans a single alert out across contacts and channels, keeping the ledger.
#[derive(Clone)]
pub struct Dispatcher {
    senders: Arc<ChannelSenders>,
}

impl Dispatcher {
    /// Create a dispatcher over the given senders.
    pub fn new(senders: ChannelSenders) -> Self {
        Self {
            senders: Arc::new(senders),
        }
    }

    /// Fan the alert out to every enabled channel of every contact.
    ///
    /// Returns the number of ledger entries created. The function returns as
    /// soon as the entries are persisted and the delivery tasks are spawned;
    /// outcomes land in the ledger asynchronously.
    pub async fn dispatch(&self, storage: &Storage, alert: &Alert, contacts: &[Contact]) -> usize {
        if contacts.is_empty() {
            warn!(
                alert_id = %alert.id(),
                subject_id = %alert.subject_id(),
                "No reachable contacts for alert"
            );
            return 0;
        }

        let subject_line = format!(
            "{} alert: {}",
            alert.severity().as_str().to_uppercase(),
            alert.alert_type()
        );
        let body = match alert.location() {
            Some(location) => format!("{} (location: {})", alert.message(), location),
            None => alert.message().to_string(),
        };

        let mut queued = 0;
        for contact in contacts {
            for channel in contact.enabled_channels() {
                if let Err(e) = storage
                    .append_notification(alert.id(), &contact.id, channel)
                    .await
                {
                    warn!(
                        alert_id = %alert.id(),
                        contact_id = %contact.id,
                        channel = %channel,
                        error = %e,
                        "Failed to record notification entry"
                    );
                    continue;
                }
                queued += 1;

                // Missing destination is a configuration problem, recorded in
                // the ledger rather than raised.
                let destination = match channel {
                    Channel::Email => match &contact.email {
                        Some(email) => email.clone(),
                        None => {
                            self.mark_unconfigured(storage, alert.id(), &contact.id, channel, "no email address on file")
                                .await;
                            continue;
                        }
                    },
                    Channel::Sms => match &contact.phone {
                        Some(phone) => phone.clone(),
                        None => {
                            self.mark_unconfigured(storage, alert.id(), &contact.id, channel, "no phone number on file")
                                .await;
                            continue;
                        }
                    },
                    // Push and emergency need no per-contact destination.
                    Channel::Push | Channel::Emergency => String::new(),
                };

                self.spawn_attempt(
                    storage.clone(),
                    alert.id().to_string(),
                    contact.id.clone(),
                    channel,
                    destination,
                    subject_line.clone(),
                    body.clone(),
                    alert.priority(),
                );
            }
        }

        info!(
            alert_id = %alert.id(),
            subject_id = %alert.subject_id(),
            queued,
            "Notification fan-out queued"
        );
        queued
    }

    /// Record an emergency-services ledger entry for an SOS alert and attempt
    /// the webhook if configured. Unconfigured is a `failed` entry, not an error.
    pub async fn dispatch_emergency(&self, storage: &Storage, alert: &Alert) -> bool {
        if let Err(e) = storage
            .append_notification(alert.id(), EMERGENCY_CONTACT_ID, Channel::Emergency)
            .await
        {
            warn!(alert_id = %alert.id(), error = %e, "Failed to record emergency entry");
            return false;
        }

        if !self.senders.emergency_configured() {
            if let Err(e) = storage
                .update_notification_status(
                    alert.id(),
                    EMERGENCY_CONTACT_ID,
                    Channel::Emergency,
                    NotificationStatus::Failed,
                    Some("emergency-services channel has no endpoint"),
                    Utc::now(),
                )
                .await
            {
                warn!(alert_id = %alert.id(), error = %e, "Failed to update emergency entry");
            }
            return true;
        }

        let senders = Arc::clone(&self.senders);
        let storage = storage.clone();
        let alert_id = alert.id().to_string();
        let subject_id = alert.subject_id().to_string();
        let message = alert.message().to_string();
        let location = alert.location().map(str::to_string);
        let timeout = self.senders.timeout;

        tokio::spawn(async move {
            let result = tokio::time::timeout(
                timeout,
                senders.send_emergency(&subject_id, &message, location.as_deref()),
            )
            .await;
            record_outcome(&storage, &alert_id, EMERGENCY_CONTACT_ID, Channel::Emergency, result)
                .await;
        });
        true
    }

    fn spawn_attempt(
        &self,
        storage: Storage,
        alert_id: String,
        contact_id: String,
        channel: Channel,
        destination: String,
        subject_line: String,
        body: String,
        priority: i64,
    ) {
        let senders = Arc::clone(&self.senders);
        let timeout = self.senders.timeout;

        tokio::spawn(async move {
            let attempt = async {
                match channel {
                    Channel::Email => senders.send_email(&destination, &subject_line, &body).await,
                    Channel::Sms => senders.send_sms(&destination, &body).await,
                    Channel::Push => senders.send_push(&subject_line, &body, priority).await,
                    // Contacts never enable the emergency channel; it is
                    // routed through dispatch_emergency only.
                    Channel::Emergency => Err(SendError::NotConfigured(
                        "emergency-services is not a per-contact channel".to_string(),
                    )),
                }
            };

            let result = tokio::time::timeout(timeout, attempt).await;
            record_outcome(&storage, &alert_id, &contact_id, channel, result).await;
        });
    }

    async fn mark_unconfigured(
        &self,
        storage: &Storage,
        alert_id: &str,
        contact_id: &str,
        channel: Channel,
        reason: &str,
    ) {
        if let Err(e) = storage
            .update_notification_status(
                alert_id,
                contact_id,
                channel,
                NotificationStatus::Failed,
                Some(reason),
                Utc::now(),
            )
            .await
        {
            warn!(
                alert_id = %alert_id,
                contact_id = %contact_id,
                channel = %channel,
                error = %e,
                "Failed to record configuration failure"
            );
        }
    }
}

/// Write the outcome of one delivery attempt into the ledger.
async fn record_outcome(
    storage: &Storage,
    alert_id: &str,
    contact_id: &str,
    channel: Channel,
    result: Result<Result<DeliveryReceipt, SendError>, tokio::time::error::Elapsed>,
) {
    let (status, response) = match result {
        Ok(Ok(receipt)) => (NotificationStatus::Sent, receipt.id),
        Ok(Err(e)) => (NotificationStatus::Failed, e.to_string()),
        Err(_) => (NotificationStatus::Failed, SendError::Timeout.to_string()),
    };

    match status {
        NotificationStatus::Sent => info!(
            alert_id = %alert_id,
            contact_id = %contact_id,
            channel = %channel,
            receipt = %response,
            "Notification sent"
        ),
        _ => warn!(
            alert_id = %alert_id,
            contact_id = %contact_id,
            channel = %channel,
            reason = %response,
            "Notification delivery failed"
        ),
    }

    if let Err(e) = storage
        .update_notification_status(
            alert_id,
            contact_id,
            channel,
            status,
            Some(&response),
            Utc::now(),
        )
        .await
    {
        warn!(
            alert_id = %alert_id,
            contact_id = %contact_id,
            channel = %channel,
            error = %e,
            "Failed to record delivery outcome"
        );
    }
}
