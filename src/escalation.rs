//! The engine: event ingestion, alert lifecycle operations, and the
//! escalation ladder.
//!
//! This is the orchestration layer over the leaf components: the rule
//! evaluator classifies, the cooldown tracker gates creation, the contact
//! module selects recipients, the dispatcher fans out, and the storage layer
//! persists the aggregate. Human actions (acknowledge/resolve/escalate) and
//! the time-driven sweep both go through here, so every mutation passes
//! through the Alert aggregate's state machine.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::alert::{Alert, MAX_ESCALATION_LEVEL};
use crate::config::Config;
use crate::contact::{Contact, select_contacts, select_for_escalation, select_for_sos};
use crate::cooldown::CooldownTracker;
use crate::error::CoreError;
use crate::model::{
    AlertStatus, AlertType, Channel, CreateAlertRequest, EventRequest, EventResponse, EventType,
    NotificationUpdateRequest, Severity, SosRequest,
};
use crate::notify::Dispatcher;
use crate::rules::RulePolicy;
use crate::storage::Storage;

/// User ID recorded when the sweep auto-resolves an alert.
pub const SYSTEM_USER: &str = "system";

/// Counters from one sweep run.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    /// Alerts auto-resolved because they outlived their timeout.
    pub auto_resolved: usize,
    /// Alerts escalated because nobody responded within the window.
    pub escalated: usize,
}

/// The alert lifecycle engine.
#[derive(Clone)]
pub struct Engine {
    storage: Storage,
    cooldown: Arc<CooldownTracker>,
    dispatcher: Dispatcher,
    rules: RulePolicy,
    auto_resolve_minutes: i64,
    response_window: Duration,
}

impl Engine {
    /// Assemble the engine from its parts.
    pub fn new(storage: Storage, dispatcher: Dispatcher, config: &Config) -> Self {
        Self {
            storage,
            cooldown: Arc::new(CooldownTracker::new(
                config.cooldown_window_ms,
                config.cooldown_max_entries,
            )),
            dispatcher,
            rules: config.rules,
            auto_resolve_minutes: config.auto_resolve_minutes,
            response_window: Duration::minutes(config.response_window_minutes),
        }
    }

    // ------------------------------------------------------------------
    // Event ingestion
    // ------------------------------------------------------------------

    /// Classify an incoming activity event and create an alert if it is
    /// dangerous and not suppressed by the cooldown.
    ///
    /// Classification never fails on strange input: unknown event types
    /// normalize to `unknown` and are non-dangerous. Only malformed requests
    /// (empty subject, confidence outside `[0, 1]`) are rejected.
    pub async fn ingest_event(&self, request: EventRequest) -> Result<EventResponse, CoreError> {
        if request.subject_id.trim().is_empty() {
            return Err(CoreError::Validation("subject_id must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&request.confidence) {
            return Err(CoreError::Validation(format!(
                "confidence must be within [0, 1], got {}",
                request.confidence
            )));
        }

        let now = Utc::now();
        let event_type = EventType::normalize(&request.raw_type);
        let danger = self.rules.is_dangerous(event_type, request.duration_ms);

        if !danger {
            return Ok(EventResponse {
                normalized_type: event_type,
                danger: false,
                alert_id: None,
                notified: None,
            });
        }

        // Cooldown gates creation only; the event itself was still dangerous.
        if !self
            .cooldown
            .should_fire(&request.subject_id, event_type, now)
        {
            info!(
                subject_id = %request.subject_id,
                event_type = %event_type,
                "Alert suppressed by cooldown"
            );
            return Ok(EventResponse {
                normalized_type: event_type,
                danger: true,
                alert_id: None,
                notified: None,
            });
        }

        let Some(alert_type) = AlertType::from_event(event_type) else {
            return Ok(EventResponse {
                normalized_type: event_type,
                danger: false,
                alert_id: None,
                notified: None,
            });
        };

        let severity = self
            .rules
            .severity_of(event_type, request.confidence, request.duration_ms);

        let alert = Alert::new(
            &request.subject_id,
            request.session_id.clone(),
            alert_type,
            severity,
            event_message(event_type, request.confidence, request.duration_ms),
            request.location.clone(),
            self.auto_resolve_minutes,
            now,
        );
        self.storage.insert_alert(&alert).await?;

        info!(
            alert_id = %alert.id(),
            subject_id = %alert.subject_id(),
            alert_type = %alert_type,
            severity = %severity,
            "Alert created from event"
        );

        let contacts = self
            .storage
            .contacts_for_subject(&request.subject_id)
            .await?;
        let recipients = select_contacts(&contacts, alert_type, now);
        let notified = self.dispatcher.dispatch(&self.storage, &alert, &recipients).await;

        Ok(EventResponse {
            normalized_type: event_type,
            danger: true,
            alert_id: Some(alert.id().to_string()),
            notified: Some(notified),
        })
    }

    // ------------------------------------------------------------------
    // Manual creation
    // ------------------------------------------------------------------

    /// Create an alert by hand (caregiver-raised medical/security/wellness
    /// concerns). Bypasses the rule evaluator and the cooldown.
    pub async fn create_manual_alert(
        &self,
        request: CreateAlertRequest,
    ) -> Result<Alert, CoreError> {
        if request.subject_id.trim().is_empty() {
            return Err(CoreError::Validation("subject_id must not be empty".into()));
        }

        let now = Utc::now();
        let message = request
            .message
            .unwrap_or_else(|| format!("{} alert raised manually", request.alert_type));

        let alert = Alert::new(
            &request.subject_id,
            None,
            request.alert_type,
            request.severity,
            message,
            request.location,
            self.auto_resolve_minutes,
            now,
        );
        self.storage.insert_alert(&alert).await?;

        info!(
            alert_id = %alert.id(),
            subject_id = %alert.subject_id(),
            alert_type = %request.alert_type,
            "Manual alert created"
        );

        let contacts = self
            .storage
            .contacts_for_subject(&request.subject_id)
            .await?;
        let recipients = select_contacts(&contacts, request.alert_type, now);
        self.dispatcher.dispatch(&self.storage, &alert, &recipients).await;

        self.storage.get_alert(alert.id()).await
    }

    /// Trigger a manual SOS: always a critical `sos` alert, fanned out to
    /// every active contact regardless of category opt-in or availability,
    /// plus the emergency-services channel when requested.
    pub async fn trigger_sos(&self, request: SosRequest) -> Result<(Alert, usize), CoreError> {
        if request.subject_id.trim().is_empty() {
            return Err(CoreError::Validation("subject_id must not be empty".into()));
        }

        let now = Utc::now();
        let alert = Alert::new(
            &request.subject_id,
            None,
            AlertType::Sos,
            Severity::Critical,
            "SOS triggered manually".to_string(),
            request.location,
            self.auto_resolve_minutes,
            now,
        );
        self.storage.insert_alert(&alert).await?;

        info!(
            alert_id = %alert.id(),
            subject_id = %alert.subject_id(),
            include_emergency = request.include_emergency_call,
            "SOS alert created"
        );

        let contacts = self
            .storage
            .contacts_for_subject(&request.subject_id)
            .await?;
        let recipients = select_for_sos(&contacts);
        let mut notified = self.dispatcher.dispatch(&self.storage, &alert, &recipients).await;

        if request.include_emergency_call
            && self.dispatcher.dispatch_emergency(&self.storage, &alert).await
        {
            notified += 1;
        }

        let alert = self.storage.get_alert(alert.id()).await?;
        Ok((alert, notified))
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// Acknowledge an alert.
    pub async fn acknowledge_alert(&self, id: &str, by: &str) -> Result<Alert, CoreError> {
        let mut alert = self.storage.get_alert(id).await?;
        alert.acknowledge(by, Utc::now())?;
        self.storage.persist_lifecycle(&alert).await?;

        info!(alert_id = %id, by = %by, "Alert acknowledged");
        Ok(alert)
    }

    /// Resolve an alert. Terminal.
    pub async fn resolve_alert(&self, id: &str, by: &str) -> Result<Alert, CoreError> {
        let mut alert = self.storage.get_alert(id).await?;
        alert.resolve(by, Utc::now())?;
        self.storage.persist_lifecycle(&alert).await?;

        info!(alert_id = %id, by = %by, "Alert resolved");
        Ok(alert)
    }

    /// Run one escalation step: widen the contact set for the next level,
    /// bump the aggregate, and re-dispatch.
    pub async fn escalate_alert(&self, id: &str) -> Result<Alert, CoreError> {
        let mut alert = self.storage.get_alert(id).await?;
        let now = Utc::now();

        let target_level = (alert.escalation_level() + 1).min(MAX_ESCALATION_LEVEL);
        let contacts = self.storage.contacts_for_subject(alert.subject_id()).await?;
        let recipients = select_for_escalation(
            &contacts,
            alert.alert_type(),
            alert.severity(),
            target_level,
            now,
        );

        let (lead_contact, lead_channel, outcome) = match recipients.first() {
            Some(lead) => (
                lead.id.clone(),
                lead.enabled_channels().first().copied().unwrap_or(Channel::Push),
                "notified",
            ),
            None => ("none".to_string(), Channel::Push, "no_contacts"),
        };

        let level = alert.escalate(lead_channel, &lead_contact, outcome, now)?;
        self.storage.persist_lifecycle(&alert).await?;
        if let Some(record) = alert.escalation_history().last() {
            self.storage.append_escalation(alert.id(), record).await?;
        }

        info!(
            alert_id = %id,
            level,
            recipients = recipients.len(),
            "Alert escalated"
        );

        if !recipients.is_empty() {
            self.dispatcher.dispatch(&self.storage, &alert, &recipients).await;
        }

        self.storage.get_alert(id).await
    }

    /// Record a delivery-status update for a ledger entry (provider
    /// callbacks, manual corrections).
    pub async fn update_notification(
        &self,
        id: &str,
        request: NotificationUpdateRequest,
    ) -> Result<Alert, CoreError> {
        self.storage
            .update_notification_status(
                id,
                &request.contact_id,
                request.channel,
                request.status,
                request.response.as_deref(),
                Utc::now(),
            )
            .await?;
        self.storage.get_alert(id).await
    }

    /// Load one alert with its ledger and history.
    pub async fn get_alert(&self, id: &str) -> Result<Alert, CoreError> {
        self.storage.get_alert(id).await
    }

    /// List alerts, optionally filtered.
    pub async fn list_alerts(
        &self,
        subject_id: Option<&str>,
        status: Option<AlertStatus>,
    ) -> Result<Vec<Alert>, CoreError> {
        self.storage.list_alerts(subject_id, status).await
    }

    // ------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------

    /// Add or update a contact in a subject's care network.
    pub async fn upsert_contact(&self, mut contact: Contact) -> Result<Contact, CoreError> {
        if contact.subject_id.trim().is_empty() {
            return Err(CoreError::Validation("subject_id must not be empty".into()));
        }
        if contact.name.trim().is_empty() {
            return Err(CoreError::Validation("name must not be empty".into()));
        }
        if contact.id.trim().is_empty() {
            contact.id = uuid::Uuid::new_v4().to_string();
        }

        self.storage.upsert_contact(&contact).await?;
        Ok(contact)
    }

    /// List a subject's care network.
    pub async fn list_contacts(&self, subject_id: &str) -> Result<Vec<Contact>, CoreError> {
        self.storage.contacts_for_subject(subject_id).await
    }

    // ------------------------------------------------------------------
    // Time-driven sweep
    // ------------------------------------------------------------------

    /// One pass over all open alerts: auto-resolve the overdue, escalate the
    /// unanswered.
    ///
    /// Idempotent: a resolved alert is never touched again, an alert whose
    /// ladder just moved is left alone until the response window elapses
    /// again, and an alert at the escalation cap stays put until a human
    /// resolves it. Per-alert failures are logged and skipped so one bad row
    /// never stalls the sweep.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> Result<SweepStats, CoreError> {
        let mut stats = SweepStats::default();

        for id in self.storage.open_alert_ids().await? {
            let alert = match self.storage.get_alert(&id).await {
                Ok(alert) => alert,
                Err(e) => {
                    warn!(alert_id = %id, error = %e, "Sweep could not load alert");
                    continue;
                }
            };

            // An alert at the cap waits for a human; auto-resolve would
            // silently close exactly the alerts nobody answered.
            if alert.status() == AlertStatus::Escalated {
                continue;
            }

            if alert.is_overdue(now) {
                match self.resolve_alert(&id, SYSTEM_USER).await {
                    Ok(_) => stats.auto_resolved += 1,
                    Err(CoreError::AlreadyResolved) => {}
                    Err(e) => warn!(alert_id = %id, error = %e, "Sweep auto-resolve failed"),
                }
                continue;
            }

            let stale = now - alert.last_escalation_activity() >= self.response_window;
            if stale
                && alert.escalation_level() < MAX_ESCALATION_LEVEL
                && matches!(
                    alert.status(),
                    AlertStatus::Active | AlertStatus::Acknowledged
                )
            {
                match self.escalate_alert(&id).await {
                    Ok(_) => stats.escalated += 1,
                    Err(e) => warn!(alert_id = %id, error = %e, "Sweep escalation failed"),
                }
            }
        }

        if stats.auto_resolved > 0 || stats.escalated > 0 {
            info!(
                auto_resolved = stats.auto_resolved,
                escalated = stats.escalated,
                "Sweep completed"
            );
        }
        Ok(stats)
    }
}

/// Human-readable description for an alert created from an event.
fn event_message(event_type: EventType, confidence: f64, duration_ms: u64) -> String {
    match event_type {
        EventType::Fall => format!(
            "Fall detected with {:.0}% confidence",
            confidence * 100.0
        ),
        EventType::Inactivity => format!(
            "No activity detected for {} minutes",
            duration_ms / 60_000
        ),
        EventType::Normal | EventType::Unknown => format!("{event_type} event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::{ChannelPreference, NotificationPreferences};
    use crate::model::{ContactType, NotificationStatus};
    use crate::notify::ChannelSenders;

    async fn engine() -> Engine {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let dispatcher = Dispatcher::new(ChannelSenders::simulated());
        Engine::new(storage, dispatcher, &Config::default())
    }

    fn sms_contact(id: &str, name: &str) -> Contact {
        Contact {
            id: id.to_string(),
            subject_id: "subject-1".to_string(),
            name: name.to_string(),
            contact_type: ContactType::FamilyMember,
            email: None,
            phone: Some("+15550001111".to_string()),
            push_token: None,
            notification_preferences: NotificationPreferences {
                sms: ChannelPreference {
                    enabled: true,
                    ..Default::default()
                },
                ..Default::default()
            },
            alert_types: vec![AlertType::Fall, AlertType::Inactivity],
            is_active: true,
            is_primary: true,
            availability: Default::default(),
        }
    }

    fn fall_event(confidence: f64) -> EventRequest {
        EventRequest {
            subject_id: "subject-1".to_string(),
            session_id: Some("session-1".to_string()),
            raw_type: "fall".to_string(),
            confidence,
            duration_ms: 0,
            location: Some("bathroom".to_string()),
            coordinates: None,
        }
    }

    #[tokio::test]
    async fn test_dangerous_event_creates_alert() {
        let engine = engine().await;
        engine.upsert_contact(sms_contact("c1", "Anna")).await.unwrap();

        let response = engine.ingest_event(fall_event(0.95)).await.unwrap();

        assert_eq!(response.normalized_type, EventType::Fall);
        assert!(response.danger);
        let alert_id = response.alert_id.unwrap();
        assert_eq!(response.notified, Some(1));

        let alert = engine.get_alert(&alert_id).await.unwrap();
        assert_eq!(alert.severity(), Severity::Critical);
        assert_eq!(alert.priority(), 10);
        assert_eq!(alert.status(), AlertStatus::Active);
        assert_eq!(alert.notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_second_event() {
        let engine = engine().await;
        engine.upsert_contact(sms_contact("c1", "Anna")).await.unwrap();

        let first = engine.ingest_event(fall_event(0.95)).await.unwrap();
        let second = engine.ingest_event(fall_event(0.95)).await.unwrap();

        assert!(first.alert_id.is_some());
        assert!(second.danger);
        assert!(second.alert_id.is_none());

        let alerts = engine.list_alerts(Some("subject-1"), None).await.unwrap();
        assert_eq!(alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_non_dangerous_event_creates_nothing() {
        let engine = engine().await;

        let response = engine
            .ingest_event(EventRequest {
                raw_type: "normal".to_string(),
                ..fall_event(0.9)
            })
            .await
            .unwrap();

        assert_eq!(response.normalized_type, EventType::Normal);
        assert!(!response.danger);
        assert!(response.alert_id.is_none());
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_not_an_error() {
        let engine = engine().await;

        let response = engine
            .ingest_event(EventRequest {
                raw_type: "breakdancing".to_string(),
                ..fall_event(0.9)
            })
            .await
            .unwrap();

        assert_eq!(response.normalized_type, EventType::Unknown);
        assert!(!response.danger);
    }

    #[tokio::test]
    async fn test_invalid_confidence_rejected() {
        let engine = engine().await;
        let err = engine.ingest_event(fall_event(1.5)).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_long_inactivity_is_high_severity() {
        let engine = engine().await;

        let response = engine
            .ingest_event(EventRequest {
                raw_type: "inactivity".to_string(),
                duration_ms: 400_000,
                ..fall_event(1.0)
            })
            .await
            .unwrap();

        let alert = engine.get_alert(&response.alert_id.unwrap()).await.unwrap();
        assert_eq!(alert.severity(), Severity::High);
        assert_eq!(alert.priority(), 6);
    }

    #[tokio::test]
    async fn test_sos_bypasses_contact_filters() {
        let engine = engine().await;
        // Contact opted out of everything; SOS must still reach them.
        let mut contact = sms_contact("c1", "Anna");
        contact.alert_types = vec![];
        engine.upsert_contact(contact).await.unwrap();

        let (alert, notified) = engine
            .trigger_sos(SosRequest {
                subject_id: "subject-1".to_string(),
                location: None,
                include_emergency_call: false,
            })
            .await
            .unwrap();

        assert_eq!(alert.alert_type(), AlertType::Sos);
        assert_eq!(alert.severity(), Severity::Critical);
        assert_eq!(notified, 1);
    }

    #[tokio::test]
    async fn test_sos_emergency_entry_without_endpoint_fails_in_ledger() {
        let engine = engine().await;

        let (alert, _) = engine
            .trigger_sos(SosRequest {
                subject_id: "subject-1".to_string(),
                location: Some("garden".to_string()),
                include_emergency_call: true,
            })
            .await
            .unwrap();

        let emergency = alert
            .notifications()
            .iter()
            .find(|n| n.channel == Channel::Emergency)
            .unwrap();
        assert_eq!(emergency.status, NotificationStatus::Failed);
    }

    #[tokio::test]
    async fn test_escalation_widens_and_caps() {
        let engine = engine().await;
        let mut bystander = sms_contact("c2", "Bea");
        bystander.alert_types = vec![AlertType::Wellness]; // not opted into falls
        bystander.is_primary = false;
        engine.upsert_contact(bystander).await.unwrap();

        let response = engine.ingest_event(fall_event(0.5)).await.unwrap();
        let id = response.alert_id.unwrap();
        // Nobody was eligible at creation.
        assert_eq!(response.notified, Some(0));

        let alert = engine.escalate_alert(&id).await.unwrap();
        assert_eq!(alert.escalation_level(), 1);
        // Widened selection reached the opted-out contact.
        assert!(!alert.notifications().is_empty());

        for _ in 0..3 {
            engine.escalate_alert(&id).await.unwrap();
        }
        let alert = engine.get_alert(&id).await.unwrap();
        assert_eq!(alert.escalation_level(), 3);
        assert_eq!(alert.status(), AlertStatus::Escalated);
        assert_eq!(alert.escalation_history().len(), 4);
    }

    #[tokio::test]
    async fn test_lifecycle_via_engine() {
        let engine = engine().await;
        let response = engine.ingest_event(fall_event(0.95)).await.unwrap();
        let id = response.alert_id.unwrap();

        let alert = engine.acknowledge_alert(&id, "carer-1").await.unwrap();
        assert_eq!(alert.status(), AlertStatus::Acknowledged);

        let alert = engine.resolve_alert(&id, "carer-1").await.unwrap();
        assert_eq!(alert.status(), AlertStatus::Resolved);

        let err = engine.acknowledge_alert(&id, "carer-2").await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_sweep_auto_resolves_overdue() {
        let engine = engine().await;
        let now = Utc::now();

        // Created 31 minutes ago with the default 30 minute timeout.
        let stale = Alert::new(
            "subject-1",
            None,
            AlertType::Fall,
            Severity::Medium,
            "Fall detected".to_string(),
            None,
            30,
            now - Duration::minutes(31),
        );
        engine.storage.insert_alert(&stale).await.unwrap();

        let stats = engine.run_sweep(now).await.unwrap();
        assert_eq!(stats.auto_resolved, 1);

        let alert = engine.get_alert(stale.id()).await.unwrap();
        assert_eq!(alert.status(), AlertStatus::Resolved);
        assert_eq!(alert.resolved_by(), Some(SYSTEM_USER));

        // Re-running is a no-op, never an error.
        let stats = engine.run_sweep(now).await.unwrap();
        assert_eq!(stats.auto_resolved, 0);
    }

    #[tokio::test]
    async fn test_sweep_escalates_unanswered() {
        let engine = engine().await;
        engine.upsert_contact(sms_contact("c1", "Anna")).await.unwrap();
        let now = Utc::now();

        // 20 minutes old: past the 15 minute response window, before the
        // 30 minute auto-resolve timeout.
        let unanswered = Alert::new(
            "subject-1",
            None,
            AlertType::Fall,
            Severity::High,
            "Fall detected".to_string(),
            None,
            30,
            now - Duration::minutes(20),
        );
        engine.storage.insert_alert(&unanswered).await.unwrap();

        let stats = engine.run_sweep(now).await.unwrap();
        assert_eq!(stats.escalated, 1);

        let alert = engine.get_alert(unanswered.id()).await.unwrap();
        assert_eq!(alert.escalation_level(), 1);

        // The ladder just moved; an immediate second sweep leaves it alone.
        let stats = engine.run_sweep(Utc::now()).await.unwrap();
        assert_eq!(stats.escalated, 0);
    }

    #[tokio::test]
    async fn test_sweep_leaves_capped_alerts_for_humans() {
        let engine = engine().await;
        let now = Utc::now();

        let mut capped = Alert::new(
            "subject-1",
            None,
            AlertType::Fall,
            Severity::High,
            "Fall detected".to_string(),
            None,
            30,
            now - Duration::minutes(120),
        );
        for _ in 0..3 {
            capped
                .escalate(Channel::Sms, "c1", "notified", now - Duration::minutes(60))
                .unwrap();
        }
        engine.storage.insert_alert(&capped).await.unwrap();

        let stats = engine.run_sweep(now).await.unwrap();
        assert_eq!(stats.auto_resolved, 0);
        assert_eq!(stats.escalated, 0);

        let alert = engine.get_alert(capped.id()).await.unwrap();
        assert_eq!(alert.status(), AlertStatus::Escalated);
    }
}
