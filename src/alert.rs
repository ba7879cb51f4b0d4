//! The Alert aggregate: lifecycle state machine, notification ledger, and
//! escalation history.
//!
//! All fields are private on purpose. The methods on [`Alert`] are the only
//! mutation surface: no caller appends to the ledger or bumps the escalation
//! level directly, so the invariants hold by construction:
//!
//! - `escalation_level` is monotonically non-decreasing and capped at
//!   [`MAX_ESCALATION_LEVEL`].
//! - Once resolved, no further notifications or escalations are appended.
//! - `priority` is always the severity-derived constant, recomputed on every
//!   severity change and never set independently.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{AlertStatus, AlertType, Channel, NotificationStatus, Severity};

/// Escalation levels run 0..=3; at 3 the ladder stops and the alert is
/// marked escalated until someone resolves it.
pub const MAX_ESCALATION_LEVEL: i64 = 3;

/// Default auto-resolve timeout in minutes.
pub const DEFAULT_AUTO_RESOLVE_MINUTES: i64 = 30;

/// One entry in the append-only notification ledger.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEntry {
    /// Contact the attempt targets.
    pub contact_id: String,
    /// Channel used for the attempt.
    pub channel: Channel,
    /// Delivery state.
    pub status: NotificationStatus,
    /// Failed attempt count.
    pub attempts: i64,
    /// When the entry was handed to the provider (first `sent`).
    pub sent_at: Option<DateTime<Utc>>,
    /// When the entry was last touched by a delivery attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Provider response or failure reason, verbatim.
    pub response: Option<String>,
}

/// One entry in the escalation history.
#[derive(Debug, Clone, Serialize)]
pub struct EscalationRecord {
    /// Escalation level after this step.
    pub level: i64,
    /// When the step happened.
    pub timestamp: DateTime<Utc>,
    /// Lead channel used for the widened dispatch.
    pub channel: Channel,
    /// Lead contact of the widened set.
    pub contact_id: String,
    /// Outcome note ("notified", "no_contacts", ...).
    pub outcome: String,
}

/// The central persisted entity: one dangerous condition and everything that
/// happened in response to it.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    id: String,
    subject_id: String,
    session_id: Option<String>,
    alert_type: AlertType,
    severity: Severity,
    priority: i64,
    status: AlertStatus,
    message: String,
    location: Option<String>,
    created_at: DateTime<Utc>,
    acknowledged_at: Option<DateTime<Utc>>,
    acknowledged_by: Option<String>,
    resolved_at: Option<DateTime<Utc>>,
    resolved_by: Option<String>,
    escalation_level: i64,
    escalation_history: Vec<EscalationRecord>,
    notifications: Vec<NotificationEntry>,
    auto_resolve: bool,
    auto_resolve_after_minutes: i64,
}

/// Raw field bundle used by the storage layer to rebuild an aggregate.
///
/// Crate-private: only storage constructs one, and only from rows it wrote
/// through the aggregate in the first place.
pub(crate) struct AlertParts {
    pub id: String,
    pub subject_id: String,
    pub session_id: Option<String>,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub priority: i64,
    pub status: AlertStatus,
    pub message: String,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub escalation_level: i64,
    pub escalation_history: Vec<EscalationRecord>,
    pub notifications: Vec<NotificationEntry>,
    pub auto_resolve: bool,
    pub auto_resolve_after_minutes: i64,
}

impl Alert {
    /// Create a new active alert.
    pub fn new(
        subject_id: &str,
        session_id: Option<String>,
        alert_type: AlertType,
        severity: Severity,
        message: String,
        location: Option<String>,
        auto_resolve_after_minutes: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subject_id: subject_id.to_string(),
            session_id,
            alert_type,
            severity,
            priority: severity.priority(),
            status: AlertStatus::Active,
            message,
            location,
            created_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            escalation_level: 0,
            escalation_history: Vec::new(),
            notifications: Vec::new(),
            auto_resolve: true,
            auto_resolve_after_minutes,
        }
    }

    pub(crate) fn from_parts(parts: AlertParts) -> Self {
        Self {
            id: parts.id,
            subject_id: parts.subject_id,
            session_id: parts.session_id,
            alert_type: parts.alert_type,
            severity: parts.severity,
            priority: parts.priority,
            status: parts.status,
            message: parts.message,
            location: parts.location,
            created_at: parts.created_at,
            acknowledged_at: parts.acknowledged_at,
            acknowledged_by: parts.acknowledged_by,
            resolved_at: parts.resolved_at,
            resolved_by: parts.resolved_by,
            escalation_level: parts.escalation_level,
            escalation_history: parts.escalation_history,
            notifications: parts.notifications,
            auto_resolve: parts.auto_resolve,
            auto_resolve_after_minutes: parts.auto_resolve_after_minutes,
        }
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    /// Acknowledge the alert.
    ///
    /// Legal from active, acknowledged, and escalated; illegal once resolved.
    /// An escalated alert keeps its escalated status but records who
    /// acknowledged it and when. Severity is unchanged.
    pub fn acknowledge(&mut self, by: &str, now: DateTime<Utc>) -> Result<(), CoreError> {
        if self.status == AlertStatus::Resolved {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                action: "acknowledge",
            });
        }

        self.acknowledged_at = Some(now);
        self.acknowledged_by = Some(by.to_string());
        if self.status == AlertStatus::Active {
            self.status = AlertStatus::Acknowledged;
        }
        Ok(())
    }

    /// Resolve the alert. Terminal; overrides escalated.
    ///
    /// Returns [`CoreError::AlreadyResolved`] on a second call, leaving
    /// `resolved_at`/`resolved_by` untouched.
    pub fn resolve(&mut self, by: &str, now: DateTime<Utc>) -> Result<(), CoreError> {
        if self.status == AlertStatus::Resolved {
            return Err(CoreError::AlreadyResolved);
        }

        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(now);
        self.resolved_by = Some(by.to_string());
        Ok(())
    }

    /// Record one escalation step.
    ///
    /// Bumps the level by exactly one, capped at [`MAX_ESCALATION_LEVEL`];
    /// at the cap the call only appends history. Reaching the cap marks the
    /// alert escalated. Illegal once resolved.
    pub fn escalate(
        &mut self,
        channel: Channel,
        contact_id: &str,
        outcome: &str,
        now: DateTime<Utc>,
    ) -> Result<i64, CoreError> {
        if self.status == AlertStatus::Resolved {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                action: "escalate",
            });
        }

        if self.escalation_level < MAX_ESCALATION_LEVEL {
            self.escalation_level += 1;
        }

        self.escalation_history.push(EscalationRecord {
            level: self.escalation_level,
            timestamp: now,
            channel,
            contact_id: contact_id.to_string(),
            outcome: outcome.to_string(),
        });

        if self.escalation_level >= MAX_ESCALATION_LEVEL {
            self.status = AlertStatus::Escalated;
        }

        Ok(self.escalation_level)
    }

    /// Append a pending ledger entry for a delivery attempt.
    ///
    /// Illegal once resolved: a closed alert accepts no new notifications.
    pub fn add_notification(
        &mut self,
        contact_id: &str,
        channel: Channel,
    ) -> Result<(), CoreError> {
        if self.status == AlertStatus::Resolved {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                action: "add a notification to",
            });
        }

        self.notifications.push(NotificationEntry {
            contact_id: contact_id.to_string(),
            channel,
            status: NotificationStatus::Pending,
            attempts: 0,
            sent_at: None,
            last_attempt_at: None,
            response: None,
        });
        Ok(())
    }

    /// Update the most recent ledger entry matching `(contact_id, channel)`.
    ///
    /// Increments `attempts` only on failure, always stamps
    /// `last_attempt_at`, and stamps `sent_at` on the first transition to
    /// sent. The response string is stored verbatim when given.
    pub fn update_notification_status(
        &mut self,
        contact_id: &str,
        channel: Channel,
        status: NotificationStatus,
        response: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let entry = self
            .notifications
            .iter_mut()
            .rev()
            .find(|n| n.contact_id == contact_id && n.channel == channel)
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "no notification for contact '{contact_id}' on channel '{channel}'"
                ))
            })?;

        entry.status = status;
        entry.last_attempt_at = Some(now);
        if status == NotificationStatus::Failed {
            entry.attempts += 1;
        }
        if status == NotificationStatus::Sent && entry.sent_at.is_none() {
            entry.sent_at = Some(now);
        }
        if let Some(response) = response {
            entry.response = Some(response.to_string());
        }
        Ok(())
    }

    /// Change severity, recomputing the derived priority in the same step.
    pub fn set_severity(&mut self, severity: Severity) {
        self.severity = severity;
        self.priority = severity.priority();
    }

    // ------------------------------------------------------------------
    // Derived, computed on read
    // ------------------------------------------------------------------

    /// Whole minutes since creation.
    pub fn age_in_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_minutes()
    }

    /// True iff the alert auto-resolves and its age exceeds the timeout.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.auto_resolve && self.age_in_minutes(now) > self.auto_resolve_after_minutes
    }

    /// Timestamp of the latest activity relevant to the escalation ladder:
    /// the most recent escalation step, or creation if none.
    pub fn last_escalation_activity(&self) -> DateTime<Utc> {
        self.escalation_history
            .last()
            .map(|record| record.timestamp)
            .unwrap_or(self.created_at)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Unique alert ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Monitored person the alert concerns.
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Monitoring session that produced the alert, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Alert category.
    pub fn alert_type(&self) -> AlertType {
        self.alert_type
    }

    /// Current severity.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Severity-derived priority (1..=10).
    pub fn priority(&self) -> i64 {
        self.priority
    }

    /// Lifecycle status.
    pub fn status(&self) -> AlertStatus {
        self.status
    }

    /// Human-readable description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Free-form location string.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Acknowledgement time, if acknowledged.
    pub fn acknowledged_at(&self) -> Option<DateTime<Utc>> {
        self.acknowledged_at
    }

    /// Who acknowledged, if anyone.
    pub fn acknowledged_by(&self) -> Option<&str> {
        self.acknowledged_by.as_deref()
    }

    /// Resolution time, if resolved.
    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// Who resolved, if anyone.
    pub fn resolved_by(&self) -> Option<&str> {
        self.resolved_by.as_deref()
    }

    /// Current escalation level (0..=3).
    pub fn escalation_level(&self) -> i64 {
        self.escalation_level
    }

    /// Ordered escalation history.
    pub fn escalation_history(&self) -> &[EscalationRecord] {
        &self.escalation_history
    }

    /// Ordered notification ledger.
    pub fn notifications(&self) -> &[NotificationEntry] {
        &self.notifications
    }

    /// Whether the alert auto-resolves.
    pub fn auto_resolve(&self) -> bool {
        self.auto_resolve
    }

    /// Auto-resolve timeout in minutes.
    pub fn auto_resolve_after_minutes(&self) -> i64 {
        self.auto_resolve_after_minutes
    }
}
