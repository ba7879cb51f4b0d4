//! Shared data types for Vigil.
//!
//! This module holds the enums and request/response types used across the
//! engine: normalized event types, alert classification (type, severity,
//! priority), lifecycle status, notification channels, and the HTTP payloads
//! the API layer exchanges with callers.
//!
//! The Alert aggregate itself lives in [`crate::alert`]; contacts live in
//! [`crate::contact`]. Everything here is plain data.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Normalized activity event type.
///
/// Raw event types arrive as free-form strings from the upstream activity
/// recognition producer; [`EventType::normalize`] maps them onto this closed
/// set. Unknown strings are never an error; they normalize to
/// [`EventType::Unknown`], which is simply non-dangerous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// A detected fall.
    Fall,
    /// Prolonged inactivity.
    Inactivity,
    /// Normal activity, nothing to do.
    Normal,
    /// Anything the producer emits that we do not recognize.
    Unknown,
}

impl EventType {
    /// Normalize a raw producer event type string.
    ///
    /// Case-insensitive. Recognized spellings:
    ///
    /// - `"fall"`, `"falls"` → [`EventType::Fall`]
    /// - `"inactivity"`, `"idle"`, `"prolonged_inactivity"` → [`EventType::Inactivity`]
    /// - `"normal"`, `"safe"` → [`EventType::Normal`]
    /// - anything else → [`EventType::Unknown`]
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fall" | "falls" => EventType::Fall,
            "inactivity" | "idle" | "prolonged_inactivity" => EventType::Inactivity,
            "normal" | "safe" => EventType::Normal,
            _ => EventType::Unknown,
        }
    }

    /// Stable lowercase name, used for cooldown keys and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Fall => "fall",
            EventType::Inactivity => "inactivity",
            EventType::Normal => "normal",
            EventType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    /// Fall detected by the activity producer.
    Fall,
    /// Prolonged inactivity past the configured threshold.
    Inactivity,
    /// Medical concern raised manually.
    Medical,
    /// Security concern raised manually.
    Security,
    /// Wellness check-in concern.
    Wellness,
    /// System/device problem (battery, connectivity).
    System,
    /// Manual SOS trigger. Always critical, bypasses classification.
    Sos,
}

impl AlertType {
    /// The alert category produced by a dangerous event, if any.
    ///
    /// Only falls and inactivity map to alert categories; normal and unknown
    /// events never create alerts.
    pub fn from_event(event_type: EventType) -> Option<Self> {
        match event_type {
            EventType::Fall => Some(AlertType::Fall),
            EventType::Inactivity => Some(AlertType::Inactivity),
            EventType::Normal | EventType::Unknown => None,
        }
    }

    /// Stable lowercase name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Fall => "fall",
            AlertType::Inactivity => "inactivity",
            AlertType::Medical => "medical",
            AlertType::Security => "security",
            AlertType::Wellness => "wellness",
            AlertType::System => "system",
            AlertType::Sos => "sos",
        }
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fall" => Ok(AlertType::Fall),
            "inactivity" => Ok(AlertType::Inactivity),
            "medical" => Ok(AlertType::Medical),
            "security" => Ok(AlertType::Security),
            "wellness" => Ok(AlertType::Wellness),
            "system" => Ok(AlertType::System),
            "sos" => Ok(AlertType::Sos),
            other => Err(format!("unknown alert type: {other}")),
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordinal risk level of an alert.
///
/// Ordering is meaningful: `Low < Medium < High < Critical`. The numeric
/// priority an alert carries is always derived from this via
/// [`Severity::priority`], never set independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Worth recording, no urgency.
    Low,
    /// Needs attention soon.
    Medium,
    /// Needs prompt attention.
    High,
    /// Requires immediate response.
    Critical,
}

impl Severity {
    /// Derived priority on the 1..=10 scale.
    ///
    /// Monotonic in severity: low=1, medium=3, high=6, critical=10.
    pub fn priority(&self) -> i64 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 3,
            Severity::High => 6,
            Severity::Critical => 10,
        }
    }

    /// Stable lowercase name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an alert.
///
/// Legal transitions: `active → {acknowledged, resolved, escalated}`,
/// `acknowledged → {resolved, escalated}`, `escalated → resolved`.
/// `resolved` is terminal; re-opening is a new alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Newly created, nobody has responded yet.
    Active,
    /// A caregiver has acknowledged the alert.
    Acknowledged,
    /// The escalation ladder reached its cap without resolution.
    Escalated,
    /// Closed. Terminal.
    Resolved,
}

impl AlertStatus {
    /// Stable lowercase name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Escalated => "escalated",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AlertStatus::Active),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "escalated" => Ok(AlertStatus::Escalated),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(format!("unknown alert status: {other}")),
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Email to the contact's address.
    Email,
    /// SMS to the contact's phone number.
    Sms,
    /// Push notification to the contact's devices.
    Push,
    /// Dedicated emergency-services webhook. Only used by SOS dispatch.
    Emergency,
}

impl Channel {
    /// Stable lowercase name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Push => "push",
            Channel::Emergency => "emergency",
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            "push" => Ok(Channel::Push),
            "emergency" => Ok(Channel::Emergency),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery state of a single notification ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// Recorded, delivery not yet attempted.
    Pending,
    /// Handed to the channel provider.
    Sent,
    /// Confirmed delivered by the provider.
    Delivered,
    /// Delivery attempt failed (provider error, timeout, missing address).
    Failed,
}

impl NotificationStatus {
    /// Stable lowercase name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Failed => "failed",
        }
    }
}

impl FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "sent" => Ok(NotificationStatus::Sent),
            "delivered" => Ok(NotificationStatus::Delivered),
            "failed" => Ok(NotificationStatus::Failed),
            other => Err(format!("unknown notification status: {other}")),
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship of a contact to the monitored subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactType {
    /// Immediate family.
    FamilyMember,
    /// Professional or informal caregiver.
    Caregiver,
    /// Designated emergency contact.
    EmergencyContact,
    /// Doctor, nurse, or clinic.
    HealthcareProvider,
    /// Trusted neighbor.
    Neighbor,
}

impl ContactType {
    /// Stable snake_case name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactType::FamilyMember => "family_member",
            ContactType::Caregiver => "caregiver",
            ContactType::EmergencyContact => "emergency_contact",
            ContactType::HealthcareProvider => "healthcare_provider",
            ContactType::Neighbor => "neighbor",
        }
    }
}

impl FromStr for ContactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "family_member" => Ok(ContactType::FamilyMember),
            "caregiver" => Ok(ContactType::Caregiver),
            "emergency_contact" => Ok(ContactType::EmergencyContact),
            "healthcare_provider" => Ok(ContactType::HealthcareProvider),
            "neighbor" => Ok(ContactType::Neighbor),
            other => Err(format!("unknown contact type: {other}")),
        }
    }
}

/// Geographic coordinates attached to an event or alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lng: f64,
}

/// Request body for `POST /events`.
///
/// Events are ephemeral: they are classified and (when dangerous) turned into
/// an alert, never persisted standalone.
#[derive(Debug, Clone, Deserialize)]
pub struct EventRequest {
    /// The monitored person this event concerns.
    pub subject_id: String,
    /// The monitoring session that produced the event.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Raw event type string from the producer.
    pub raw_type: String,
    /// Producer confidence in `[0, 1]`.
    pub confidence: f64,
    /// Observed duration of the condition in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
    /// Free-form location string.
    #[serde(default)]
    pub location: Option<String>,
    /// Optional coordinates.
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
}

/// Response body for `POST /events`.
#[derive(Debug, Clone, Serialize)]
pub struct EventResponse {
    /// The normalized event type the raw string mapped to.
    pub normalized_type: EventType,
    /// Whether the event was classified as dangerous.
    pub danger: bool,
    /// ID of the alert created, if one was (danger and not in cooldown).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,
    /// Number of notification attempts queued for the new alert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notified: Option<usize>,
}

/// Request body for `POST /alerts` (manual alert creation).
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAlertRequest {
    /// The monitored person the alert concerns.
    pub subject_id: String,
    /// Alert category.
    pub alert_type: AlertType,
    /// Severity. Priority is derived, never supplied.
    pub severity: Severity,
    /// Human-readable description.
    #[serde(default)]
    pub message: Option<String>,
    /// Free-form location string.
    #[serde(default)]
    pub location: Option<String>,
}

/// Request body for `POST /sos`.
#[derive(Debug, Clone, Deserialize)]
pub struct SosRequest {
    /// The monitored person triggering the SOS.
    pub subject_id: String,
    /// Free-form location string.
    #[serde(default)]
    pub location: Option<String>,
    /// Whether to also notify the dedicated emergency-services channel.
    #[serde(default)]
    pub include_emergency_call: bool,
}

/// Request body for acknowledge/resolve actions.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    /// The user performing the action.
    pub by: String,
}

/// Request body for `POST /alerts/:id/notifications` (delivery status update).
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationUpdateRequest {
    /// Contact the ledger entry belongs to.
    pub contact_id: String,
    /// Channel the ledger entry belongs to.
    pub channel: Channel,
    /// New delivery status.
    pub status: NotificationStatus,
    /// Provider response or failure reason, stored verbatim.
    #[serde(default)]
    pub response: Option<String>,
}

/// Query parameters for `GET /alerts`.
#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    /// Filter by subject.
    #[serde(default)]
    pub subject_id: Option<String>,
    /// Filter by lifecycle status.
    #[serde(default)]
    pub status: Option<AlertStatus>,
}

/// Query parameters for `GET /contacts`.
#[derive(Debug, Deserialize)]
pub struct ContactsQuery {
    /// The subject whose care network to list.
    pub subject_id: String,
}
