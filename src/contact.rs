//! Contacts: the subject's care network, and selection of who to notify.
//!
//! Selection is driven entirely by per-contact state: active flag, the alert
//! categories the contact opted into, per-channel preferences, and weekday
//! availability windows. Ordering (primary contacts first, then name) also
//! governs the escalation ladder: the lead contact of each widened dispatch
//! is the first contact of the selection.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::model::{AlertType, Channel, ContactType, Severity};

/// Per-channel notification preference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPreference {
    /// Whether this channel may be used at all.
    #[serde(default)]
    pub enabled: bool,
    /// Delivery cadence hint for the channel provider.
    #[serde(default)]
    pub frequency: Frequency,
}

impl Default for ChannelPreference {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: Frequency::Immediate,
        }
    }
}

/// Delivery cadence for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Send right away.
    #[default]
    Immediate,
    /// Batch into an hourly digest.
    Hourly,
    /// Batch into a daily digest.
    Daily,
}

/// The contact's channel preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationPreferences {
    /// Email preference.
    #[serde(default)]
    pub email: ChannelPreference,
    /// SMS preference.
    #[serde(default)]
    pub sms: ChannelPreference,
    /// Push preference.
    #[serde(default)]
    pub push: ChannelPreference,
}

/// Availability window for one weekday.
///
/// A missing `start`/`end` pair means available all day; `available = false`
/// excludes the contact for the whole day regardless of times. Times are
/// `"HH:MM"` strings in the subject's local day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayWindow {
    /// Whether the contact is reachable at all on this day.
    #[serde(default = "default_true")]
    pub available: bool,
    /// Window start, `"HH:MM"`.
    #[serde(default)]
    pub start: Option<String>,
    /// Window end, `"HH:MM"`.
    #[serde(default)]
    pub end: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Per-weekday availability, keyed by lowercase day name.
///
/// Days without an entry count as available all day.
pub type Availability = std::collections::HashMap<String, DayWindow>;

/// A person in the subject's care network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    /// Unique contact ID. Generated when omitted.
    #[serde(default)]
    pub id: String,
    /// The subject this contact belongs to.
    pub subject_id: String,
    /// Display name, used for ordering.
    pub name: String,
    /// Relationship to the subject.
    pub contact_type: ContactType,
    /// Email address, if any.
    #[serde(default)]
    pub email: Option<String>,
    /// Phone number, if any.
    #[serde(default)]
    pub phone: Option<String>,
    /// Push registration token, if any.
    #[serde(default)]
    pub push_token: Option<String>,
    /// Per-channel preferences.
    #[serde(default)]
    pub notification_preferences: NotificationPreferences,
    /// Alert categories this contact receives.
    #[serde(default)]
    pub alert_types: Vec<AlertType>,
    /// Inactive contacts are never selected.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Primary contacts are notified first and lead the escalation ladder.
    #[serde(default)]
    pub is_primary: bool,
    /// Weekday availability windows.
    #[serde(default)]
    pub availability: Availability,
}

impl Contact {
    /// The channels this contact has enabled, in dispatch order.
    pub fn enabled_channels(&self) -> Vec<Channel> {
        let mut channels = Vec::new();
        if self.notification_preferences.sms.enabled {
            channels.push(Channel::Sms);
        }
        if self.notification_preferences.push.enabled {
            channels.push(Channel::Push);
        }
        if self.notification_preferences.email.enabled {
            channels.push(Channel::Email);
        }
        channels
    }

    /// Whether this contact opted into the given alert category.
    pub fn accepts(&self, alert_type: AlertType) -> bool {
        self.alert_types.contains(&alert_type)
    }

    /// Whether the contact's availability window covers `at`.
    ///
    /// No entry for the weekday means available all day. A day marked
    /// unavailable excludes the contact entirely. A missing start or end
    /// leaves that side of the window open.
    pub fn is_available_at(&self, at: DateTime<Utc>) -> bool {
        let Some(window) = self.availability.get(weekday_key(at.weekday())) else {
            return true;
        };

        if !window.available {
            return false;
        }

        let time = at.time();
        if let Some(start) = window.start.as_deref().and_then(parse_time) {
            if time < start {
                return false;
            }
        }
        if let Some(end) = window.end.as_deref().and_then(parse_time) {
            if time > end {
                return false;
            }
        }
        true
    }
}

/// Lowercase key for a weekday, matching the availability map.
fn weekday_key(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Parse `"HH:MM"` (or `"HH:MM:SS"`) into a time of day.
fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

/// Base contact selection for a new alert.
///
/// Keeps contacts that are active, opted into the alert category, have at
/// least one enabled channel, and are available at `at`. Primary contacts
/// sort first, then alphabetic by name.
pub fn select_contacts(contacts: &[Contact], alert_type: AlertType, at: DateTime<Utc>) -> Vec<Contact> {
    let mut selected: Vec<Contact> = contacts
        .iter()
        .filter(|c| {
            c.is_active
                && c.accepts(alert_type)
                && !c.enabled_channels().is_empty()
                && c.is_available_at(at)
        })
        .cloned()
        .collect();
    sort_selection(&mut selected);
    selected
}

/// Widened selection for an escalation step.
///
/// Level 0 is the base selection. From level 1 the category opt-in filter is
/// dropped; everyone in the care network is fair game when nobody responds.
/// For critical alerts, or from level 2, availability windows are ignored as
/// well. Being active with at least one enabled channel is always required.
pub fn select_for_escalation(
    contacts: &[Contact],
    alert_type: AlertType,
    severity: Severity,
    level: i64,
    at: DateTime<Utc>,
) -> Vec<Contact> {
    if level <= 0 {
        return select_contacts(contacts, alert_type, at);
    }

    let ignore_availability = severity == Severity::Critical || level >= 2;

    let mut selected: Vec<Contact> = contacts
        .iter()
        .filter(|c| {
            c.is_active
                && !c.enabled_channels().is_empty()
                && (ignore_availability || c.is_available_at(at))
        })
        .cloned()
        .collect();
    sort_selection(&mut selected);
    selected
}

/// SOS selection: every active contact with a usable channel, regardless of
/// category opt-in and availability.
pub fn select_for_sos(contacts: &[Contact]) -> Vec<Contact> {
    let mut selected: Vec<Contact> = contacts
        .iter()
        .filter(|c| c.is_active && !c.enabled_channels().is_empty())
        .cloned()
        .collect();
    sort_selection(&mut selected);
    selected
}

fn sort_selection(contacts: &mut [Contact]) {
    contacts.sort_by(|a, b| {
        b.is_primary
            .cmp(&a.is_primary)
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn contact(id: &str, name: &str, primary: bool) -> Contact {
        Contact {
            id: id.to_string(),
            subject_id: "subject-1".to_string(),
            name: name.to_string(),
            contact_type: ContactType::FamilyMember,
            email: Some(format!("{id}@example.com")),
            phone: Some("+15550001111".to_string()),
            push_token: None,
            notification_preferences: NotificationPreferences {
                sms: ChannelPreference {
                    enabled: true,
                    frequency: Frequency::Immediate,
                },
                ..Default::default()
            },
            alert_types: vec![AlertType::Fall, AlertType::Sos],
            is_active: true,
            is_primary: primary,
            availability: Availability::new(),
        }
    }

    // 2024-01-15 is a Monday.
    fn monday_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_selection_filters_and_orders() {
        let mut anna = contact("c1", "Anna", false);
        anna.is_primary = false;
        let bea = contact("c2", "Bea", true);
        let mut carl = contact("c3", "Carl", false);
        carl.is_active = false;
        let mut dora = contact("c4", "Dora", false);
        dora.alert_types = vec![AlertType::Wellness];
        let mut edna = contact("c5", "Edna", false);
        edna.notification_preferences = NotificationPreferences::default();

        let contacts = vec![anna, bea, carl, dora, edna];
        let selected = select_contacts(&contacts, AlertType::Fall, monday_noon());

        // Carl inactive, Dora wrong category, Edna no channels
        let names: Vec<&str> = selected.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Bea", "Anna"]); // primary first, then name
    }

    #[test]
    fn test_availability_window_covers_time() {
        let mut c = contact("c1", "Anna", false);
        c.availability.insert(
            "monday".to_string(),
            DayWindow {
                available: true,
                start: Some("09:00".to_string()),
                end: Some("17:00".to_string()),
            },
        );

        assert!(c.is_available_at(monday_noon()));
        let early = Utc.with_ymd_and_hms(2024, 1, 15, 7, 0, 0).unwrap();
        assert!(!c.is_available_at(early));
        let late = Utc.with_ymd_and_hms(2024, 1, 15, 20, 0, 0).unwrap();
        assert!(!c.is_available_at(late));
    }

    #[test]
    fn test_missing_window_means_all_day() {
        let c = contact("c1", "Anna", false);
        assert!(c.is_available_at(monday_noon()));
    }

    #[test]
    fn test_missing_times_mean_all_day() {
        let mut c = contact("c1", "Anna", false);
        c.availability.insert(
            "monday".to_string(),
            DayWindow {
                available: true,
                start: None,
                end: None,
            },
        );
        assert!(c.is_available_at(monday_noon()));
    }

    #[test]
    fn test_unavailable_day_excludes_contact() {
        let mut c = contact("c1", "Anna", false);
        c.availability.insert(
            "monday".to_string(),
            DayWindow {
                available: false,
                start: Some("00:00".to_string()),
                end: Some("23:59".to_string()),
            },
        );
        assert!(!c.is_available_at(monday_noon()));

        let selected = select_contacts(&[c], AlertType::Fall, monday_noon());
        assert!(selected.is_empty());
    }

    #[test]
    fn test_escalation_widens_past_category_filter() {
        let mut anna = contact("c1", "Anna", false);
        anna.alert_types = vec![AlertType::Wellness]; // not opted into falls

        let base = select_contacts(std::slice::from_ref(&anna), AlertType::Fall, monday_noon());
        assert!(base.is_empty());

        let widened = select_for_escalation(
            std::slice::from_ref(&anna),
            AlertType::Fall,
            Severity::High,
            1,
            monday_noon(),
        );
        assert_eq!(widened.len(), 1);
    }

    #[test]
    fn test_escalation_ignores_availability_for_critical() {
        let mut anna = contact("c1", "Anna", false);
        anna.availability.insert(
            "monday".to_string(),
            DayWindow {
                available: false,
                start: None,
                end: None,
            },
        );

        let high = select_for_escalation(
            std::slice::from_ref(&anna),
            AlertType::Fall,
            Severity::High,
            1,
            monday_noon(),
        );
        assert!(high.is_empty());

        let critical = select_for_escalation(
            std::slice::from_ref(&anna),
            AlertType::Fall,
            Severity::Critical,
            1,
            monday_noon(),
        );
        assert_eq!(critical.len(), 1);

        let deep = select_for_escalation(
            std::slice::from_ref(&anna),
            AlertType::Fall,
            Severity::High,
            2,
            monday_noon(),
        );
        assert_eq!(deep.len(), 1);
    }

    #[test]
    fn test_sos_selects_all_active_contacts() {
        let mut anna = contact("c1", "Anna", false);
        anna.alert_types = vec![]; // opted out of everything
        anna.availability.insert(
            "monday".to_string(),
            DayWindow {
                available: false,
                start: None,
                end: None,
            },
        );
        let mut bob = contact("c2", "Bob", false);
        bob.is_active = false;

        let selected = select_for_sos(&[anna, bob]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "Anna");
    }

    #[test]
    fn test_enabled_channels() {
        let mut c = contact("c1", "Anna", false);
        c.notification_preferences.email.enabled = true;
        c.notification_preferences.push.enabled = true;

        let channels = c.enabled_channels();
        assert_eq!(channels, vec![Channel::Sms, Channel::Push, Channel::Email]);
    }
}
