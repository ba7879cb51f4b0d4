//! SQLite storage layer for Vigil.
//!
//! Persists the Alert aggregate (row plus ledger and history tables) and the
//! contact directory. Two access patterns matter for correctness:
//!
//! - Lifecycle transitions load the full aggregate, run the state-machine
//!   method, and persist the result in one UPDATE. The UPDATE is guarded
//!   against rows already resolved, so a request holding a stale aggregate
//!   can never overwrite a resolve committed in the meantime.
//! - Notification ledger and escalation-history writes are row-scoped SQL:
//!   appends are guarded against resolved alerts inside the statement, and
//!   status updates target the single most recent matching row. Concurrent
//!   channel tasks touching the same alert therefore never read-modify-write
//!   each other's data.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::alert::{Alert, AlertParts, EscalationRecord, NotificationEntry};
use crate::contact::Contact;
use crate::error::CoreError;
use crate::model::{AlertStatus, Channel, NotificationStatus};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:vigil.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                subject_id TEXT NOT NULL,
                session_id TEXT,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                priority INTEGER NOT NULL,
                status TEXT NOT NULL,
                message TEXT NOT NULL,
                location TEXT,
                created_at INTEGER NOT NULL,
                acknowledged_at INTEGER,
                acknowledged_by TEXT,
                resolved_at INTEGER,
                resolved_by TEXT,
                escalation_level INTEGER NOT NULL,
                auto_resolve INTEGER NOT NULL,
                auto_resolve_after_minutes INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                alert_id TEXT NOT NULL,
                contact_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                sent_at INTEGER,
                last_attempt_at INTEGER,
                response TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS escalations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                alert_id TEXT NOT NULL,
                level INTEGER NOT NULL,
                ts INTEGER NOT NULL,
                channel TEXT NOT NULL,
                contact_id TEXT NOT NULL,
                outcome TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                subject_id TEXT NOT NULL,
                name TEXT NOT NULL,
                contact_type TEXT NOT NULL,
                email TEXT,
                phone TEXT,
                push_token TEXT,
                preferences TEXT NOT NULL,
                alert_types TEXT NOT NULL,
                is_active INTEGER NOT NULL,
                is_primary INTEGER NOT NULL,
                availability TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_alerts_subject_status
            ON alerts(subject_id, status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_notifications_alert
            ON notifications(alert_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_escalations_alert
            ON escalations(alert_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------------

    /// Insert a freshly created alert row.
    pub async fn insert_alert(&self, alert: &Alert) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO alerts (
                id, subject_id, session_id, alert_type, severity, priority,
                status, message, location, created_at, acknowledged_at,
                acknowledged_by, resolved_at, resolved_by, escalation_level,
                auto_resolve, auto_resolve_after_minutes
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.id())
        .bind(alert.subject_id())
        .bind(alert.session_id())
        .bind(alert.alert_type().as_str())
        .bind(alert.severity().as_str())
        .bind(alert.priority())
        .bind(alert.status().as_str())
        .bind(alert.message())
        .bind(alert.location())
        .bind(alert.created_at().timestamp())
        .bind(alert.acknowledged_at().map(|t| t.timestamp()))
        .bind(alert.acknowledged_by())
        .bind(alert.resolved_at().map(|t| t.timestamp()))
        .bind(alert.resolved_by())
        .bind(alert.escalation_level())
        .bind(i64::from(alert.auto_resolve()))
        .bind(alert.auto_resolve_after_minutes())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load the full aggregate: alert row, notification ledger, escalation history.
    pub async fn get_alert(&self, id: &str) -> Result<Alert, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, subject_id, session_id, alert_type, severity, priority,
                   status, message, location, created_at, acknowledged_at,
                   acknowledged_by, resolved_at, resolved_by, escalation_level,
                   auto_resolve, auto_resolve_after_minutes
            FROM alerts
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("alert '{id}'")))?;

        let notifications = self.load_notifications(id).await?;
        let escalation_history = self.load_escalations(id).await?;

        let parts = AlertParts {
            id: row.get("id"),
            subject_id: row.get("subject_id"),
            session_id: row.get("session_id"),
            alert_type: parse_column(row.get::<String, _>("alert_type").as_str())?,
            severity: parse_column(row.get::<String, _>("severity").as_str())?,
            priority: row.get("priority"),
            status: parse_column(row.get::<String, _>("status").as_str())?,
            message: row.get("message"),
            location: row.get("location"),
            created_at: datetime_from(row.get("created_at")),
            acknowledged_at: row.get::<Option<i64>, _>("acknowledged_at").map(datetime_from),
            acknowledged_by: row.get("acknowledged_by"),
            resolved_at: row.get::<Option<i64>, _>("resolved_at").map(datetime_from),
            resolved_by: row.get("resolved_by"),
            escalation_level: row.get("escalation_level"),
            escalation_history,
            notifications,
            auto_resolve: row.get::<i64, _>("auto_resolve") != 0,
            auto_resolve_after_minutes: row.get("auto_resolve_after_minutes"),
        };

        Ok(Alert::from_parts(parts))
    }

    /// List alerts, optionally filtered by subject and status. Newest first.
    pub async fn list_alerts(
        &self,
        subject_id: Option<&str>,
        status: Option<AlertStatus>,
    ) -> Result<Vec<Alert>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM alerts
            WHERE (? IS NULL OR subject_id = ?)
              AND (? IS NULL OR status = ?)
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(subject_id)
        .bind(subject_id)
        .bind(status.map(|s| s.as_str()))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        let mut alerts = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            alerts.push(self.get_alert(&id).await?);
        }
        Ok(alerts)
    }

    /// IDs of all alerts that are not resolved, for the periodic sweep.
    pub async fn open_alert_ids(&self) -> Result<Vec<String>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM alerts
            WHERE status != 'resolved'
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    /// Persist the lifecycle fields after an aggregate mutation.
    ///
    /// Guarded in SQL: the UPDATE only lands on a row that is not yet
    /// resolved, so a request that loaded the aggregate before a concurrent
    /// resolve committed cannot revert the terminal state. Persisting the
    /// resolve itself passes the guard, since the row is still open at that
    /// point; a second resolve loses the race and gets [`CoreError::AlreadyResolved`].
    pub async fn persist_lifecycle(&self, alert: &Alert) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET severity = ?, priority = ?, status = ?,
                acknowledged_at = ?, acknowledged_by = ?,
                resolved_at = ?, resolved_by = ?, escalation_level = ?
            WHERE id = ? AND status != 'resolved'
            "#,
        )
        .bind(alert.severity().as_str())
        .bind(alert.priority())
        .bind(alert.status().as_str())
        .bind(alert.acknowledged_at().map(|t| t.timestamp()))
        .bind(alert.acknowledged_by())
        .bind(alert.resolved_at().map(|t| t.timestamp()))
        .bind(alert.resolved_by())
        .bind(alert.escalation_level())
        .bind(alert.id())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.closed_or_missing(alert.id()).await?);
        }
        Ok(())
    }

    /// Append one escalation-history entry.
    ///
    /// Guarded like [`Storage::append_notification`]: the insert only lands
    /// if the alert exists and is not resolved, so a stale escalate can never
    /// extend the history of a closed alert.
    pub async fn append_escalation(
        &self,
        alert_id: &str,
        record: &EscalationRecord,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO escalations (alert_id, level, ts, channel, contact_id, outcome)
            SELECT ?, ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM alerts WHERE id = ? AND status != 'resolved')
            "#,
        )
        .bind(alert_id)
        .bind(record.level)
        .bind(record.timestamp.timestamp())
        .bind(record.channel.as_str())
        .bind(&record.contact_id)
        .bind(&record.outcome)
        .bind(alert_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.closed_or_missing(alert_id).await?);
        }
        Ok(())
    }

    /// Append a pending notification ledger entry.
    ///
    /// The insert is guarded in SQL: it only lands if the alert exists and is
    /// not resolved, so a late channel task can never add to a closed alert.
    pub async fn append_notification(
        &self,
        alert_id: &str,
        contact_id: &str,
        channel: Channel,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (alert_id, contact_id, channel, status, attempts)
            SELECT ?, ?, ?, 'pending', 0
            WHERE EXISTS (SELECT 1 FROM alerts WHERE id = ? AND status != 'resolved')
            "#,
        )
        .bind(alert_id)
        .bind(contact_id)
        .bind(channel.as_str())
        .bind(alert_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.closed_or_missing(alert_id).await?);
        }
        Ok(())
    }

    /// Distinguish the two reasons a guarded write matched no open row.
    async fn closed_or_missing(&self, alert_id: &str) -> Result<CoreError, CoreError> {
        let exists = sqlx::query("SELECT 1 FROM alerts WHERE id = ?")
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        Ok(if exists {
            CoreError::AlreadyResolved
        } else {
            CoreError::NotFound(format!("alert '{alert_id}'"))
        })
    }

    /// Update the most recent ledger entry matching `(contact_id, channel)`.
    ///
    /// Mirrors the aggregate semantics: `attempts` grows only on failure,
    /// `last_attempt_at` is always stamped, `sent_at` is stamped on the first
    /// transition to sent, and the response is stored verbatim when given.
    pub async fn update_notification_status(
        &self,
        alert_id: &str,
        contact_id: &str,
        channel: Channel,
        status: NotificationStatus,
        response: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = ?,
                attempts = attempts + (CASE WHEN ? = 'failed' THEN 1 ELSE 0 END),
                last_attempt_at = ?,
                sent_at = CASE WHEN ? = 'sent' AND sent_at IS NULL THEN ? ELSE sent_at END,
                response = COALESCE(?, response)
            WHERE id = (
                SELECT id FROM notifications
                WHERE alert_id = ? AND contact_id = ? AND channel = ?
                ORDER BY id DESC
                LIMIT 1
            )
            "#,
        )
        .bind(status.as_str())
        .bind(status.as_str())
        .bind(now.timestamp())
        .bind(status.as_str())
        .bind(now.timestamp())
        .bind(response)
        .bind(alert_id)
        .bind(contact_id)
        .bind(channel.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!(
                "no notification for contact '{contact_id}' on channel '{channel}' of alert '{alert_id}'"
            )));
        }
        Ok(())
    }

    async fn load_notifications(&self, alert_id: &str) -> Result<Vec<NotificationEntry>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT contact_id, channel, status, attempts, sent_at, last_attempt_at, response
            FROM notifications
            WHERE alert_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(alert_id)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(NotificationEntry {
                contact_id: row.get("contact_id"),
                channel: parse_column(row.get::<String, _>("channel").as_str())?,
                status: parse_column(row.get::<String, _>("status").as_str())?,
                attempts: row.get("attempts"),
                sent_at: row.get::<Option<i64>, _>("sent_at").map(datetime_from),
                last_attempt_at: row.get::<Option<i64>, _>("last_attempt_at").map(datetime_from),
                response: row.get("response"),
            });
        }
        Ok(entries)
    }

    async fn load_escalations(&self, alert_id: &str) -> Result<Vec<EscalationRecord>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT level, ts, channel, contact_id, outcome
            FROM escalations
            WHERE alert_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(alert_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(EscalationRecord {
                level: row.get("level"),
                timestamp: datetime_from(row.get("ts")),
                channel: parse_column(row.get::<String, _>("channel").as_str())?,
                contact_id: row.get("contact_id"),
                outcome: row.get("outcome"),
            });
        }
        Ok(records)
    }

    // ------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------

    /// Insert or replace a contact.
    ///
    /// Enforces the primary-contact invariant: at most one primary contact
    /// per `(subject_id, contact_type)` pair. Inserting a new primary demotes
    /// any existing one.
    pub async fn upsert_contact(&self, contact: &Contact) -> Result<(), CoreError> {
        if contact.is_primary {
            sqlx::query(
                r#"
                UPDATE contacts SET is_primary = 0
                WHERE subject_id = ? AND contact_type = ? AND id != ?
                "#,
            )
            .bind(&contact.subject_id)
            .bind(contact.contact_type.as_str())
            .bind(&contact.id)
            .execute(&self.pool)
            .await?;
        }

        let preferences = encode_json(&contact.notification_preferences)?;
        let alert_types = encode_json(&contact.alert_types)?;
        let availability = encode_json(&contact.availability)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO contacts (
                id, subject_id, name, contact_type, email, phone, push_token,
                preferences, alert_types, is_active, is_primary, availability
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&contact.id)
        .bind(&contact.subject_id)
        .bind(&contact.name)
        .bind(contact.contact_type.as_str())
        .bind(&contact.email)
        .bind(&contact.phone)
        .bind(&contact.push_token)
        .bind(preferences)
        .bind(alert_types)
        .bind(i64::from(contact.is_active))
        .bind(i64::from(contact.is_primary))
        .bind(availability)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All contacts in a subject's care network.
    pub async fn contacts_for_subject(&self, subject_id: &str) -> Result<Vec<Contact>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, subject_id, name, contact_type, email, phone, push_token,
                   preferences, alert_types, is_active, is_primary, availability
            FROM contacts
            WHERE subject_id = ?
            ORDER BY name ASC
            "#,
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        let mut contacts = Vec::with_capacity(rows.len());
        for row in rows {
            contacts.push(Contact {
                id: row.get("id"),
                subject_id: row.get("subject_id"),
                name: row.get("name"),
                contact_type: parse_column(row.get::<String, _>("contact_type").as_str())?,
                email: row.get("email"),
                phone: row.get("phone"),
                push_token: row.get("push_token"),
                notification_preferences: decode_json(row.get::<String, _>("preferences").as_str())?,
                alert_types: decode_json(row.get::<String, _>("alert_types").as_str())?,
                is_active: row.get::<i64, _>("is_active") != 0,
                is_primary: row.get::<i64, _>("is_primary") != 0,
                availability: decode_json(row.get::<String, _>("availability").as_str())?,
            });
        }
        Ok(contacts)
    }
}

/// Unix seconds to UTC. Values come from our own writes, so out-of-range
/// seconds fall back to the epoch rather than panicking.
fn datetime_from(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}

fn parse_column<T>(s: &str) -> Result<T, CoreError>
where
    T: std::str::FromStr<Err = String>,
{
    s.parse().map_err(CoreError::Validation)
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, CoreError> {
    serde_json::to_string(value).map_err(|e| CoreError::Validation(e.to_string()))
}

fn decode_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, CoreError> {
    serde_json::from_str(s).map_err(|e| CoreError::Validation(e.to_string()))
}
