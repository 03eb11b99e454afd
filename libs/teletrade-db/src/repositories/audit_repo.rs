use sqlx::PgPool;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::models::audit::{AccessControlLog, NewAccessLog, NewNotificationLog, ReminderKey};

/// Append-only access and notification logs.
#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn log_access(&self, entry: &NewAccessLog, now: DateTime<Utc>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO access_control_logs (id, subscriber_id, bot_id, action, performed_by, performer_id, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#
        )
        .bind(id)
        .bind(entry.subscriber_id)
        .bind(entry.bot_id)
        .bind(entry.action)
        .bind(entry.performed_by)
        .bind(&entry.performer_id)
        .bind(&entry.reason)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to write access control log")?;
        Ok(id)
    }

    pub async fn access_logs_for(&self, subscriber_id: Uuid) -> Result<Vec<AccessControlLog>> {
        sqlx::query_as::<_, AccessControlLog>(
            "SELECT * FROM access_control_logs WHERE subscriber_id = $1 ORDER BY created_at DESC"
        )
        .bind(subscriber_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch access control logs")
    }

    pub async fn log_notification(&self, entry: &NewNotificationLog) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO notification_logs (id, recipient_type, recipient_id, notification_kind, days_remaining, success, error_message, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#
        )
        .bind(id)
        .bind(entry.recipient_type)
        .bind(entry.recipient_id)
        .bind(entry.notification_kind)
        .bind(entry.days_remaining)
        .bind(entry.success)
        .bind(&entry.error_message)
        .bind(entry.sent_at)
        .execute(&self.pool)
        .await
        .context("Failed to write notification log")?;
        Ok(id)
    }

    /// Whether any attempt for this reminder was logged at or after `since`.
    pub async fn notification_sent_since(&self, key: &ReminderKey, since: DateTime<Utc>) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM notification_logs
                WHERE recipient_type = $1 AND recipient_id = $2 AND notification_kind = $3
                  AND days_remaining = $4 AND sent_at >= $5
            )
            "#
        )
        .bind(key.recipient_type)
        .bind(key.recipient_id)
        .bind(key.notification_kind)
        .bind(key.days_remaining)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check notification log")
    }
}
