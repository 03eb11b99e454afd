use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "access_action", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessAction {
    Grant,
    Revoke,
    ManualExtend,
    ManualRevoke,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "performed_by", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerformedBy {
    System,
    Client,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccessControlLog {
    pub id: Uuid,
    pub subscriber_id: Uuid,
    pub bot_id: Uuid,
    pub action: AccessAction,
    pub performed_by: PerformedBy,
    pub performer_id: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAccessLog {
    pub subscriber_id: Uuid,
    pub bot_id: Uuid,
    pub action: AccessAction,
    pub performed_by: PerformedBy,
    pub performer_id: Option<String>,
    pub reason: Option<String>,
}

impl NewAccessLog {
    pub fn system(subscriber_id: Uuid, bot_id: Uuid, action: AccessAction, reason: impl Into<String>) -> Self {
        Self {
            subscriber_id,
            bot_id,
            action,
            performed_by: PerformedBy::System,
            performer_id: None,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "recipient_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecipientType {
    Client,
    Subscriber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notification_kind", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    TrialReminder,
    RenewalReminder,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationLog {
    pub id: Uuid,
    pub recipient_type: RecipientType,
    pub recipient_id: Uuid,
    pub notification_kind: NotificationKind,
    pub days_remaining: Option<i32>,
    pub success: bool,
    pub error_message: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotificationLog {
    pub recipient_type: RecipientType,
    pub recipient_id: Uuid,
    pub notification_kind: NotificationKind,
    pub days_remaining: Option<i32>,
    pub success: bool,
    pub error_message: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Key of the "was this reminder already sent" lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReminderKey {
    pub recipient_type: RecipientType,
    pub recipient_id: Uuid,
    pub notification_kind: NotificationKind,
    pub days_remaining: i32,
}
