use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "client_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientStatus {
    Pending,
    Trial,
    Active,
    Expired,
    Suspended,
}

impl ClientStatus {
    /// Allowed edges of the client lifecycle. `Active -> Active` is a platform
    /// renewal and counts as a valid move.
    pub fn can_transition_to(self, next: ClientStatus) -> bool {
        use ClientStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, Suspended)
                | (Pending, Trial)
                | (Trial, Active)
                | (Trial, Expired)
                | (Trial, Suspended)
                | (Active, Active)
                | (Active, Expired)
                | (Active, Suspended)
                | (Expired, Active)
        )
    }

    /// Statuses a confirmed platform payment may lift to ACTIVE.
    pub fn accepts_platform_payment(self) -> bool {
        self.can_transition_to(ClientStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClientStatus::Pending => "PENDING",
            ClientStatus::Trial => "TRIAL",
            ClientStatus::Active => "ACTIVE",
            ClientStatus::Expired => "EXPIRED",
            ClientStatus::Suspended => "SUSPENDED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub id: Uuid,
    pub telegram_user_id: i64,
    pub username: Option<String>,
    pub business_name: String,
    pub status: ClientStatus,
    pub trial_activated: bool,
    pub trial_start_date: Option<DateTime<Utc>>,
    pub trial_end_date: Option<DateTime<Utc>>,
    pub platform_subscription_plan_id: Option<Uuid>,
    pub platform_subscription_start: Option<DateTime<Utc>>,
    pub platform_subscription_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Client {
    /// Whether the window the current status depends on has run out: the
    /// trial for TRIAL, the paid platform window for ACTIVE. Clients approved
    /// without a platform window never lapse.
    pub fn window_lapsed(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ClientStatus::Trial => self.trial_end_date.is_some_and(|end| end < now),
            ClientStatus::Active => self.platform_subscription_end.is_some_and(|end| end < now),
            _ => false,
        }
    }
}
