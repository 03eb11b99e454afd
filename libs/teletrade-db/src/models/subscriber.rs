use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::bot::SellingBot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    PendingPayment,
    Active,
    Expired,
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscriber {
    pub id: Uuid,
    pub telegram_user_id: i64,
    pub username: Option<String>,
    pub bot_id: Uuid,
    pub subscription_status: SubscriptionStatus,
    pub subscription_start_date: Option<DateTime<Utc>>,
    pub subscription_end_date: Option<DateTime<Utc>>,
    pub subscription_plan_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscriber {
    /// ACTIVE with an end date strictly after `now`.
    pub fn has_access_at(&self, now: DateTime<Utc>) -> bool {
        self.subscription_status == SubscriptionStatus::Active
            && self.subscription_end_date.is_some_and(|end| end > now)
    }
}

/// A subscriber joined with the selling bot it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberWithBot {
    pub subscriber: Subscriber,
    pub bot: SellingBot,
}
