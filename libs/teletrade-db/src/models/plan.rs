use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "plan_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanType {
    /// Sold by the platform to clients.
    Platform,
    /// Sold by a client's selling bot to its subscribers.
    Client,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub plan_type: PlanType,
    pub bot_id: Option<Uuid>,
    pub name: String,
    pub duration_days: i32,
    pub price_amount: f64,
    pub price_currency: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPlan {
    pub plan_type: PlanType,
    /// Required for CLIENT plans, absent for PLATFORM plans.
    pub bot_id: Option<Uuid>,
    pub name: String,
    pub duration_days: i32,
    pub price_amount: f64,
    pub price_currency: String,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanChanges {
    pub name: Option<String>,
    pub duration_days: Option<i32>,
    pub price_amount: Option<f64>,
    pub price_currency: Option<String>,
}

impl PlanChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.duration_days.is_none() && self.price_amount.is_none() && self.price_currency.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PlanFilter {
    pub plan_type: Option<PlanType>,
    pub bot_id: Option<Uuid>,
    /// Deactivated plans are hidden unless set.
    #[serde(default)]
    pub include_inactive: bool,
}

impl PlanFilter {
    pub fn matches(&self, plan: &SubscriptionPlan) -> bool {
        self.plan_type.is_none_or(|t| t == plan.plan_type)
            && self.bot_id.is_none_or(|id| plan.bot_id == Some(id))
            && (self.include_inactive || plan.is_active)
    }
}
