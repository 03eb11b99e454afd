use sqlx::PgPool;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::models::plan::{NewPlan, PlanChanges, PlanFilter, SubscriptionPlan};

#[derive(Debug, Clone)]
pub struct PlanRepository {
    pool: PgPool,
}

impl PlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<SubscriptionPlan>> {
        sqlx::query_as::<_, SubscriptionPlan>("SELECT * FROM subscription_plans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch subscription plan")
    }

    pub async fn list(&self, filter: &PlanFilter) -> Result<Vec<SubscriptionPlan>> {
        sqlx::query_as::<_, SubscriptionPlan>(
            "SELECT * FROM subscription_plans
             WHERE ($1::plan_type IS NULL OR plan_type = $1)
               AND ($2::uuid IS NULL OR bot_id = $2)
               AND ($3 OR is_active)
             ORDER BY created_at"
        )
        .bind(filter.plan_type)
        .bind(filter.bot_id)
        .bind(filter.include_inactive)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list subscription plans")
    }

    pub async fn create(&self, new: &NewPlan, now: DateTime<Utc>) -> Result<SubscriptionPlan> {
        sqlx::query_as::<_, SubscriptionPlan>(
            "INSERT INTO subscription_plans (id, plan_type, bot_id, name, duration_days, price_amount, price_currency, is_active, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, $8) RETURNING *"
        )
        .bind(Uuid::new_v4())
        .bind(new.plan_type)
        .bind(new.bot_id)
        .bind(&new.name)
        .bind(new.duration_days)
        .bind(new.price_amount)
        .bind(&new.price_currency)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create subscription plan")
    }

    /// `None` when the plan does not exist.
    pub async fn update(&self, id: Uuid, changes: &PlanChanges) -> Result<Option<SubscriptionPlan>> {
        sqlx::query_as::<_, SubscriptionPlan>(
            "UPDATE subscription_plans SET
                name = COALESCE($2, name),
                duration_days = COALESCE($3, duration_days),
                price_amount = COALESCE($4, price_amount),
                price_currency = COALESCE($5, price_currency)
             WHERE id = $1 RETURNING *"
        )
        .bind(id)
        .bind(changes.name.as_deref())
        .bind(changes.duration_days)
        .bind(changes.price_amount)
        .bind(changes.price_currency.as_deref())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update subscription plan")
    }

    /// Plans are never deleted: payments and subscribers keep pointing at them.
    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<Option<SubscriptionPlan>> {
        sqlx::query_as::<_, SubscriptionPlan>("UPDATE subscription_plans SET is_active = $2 WHERE id = $1 RETURNING *")
            .bind(id)
            .bind(active)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to toggle subscription plan")
    }
}
