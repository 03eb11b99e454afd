use std::sync::Arc;

use chrono::{DateTime, Utc};
use teletrade_db::LedgerStore;
use teletrade_db::models::bot::BotStatus;
use teletrade_db::models::plan::{NewPlan, PlanChanges, PlanFilter, PlanType, SubscriptionPlan};
use tracing::info;
use uuid::Uuid;

use super::ServiceError;

/// Subscription plan administration. Plans are deactivated, never deleted.
pub struct CatalogService {
    ledger: Arc<dyn LedgerStore>,
}

fn check_terms(name: Option<&str>, duration_days: Option<i32>, price: Option<f64>, currency: Option<&str>) -> Result<(), ServiceError> {
    if name.is_some_and(|n| n.trim().is_empty()) {
        return Err(ServiceError::InvalidInput("plan name must not be empty".into()));
    }
    if duration_days.is_some_and(|d| d <= 0) {
        return Err(ServiceError::InvalidInput("duration_days must be positive".into()));
    }
    if price.is_some_and(|p| !p.is_finite() || p <= 0.0) {
        return Err(ServiceError::InvalidInput("price_amount must be positive".into()));
    }
    if currency.is_some_and(|c| c.trim().is_empty()) {
        return Err(ServiceError::InvalidInput("price_currency must not be empty".into()));
    }
    Ok(())
}

impl CatalogService {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    pub async fn plan(&self, id: Uuid) -> Result<SubscriptionPlan, ServiceError> {
        self.ledger
            .plan(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("plan {id}")))
    }

    pub async fn plans(&self, filter: &PlanFilter) -> Result<Vec<SubscriptionPlan>, ServiceError> {
        Ok(self.ledger.list_plans(filter).await?)
    }

    /// PLATFORM plans have no bot; CLIENT plans belong to an existing,
    /// non-deleted bot.
    pub async fn create_plan(&self, mut new: NewPlan, now: DateTime<Utc>) -> Result<SubscriptionPlan, ServiceError> {
        check_terms(Some(&new.name), Some(new.duration_days), Some(new.price_amount), Some(&new.price_currency))?;
        match (new.plan_type, new.bot_id) {
            (PlanType::Platform, Some(_)) => {
                return Err(ServiceError::InvalidInput("platform plans cannot belong to a bot".into()));
            }
            (PlanType::Client, None) => {
                return Err(ServiceError::InvalidInput("client plans need a bot_id".into()));
            }
            (PlanType::Client, Some(bot_id)) => {
                let bot = self
                    .ledger
                    .bot(bot_id)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("bot {bot_id}")))?;
                if bot.status == BotStatus::Deleted {
                    return Err(ServiceError::Conflict("bot is DELETED".into()));
                }
            }
            (PlanType::Platform, None) => {}
        }
        new.name = new.name.trim().to_string();
        new.price_currency = new.price_currency.trim().to_string();

        let plan = self.ledger.create_plan(&new, now).await?;
        info!(plan_id = %plan.id, plan_type = ?plan.plan_type, bot_id = ?plan.bot_id, "Plan created");
        Ok(plan)
    }

    /// Running subscriptions keep the terms they were bought with.
    pub async fn update_plan(&self, id: Uuid, mut changes: PlanChanges) -> Result<SubscriptionPlan, ServiceError> {
        if changes.is_empty() {
            return Err(ServiceError::InvalidInput("nothing to update".into()));
        }
        check_terms(
            changes.name.as_deref(),
            changes.duration_days,
            changes.price_amount,
            changes.price_currency.as_deref(),
        )?;
        changes.name = changes.name.map(|n| n.trim().to_string());
        changes.price_currency = changes.price_currency.map(|c| c.trim().to_string());

        let plan = self
            .ledger
            .update_plan(id, &changes)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("plan {id}")))?;
        info!(plan_id = %id, "Plan updated");
        Ok(plan)
    }

    /// Hides the plan from new purchases. Idempotent.
    pub async fn deactivate_plan(&self, id: Uuid) -> Result<SubscriptionPlan, ServiceError> {
        let plan = self
            .ledger
            .set_plan_active(id, false)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("plan {id}")))?;
        info!(plan_id = %id, "Plan deactivated");
        Ok(plan)
    }
}
