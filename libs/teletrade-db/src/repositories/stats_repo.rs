use sqlx::PgPool;
use anyhow::{Context, Result};
use crate::models::bot::BotStatus;
use crate::models::client::ClientStatus;
use crate::models::stats::PlatformStats;
use crate::models::subscriber::SubscriptionStatus;

#[derive(Debug, Clone)]
pub struct StatsRepository {
    pool: PgPool,
}

impl StatsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn snapshot(&self) -> Result<PlatformStats> {
        let clients = sqlx::query_as::<_, (ClientStatus, i64)>("SELECT status, COUNT(*) FROM clients GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .context("Failed to count clients")?;
        let bots = sqlx::query_as::<_, (BotStatus, i64)>("SELECT status, COUNT(*) FROM selling_bots GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .context("Failed to count selling bots")?;
        let subscribers = sqlx::query_as::<_, (SubscriptionStatus, i64)>(
            "SELECT subscription_status, COUNT(*) FROM subscribers GROUP BY subscription_status"
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to count subscribers")?;
        let active_plans = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM subscription_plans WHERE is_active")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count plans")?;
        let revenue = sqlx::query_as::<_, (String, i64, f64)>(
            "SELECT currency, COUNT(*), COALESCE(SUM(amount), 0) FROM payment_transactions
             WHERE payment_status = 'CONFIRMED' GROUP BY currency"
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to sum confirmed payments")?;

        Ok(PlatformStats {
            clients: clients.into_iter().collect(),
            bots: bots.into_iter().collect(),
            subscribers: subscribers.into_iter().collect(),
            active_plans,
            confirmed_payments: revenue.iter().map(|(_, count, _)| count).sum(),
            revenue: revenue.into_iter().map(|(currency, _, sum)| (currency, sum)).collect(),
        })
    }
}
