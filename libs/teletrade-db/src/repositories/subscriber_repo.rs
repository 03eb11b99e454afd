use std::collections::HashMap;

use sqlx::PgPool;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;
use crate::models::bot::SellingBot;
use crate::models::payment::manual_extension_end;
use crate::models::subscriber::{Subscriber, SubscriberWithBot, SubscriptionStatus};

#[derive(Debug, Clone)]
pub struct SubscriberRepository {
    pool: PgPool,
}

impl SubscriberRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Subscriber>> {
        sqlx::query_as::<_, Subscriber>("SELECT * FROM subscribers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch subscriber")
    }

    pub async fn list_for_bot(&self, bot_id: Uuid, status: Option<SubscriptionStatus>) -> Result<Vec<Subscriber>> {
        sqlx::query_as::<_, Subscriber>(
            "SELECT * FROM subscribers
             WHERE bot_id = $1 AND ($2::subscription_status IS NULL OR subscription_status = $2)
             ORDER BY created_at"
        )
        .bind(bot_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list subscribers of bot")
    }

    pub async fn get_with_bot(&self, id: Uuid) -> Result<Option<SubscriberWithBot>> {
        let Some(subscriber) = self.get_by_id(id).await? else {
            return Ok(None);
        };
        Ok(self.attach_bots(vec![subscriber]).await?.pop())
    }

    pub async fn get_by_bot_and_user(&self, bot_id: Uuid, telegram_user_id: i64) -> Result<Option<Subscriber>> {
        sqlx::query_as::<_, Subscriber>("SELECT * FROM subscribers WHERE bot_id = $1 AND telegram_user_id = $2")
            .bind(bot_id)
            .bind(telegram_user_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch subscriber by bot and user")
    }

    pub async fn get_expired_active(&self, now: DateTime<Utc>) -> Result<Vec<SubscriberWithBot>> {
        let subs = sqlx::query_as::<_, Subscriber>(
            "SELECT * FROM subscribers WHERE subscription_status = 'ACTIVE' AND subscription_end_date < $1 ORDER BY subscription_end_date"
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch expired subscribers")?;
        self.attach_bots(subs).await
    }

    /// ACTIVE subscribers whose window ends in `[from, to)`.
    pub async fn get_ending_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<SubscriberWithBot>> {
        let subs = sqlx::query_as::<_, Subscriber>(
            "SELECT * FROM subscribers WHERE subscription_status = 'ACTIVE' AND subscription_end_date >= $1 AND subscription_end_date < $2"
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch subscribers ending in window")?;
        self.attach_bots(subs).await
    }

    /// ACTIVE -> EXPIRED, only while the window is still over. A subscriber
    /// extended since it was read is left alone.
    pub async fn expire_if_lapsed(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE subscribers SET subscription_status = 'EXPIRED', updated_at = $2
            WHERE id = $1 AND subscription_status = 'ACTIVE' AND subscription_end_date < $2
            "#
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to expire subscriber")?;
        Ok(res.rows_affected() == 1)
    }

    /// Sets the window end to `max(end, now) + days` and the status to ACTIVE.
    pub async fn extend(&self, id: Uuid, days: i64, now: DateTime<Utc>) -> Result<Option<Subscriber>> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let current = sqlx::query_as::<_, Subscriber>("SELECT * FROM subscribers WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to lock subscriber")?;
        let Some(current) = current else {
            return Ok(None);
        };

        let end = manual_extension_end(now, current.subscription_end_date, days);
        let updated = sqlx::query_as::<_, Subscriber>(
            r#"
            UPDATE subscribers
            SET subscription_status = 'ACTIVE',
                subscription_start_date = COALESCE(subscription_start_date, $2),
                subscription_end_date = $3,
                updated_at = $2
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(id)
        .bind(now)
        .bind(end)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to extend subscriber")?;

        tx.commit().await.context("Failed to commit extension")?;
        Ok(Some(updated))
    }

    pub async fn revoke(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Subscriber>> {
        sqlx::query_as::<_, Subscriber>(
            "UPDATE subscribers SET subscription_status = 'REVOKED', updated_at = $2 WHERE id = $1 RETURNING *"
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to revoke subscriber")
    }

    async fn attach_bots(&self, subs: Vec<Subscriber>) -> Result<Vec<SubscriberWithBot>> {
        if subs.is_empty() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<Uuid> = subs.iter().map(|s| s.bot_id).collect();
        ids.sort_unstable();
        ids.dedup();

        let bots: HashMap<Uuid, SellingBot> = sqlx::query_as::<_, SellingBot>("SELECT * FROM selling_bots WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch bots for subscribers")?
            .into_iter()
            .map(|b| (b.id, b))
            .collect();

        Ok(subs
            .into_iter()
            .filter_map(|subscriber| match bots.get(&subscriber.bot_id) {
                Some(bot) => Some(SubscriberWithBot { bot: bot.clone(), subscriber }),
                None => {
                    warn!(subscriber_id = %subscriber.id, bot_id = %subscriber.bot_id, "Subscriber references a missing bot");
                    None
                }
            })
            .collect())
    }
}
