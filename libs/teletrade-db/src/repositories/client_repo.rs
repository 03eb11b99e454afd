use sqlx::PgPool;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;
use crate::models::client::{Client, ClientStatus};
use super::bot_repo::pause_client_bots;

#[derive(Debug, Clone)]
pub struct ClientRepository {
    pool: PgPool,
}

impl ClientRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Client>> {
        sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch client")
    }

    pub async fn list(&self, status: Option<ClientStatus>) -> Result<Vec<Client>> {
        sqlx::query_as::<_, Client>(
            "SELECT * FROM clients WHERE ($1::client_status IS NULL OR status = $1) ORDER BY created_at"
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list clients")
    }

    pub async fn get_expired_trials(&self, now: DateTime<Utc>) -> Result<Vec<Client>> {
        sqlx::query_as::<_, Client>(
            "SELECT * FROM clients WHERE status = 'TRIAL' AND trial_end_date < $1 ORDER BY trial_end_date"
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch expired trials")
    }

    /// TRIAL clients whose trial ends in `[from, to)`.
    pub async fn get_trials_ending_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Client>> {
        sqlx::query_as::<_, Client>(
            "SELECT * FROM clients WHERE status = 'TRIAL' AND trial_end_date >= $1 AND trial_end_date < $2"
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch trials ending in window")
    }

    /// ACTIVE clients whose paid platform window has run out. Clients approved
    /// without a platform window are never selected.
    pub async fn get_lapsed_platform(&self, now: DateTime<Utc>) -> Result<Vec<Client>> {
        sqlx::query_as::<_, Client>(
            "SELECT * FROM clients WHERE status = 'ACTIVE' AND platform_subscription_end IS NOT NULL AND platform_subscription_end < $1"
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch lapsed platform clients")
    }

    pub async fn transition(&self, id: Uuid, from: ClientStatus, to: ClientStatus, now: DateTime<Utc>) -> Result<bool> {
        let res = sqlx::query("UPDATE clients SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4")
            .bind(to)
            .bind(now)
            .bind(id)
            .bind(from)
            .execute(&self.pool)
            .await
            .context("Failed to update client status")?;
        Ok(res.rows_affected() == 1)
    }

    /// `from -> EXPIRED` plus pausing of the client's bots, atomically. The
    /// window `from` depends on (trial end for TRIAL, platform end for ACTIVE)
    /// is re-checked in the UPDATE, so a renewal committed after the sweep
    /// read its candidates wins. `None` when nothing changed.
    pub async fn expire(&self, id: Uuid, from: ClientStatus, now: DateTime<Utc>) -> Result<Option<Vec<Uuid>>> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let res = sqlx::query(
            r#"
            UPDATE clients
            SET status = 'EXPIRED', updated_at = $2
            WHERE id = $1
              AND status = $3
              AND (
                    ($3 = 'TRIAL' AND trial_end_date IS NOT NULL AND trial_end_date < $2)
                 OR ($3 = 'ACTIVE' AND platform_subscription_end IS NOT NULL AND platform_subscription_end < $2)
              )
            "#
        )
        .bind(id)
        .bind(now)
        .bind(from)
        .execute(&mut *tx)
        .await
        .context("Failed to expire client")?;
        if res.rows_affected() == 0 {
            debug!(client_id = %id, ?from, "Client no longer lapsed, not expired");
            return Ok(None);
        }
        let paused = pause_client_bots(&mut *tx, id, now).await?;

        tx.commit().await.context("Failed to commit client expiry")?;
        Ok(Some(paused))
    }

    /// Suspends from any status that allows it and pauses the client's bots.
    /// Returns the previous status and the paused bots.
    pub async fn suspend(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<(ClientStatus, Vec<Uuid>)>> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let current = sqlx::query_scalar::<_, ClientStatus>("SELECT status FROM clients WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to lock client")?;
        let Some(current) = current else {
            return Ok(None);
        };
        if !current.can_transition_to(ClientStatus::Suspended) {
            debug!(client_id = %id, status = ?current, "Client cannot be suspended");
            return Ok(None);
        }

        sqlx::query("UPDATE clients SET status = 'SUSPENDED', updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to suspend client")?;
        let paused = pause_client_bots(&mut *tx, id, now).await?;

        tx.commit().await.context("Failed to commit suspension")?;
        Ok(Some((current, paused)))
    }

    /// PENDING -> TRIAL, only if a trial was never activated.
    pub async fn start_trial(&self, id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE clients
            SET status = 'TRIAL', trial_activated = TRUE, trial_start_date = $1, trial_end_date = $2, updated_at = $1
            WHERE id = $3 AND status = 'PENDING' AND trial_activated = FALSE
            "#
        )
        .bind(start)
        .bind(end)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to start trial")?;
        Ok(res.rows_affected() == 1)
    }
}
