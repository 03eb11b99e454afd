use sqlx::{PgConnection, PgPool};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::models::bot::{BotStatus, SellingBot};

#[derive(Debug, Clone)]
pub struct BotRepository {
    pool: PgPool,
}

impl BotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<SellingBot>> {
        sqlx::query_as::<_, SellingBot>("SELECT * FROM selling_bots WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch selling bot")
    }

    pub async fn list_for_client(&self, client_id: Option<Uuid>) -> Result<Vec<SellingBot>> {
        sqlx::query_as::<_, SellingBot>(
            "SELECT * FROM selling_bots WHERE ($1::uuid IS NULL OR client_id = $1) ORDER BY created_at"
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list selling bots")
    }

    pub async fn list_by_status(&self, status: BotStatus) -> Result<Vec<SellingBot>> {
        sqlx::query_as::<_, SellingBot>("SELECT * FROM selling_bots WHERE status = $1 ORDER BY created_at")
            .bind(status)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list selling bots by status")
    }

    /// Compare-and-swap on the status column. `false` when the bot is missing
    /// or no longer in `from`.
    pub async fn set_status(&self, id: Uuid, from: BotStatus, to: BotStatus, now: DateTime<Utc>) -> Result<bool> {
        let res = sqlx::query("UPDATE selling_bots SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4")
            .bind(to)
            .bind(now)
            .bind(id)
            .bind(from)
            .execute(&self.pool)
            .await
            .context("Failed to update selling bot status")?;
        Ok(res.rows_affected() == 1)
    }
}

/// Pause every ACTIVE bot of a client inside the caller's transaction.
pub(crate) async fn pause_client_bots(conn: &mut PgConnection, client_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
    sqlx::query_scalar::<_, Uuid>(
        "UPDATE selling_bots SET status = 'PAUSED', updated_at = $2 WHERE client_id = $1 AND status = 'ACTIVE' RETURNING id"
    )
    .bind(client_id)
    .bind(now)
    .fetch_all(&mut *conn)
    .await
    .context("Failed to pause client bots")
}

/// Bring every PAUSED bot of a client back inside the caller's transaction.
pub(crate) async fn reactivate_client_bots(conn: &mut PgConnection, client_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
    sqlx::query_scalar::<_, Uuid>(
        "UPDATE selling_bots SET status = 'ACTIVE', updated_at = $2 WHERE client_id = $1 AND status = 'PAUSED' RETURNING id"
    )
    .bind(client_id)
    .bind(now)
    .fetch_all(&mut *conn)
    .await
    .context("Failed to reactivate client bots")
}
