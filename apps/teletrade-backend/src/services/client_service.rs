use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use teletrade_db::LedgerStore;
use teletrade_db::models::bot::{BotStatus, SellingBot};
use teletrade_db::models::client::{Client, ClientStatus};
use tracing::info;
use uuid::Uuid;

use super::ServiceError;

#[derive(Debug, Clone, Serialize)]
pub struct SuspendOutcome {
    pub previous: ClientStatus,
    pub paused_bots: Vec<Uuid>,
}

/// Client and selling-bot administration. Every status write is a
/// compare-and-swap on the status the decision was made from.
pub struct ClientService {
    ledger: Arc<dyn LedgerStore>,
}

impl ClientService {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    async fn load(&self, id: Uuid) -> Result<Client, ServiceError> {
        self.ledger
            .client(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("client {id}")))
    }

    async fn load_bot(&self, id: Uuid) -> Result<SellingBot, ServiceError> {
        self.ledger
            .bot(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("bot {id}")))
    }

    /// PENDING -> ACTIVE.
    pub async fn approve(&self, id: Uuid, now: DateTime<Utc>) -> Result<Client, ServiceError> {
        let client = self.load(id).await?;
        if client.status != ClientStatus::Pending {
            return Err(ServiceError::Conflict(format!("client is {}, not PENDING", client.status.as_str())));
        }
        if !self.ledger.transition_client(id, ClientStatus::Pending, ClientStatus::Active, now).await? {
            return Err(ServiceError::Conflict("client status changed concurrently".into()));
        }
        info!(client_id = %id, "Client approved");
        self.load(id).await
    }

    /// PENDING | ACTIVE | TRIAL -> SUSPENDED, pausing every bot of the client.
    pub async fn suspend(&self, id: Uuid, now: DateTime<Utc>) -> Result<SuspendOutcome, ServiceError> {
        let client = self.load(id).await?;
        if !client.status.can_transition_to(ClientStatus::Suspended) {
            return Err(ServiceError::Conflict(format!("client is {}", client.status.as_str())));
        }
        let (previous, paused_bots) = self
            .ledger
            .suspend_client(id, now)
            .await?
            .ok_or_else(|| ServiceError::Conflict("client status changed concurrently".into()))?;
        info!(client_id = %id, ?previous, paused = paused_bots.len(), "Client suspended");
        Ok(SuspendOutcome { previous, paused_bots })
    }

    /// PENDING -> TRIAL. A client gets one trial, ever.
    pub async fn start_trial(&self, id: Uuid, days: i64, now: DateTime<Utc>) -> Result<Client, ServiceError> {
        if days <= 0 {
            return Err(ServiceError::InvalidInput("trial length must be positive".into()));
        }
        let client = self.load(id).await?;
        if client.trial_activated {
            return Err(ServiceError::Conflict("trial already used".into()));
        }
        if client.status != ClientStatus::Pending {
            return Err(ServiceError::Conflict(format!("client is {}, not PENDING", client.status.as_str())));
        }
        if !self.ledger.start_trial(id, now, now + Duration::days(days)).await? {
            return Err(ServiceError::Conflict("client status changed concurrently".into()));
        }
        info!(client_id = %id, days, "Trial started");
        self.load(id).await
    }

    pub async fn pause_bot(&self, id: Uuid, now: DateTime<Utc>) -> Result<SellingBot, ServiceError> {
        let bot = self.load_bot(id).await?;
        if bot.status != BotStatus::Active {
            return Err(ServiceError::Conflict(format!("bot is {:?}, not ACTIVE", bot.status)));
        }
        if !self.ledger.set_bot_status(id, BotStatus::Active, BotStatus::Paused, now).await? {
            return Err(ServiceError::Conflict("bot status changed concurrently".into()));
        }
        info!(bot_id = %id, "Bot paused");
        self.load_bot(id).await
    }

    /// PAUSED -> ACTIVE, only while the owning client may sell.
    pub async fn activate_bot(&self, id: Uuid, now: DateTime<Utc>) -> Result<SellingBot, ServiceError> {
        let bot = self.load_bot(id).await?;
        if bot.status != BotStatus::Paused {
            return Err(ServiceError::Conflict(format!("bot is {:?}, not PAUSED", bot.status)));
        }
        let client = self.load(bot.client_id).await?;
        if !matches!(client.status, ClientStatus::Active | ClientStatus::Trial) {
            return Err(ServiceError::Conflict(format!("owning client is {}", client.status.as_str())));
        }
        if !self.ledger.set_bot_status(id, BotStatus::Paused, BotStatus::Active, now).await? {
            return Err(ServiceError::Conflict("bot status changed concurrently".into()));
        }
        info!(bot_id = %id, "Bot activated");
        self.load_bot(id).await
    }
}
