use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::{ChatJoinRequest, Update};
use teletrade_db::LedgerStore;
use teletrade_db::models::bot::{BotStatus, SellingBot};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::crypto::CredentialCipher;
use crate::services::access_control::AccessControlService;
use crate::services::messaging::{GatewayProvider, MessagingGateway, TelegramGateway};

struct RunningBot {
    bot: Bot,
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Runs one long-polling dispatcher per ACTIVE selling bot and hands out
/// Telegram gateways for them.
pub struct BotSupervisor {
    ledger: Arc<dyn LedgerStore>,
    cipher: Arc<CredentialCipher>,
    platform: Option<Arc<dyn MessagingGateway>>,
    running: Mutex<HashMap<Uuid, RunningBot>>,
}

impl BotSupervisor {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        cipher: Arc<CredentialCipher>,
        platform: Option<Arc<dyn MessagingGateway>>,
    ) -> Self {
        Self {
            ledger,
            cipher,
            platform,
            running: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, bot: &SellingBot) -> Result<Bot> {
        let token = self
            .cipher
            .open(&bot.token())
            .with_context(|| format!("Failed to open token of bot {}", bot.id))?;
        Ok(Bot::new(token))
    }

    /// Validates the token with `getMe` and starts the dispatcher. Returns
    /// `false` when the bot is already running.
    pub async fn start_bot(&self, selling_bot: &SellingBot, access: Arc<AccessControlService>) -> Result<bool> {
        if self.is_running(selling_bot.id).await {
            debug!(bot_id = %selling_bot.id, "Bot is already running");
            return Ok(false);
        }

        // Network round trip happens outside the lock; `for_bot` takes it too.
        let bot = self.client_for(selling_bot)?;
        let me = bot
            .get_me()
            .await
            .with_context(|| format!("Failed to validate token of bot {}", selling_bot.id))?;

        let mut running = self.running.lock().await;
        if running.get(&selling_bot.id).is_some_and(|r| !r.handle.is_finished()) {
            debug!(bot_id = %selling_bot.id, "Bot was started concurrently");
            return Ok(false);
        }
        info!(
            bot_id = %selling_bot.id,
            username = me.user.username.as_deref().unwrap_or("-"),
            "Starting selling bot"
        );

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let task_bot = bot.clone();
        let bot_id = selling_bot.id;
        let handle = tokio::spawn(async move {
            run_selling_bot(task_bot, shutdown_rx, access, BotId(bot_id)).await;
            info!(bot_id = %bot_id, "Bot dispatcher task finished");
        });

        running.insert(selling_bot.id, RunningBot { bot, shutdown, handle });
        Ok(true)
    }

    /// Drops the entry of a dispatcher whose task has already finished.
    async fn is_running(&self, bot_id: Uuid) -> bool {
        let mut running = self.running.lock().await;
        match running.get(&bot_id) {
            Some(existing) if !existing.handle.is_finished() => true,
            Some(_) => {
                info!(bot_id = %bot_id, "Detected finished bot task. Cleaning stale handle.");
                running.remove(&bot_id);
                false
            }
            None => false,
        }
    }

    pub async fn stop_bot(&self, bot_id: Uuid) -> bool {
        let Some(entry) = self.running.lock().await.remove(&bot_id) else {
            return false;
        };
        info!(bot_id = %bot_id, "Sending shutdown signal to bot...");
        let _ = entry.shutdown.send(());
        let _ = entry.handle.await;
        true
    }

    /// Starts every ACTIVE bot that is not running and stops every running
    /// bot that is no longer ACTIVE.
    pub async fn reconcile(&self, access: &Arc<AccessControlService>) -> Result<()> {
        let active = self.ledger.bots_with_status(BotStatus::Active).await?;
        let wanted: HashSet<Uuid> = active.iter().map(|b| b.id).collect();

        let stale: Vec<Uuid> = {
            let running = self.running.lock().await;
            running
                .iter()
                .filter(|(id, r)| !wanted.contains(id) || r.handle.is_finished())
                .map(|(id, _)| *id)
                .collect()
        };
        for id in stale {
            self.stop_bot(id).await;
        }

        for bot in &active {
            if let Err(e) = self.start_bot(bot, access.clone()).await {
                warn!(bot_id = %bot.id, "Failed to start bot: {:#}", e);
            }
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        let ids: Vec<Uuid> = self.running.lock().await.keys().copied().collect();
        for id in ids {
            self.stop_bot(id).await;
        }
    }
}

#[async_trait]
impl GatewayProvider for BotSupervisor {
    async fn for_bot(&self, selling_bot: &SellingBot) -> Result<Arc<dyn MessagingGateway>> {
        if let Some(entry) = self.running.lock().await.get(&selling_bot.id) {
            return Ok(Arc::new(TelegramGateway::new(entry.bot.clone())));
        }
        Ok(Arc::new(TelegramGateway::new(self.client_for(selling_bot)?)))
    }

    fn platform(&self) -> Option<Arc<dyn MessagingGateway>> {
        self.platform.clone()
    }
}

/// Dispatcher dependency naming the bot whose updates are handled.
#[derive(Debug, Clone, Copy)]
struct BotId(Uuid);

async fn run_selling_bot(
    bot: Bot,
    mut shutdown_signal: broadcast::Receiver<()>,
    access: Arc<AccessControlService>,
    bot_id: BotId,
) {
    let handler = Update::filter_chat_join_request().endpoint(handle_join_request);

    let mut dispatcher = Dispatcher::builder(bot, dptree::entry().branch(handler))
        .dependencies(dptree::deps![access, bot_id])
        .default_handler(|upd: Arc<Update>| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .build();

    tokio::select! {
        _ = dispatcher.dispatch() => {
            info!("Bot dispatcher exited naturally");
        }
        _ = shutdown_signal.recv() => {
            info!("Bot received shutdown signal, stopping...");
        }
    }
}

async fn handle_join_request(
    request: ChatJoinRequest,
    access: Arc<AccessControlService>,
    BotId(bot_id): BotId,
) -> Result<(), teloxide::RequestError> {
    let Ok(user_id) = i64::try_from(request.from.id.0) else {
        return Ok(());
    };
    if let Err(e) = access
        .handle_join_request_for(bot_id, request.chat.id.0, user_id, Utc::now())
        .await
    {
        error!(bot_id = %bot_id, user_id, "Join request handling failed: {:#}", e);
    }
    Ok(())
}
