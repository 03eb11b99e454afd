use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode, UserId};
use teletrade_db::models::bot::SellingBot;

/// Telegram Bot API calls the engine needs, bound to one bot.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Invite link limited to a single member and without expiry.
    async fn create_invite_link(&self, channel_id: i64, name: &str) -> Result<String>;
    async fn ban_member(&self, channel_id: i64, user_id: i64) -> Result<()>;
    async fn unban_member(&self, channel_id: i64, user_id: i64) -> Result<()>;
    async fn approve_join_request(&self, channel_id: i64, user_id: i64) -> Result<()>;
    async fn decline_join_request(&self, channel_id: i64, user_id: i64) -> Result<()>;
    /// HTML-formatted direct message.
    async fn send_message(&self, user_id: i64, html: &str) -> Result<()>;
}

/// Hands out a gateway per call. Handles are owned by the provider, never
/// kept by callers.
#[async_trait]
pub trait GatewayProvider: Send + Sync {
    async fn for_bot(&self, bot: &SellingBot) -> Result<Arc<dyn MessagingGateway>>;
    /// The platform's main bot, if one is configured.
    fn platform(&self) -> Option<Arc<dyn MessagingGateway>>;
}

#[derive(Clone)]
pub struct TelegramGateway {
    bot: Bot,
}

impl TelegramGateway {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn user(user_id: i64) -> Result<UserId> {
    u64::try_from(user_id)
        .map(UserId)
        .with_context(|| format!("Invalid Telegram user id {user_id}"))
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    async fn create_invite_link(&self, channel_id: i64, name: &str) -> Result<String> {
        let link = self
            .bot
            .create_chat_invite_link(ChatId(channel_id))
            .name(name.chars().take(32).collect::<String>())
            .member_limit(1)
            .await
            .context("createChatInviteLink failed")?;
        Ok(link.invite_link)
    }

    async fn ban_member(&self, channel_id: i64, user_id: i64) -> Result<()> {
        self.bot
            .ban_chat_member(ChatId(channel_id), user(user_id)?)
            .await
            .context("banChatMember failed")?;
        Ok(())
    }

    async fn unban_member(&self, channel_id: i64, user_id: i64) -> Result<()> {
        self.bot
            .unban_chat_member(ChatId(channel_id), user(user_id)?)
            .only_if_banned(true)
            .await
            .context("unbanChatMember failed")?;
        Ok(())
    }

    async fn approve_join_request(&self, channel_id: i64, user_id: i64) -> Result<()> {
        self.bot
            .approve_chat_join_request(ChatId(channel_id), user(user_id)?)
            .await
            .context("approveChatJoinRequest failed")?;
        Ok(())
    }

    async fn decline_join_request(&self, channel_id: i64, user_id: i64) -> Result<()> {
        self.bot
            .decline_chat_join_request(ChatId(channel_id), user(user_id)?)
            .await
            .context("declineChatJoinRequest failed")?;
        Ok(())
    }

    async fn send_message(&self, user_id: i64, html: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(user_id), html)
            .parse_mode(ParseMode::Html)
            .await
            .context("sendMessage failed")?;
        Ok(())
    }
}
