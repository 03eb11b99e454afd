use std::sync::Arc;

use chrono::{DateTime, Utc};
use teletrade_db::LedgerStore;
use teletrade_db::models::audit::{AccessAction, NewAccessLog, PerformedBy};
use teletrade_db::models::bot::SellingBot;
use teletrade_db::models::subscriber::{Subscriber, SubscriberWithBot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ServiceError;
use super::messaging::{GatewayProvider, MessagingGateway};
use super::notification_service::NotificationService;

/// Who performed a manual action.
#[derive(Debug, Clone)]
pub struct Actor {
    pub performed_by: PerformedBy,
    pub performer_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDecision {
    Approved,
    Declined,
    /// Unknown user: declined and told to subscribe first.
    NotSubscribed,
    /// Request for a chat that is not the bot's linked channel.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct ManualRevokeOutcome {
    pub subscriber: Subscriber,
    /// `None` when the bot has no linked channel.
    pub removed: Option<bool>,
}

/// Channel grant/revoke and join-request decisions. Side effects here are
/// best-effort: failures are logged and never unwind committed state.
pub struct AccessControlService {
    ledger: Arc<dyn LedgerStore>,
    gateways: Arc<dyn GatewayProvider>,
    notifications: Arc<NotificationService>,
}

impl AccessControlService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateways: Arc<dyn GatewayProvider>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            ledger,
            gateways,
            notifications,
        }
    }

    /// Sends a single-use invite link when the bot has a linked channel and
    /// writes the GRANT row. Returns whether an invite was delivered.
    pub async fn grant(&self, subscriber: &Subscriber, bot: &SellingBot, reason: &str, now: DateTime<Utc>) -> bool {
        let delivered = match bot.channel() {
            Some(channel_id) => self.deliver_invite(subscriber, bot, channel_id).await,
            None => {
                debug!(subscriber_id = %subscriber.id, bot_id = %bot.id, "No linked channel, skipping invite");
                false
            }
        };

        let entry = NewAccessLog::system(subscriber.id, bot.id, AccessAction::Grant, reason);
        if let Err(e) = self.ledger.record_access(&entry, now).await {
            warn!(subscriber_id = %subscriber.id, "Failed to write GRANT log: {:#}", e);
        }
        delivered
    }

    async fn deliver_invite(&self, subscriber: &Subscriber, bot: &SellingBot, channel_id: i64) -> bool {
        let gateway = match self.gateways.for_bot(bot).await {
            Ok(gateway) => gateway,
            Err(e) => {
                warn!(subscriber_id = %subscriber.id, bot_id = %bot.id, "No gateway for grant: {:#}", e);
                return false;
            }
        };

        let name = format!("Sub {}", &subscriber.id.simple().to_string()[..8]);
        let link = match gateway.create_invite_link(channel_id, &name).await {
            Ok(link) => link,
            Err(e) => {
                warn!(subscriber_id = %subscriber.id, channel_id, "Failed to create invite link: {:#}", e);
                return false;
            }
        };

        let text = self.notifications.access_granted(&link, subscriber.subscription_end_date);
        match gateway.send_message(subscriber.telegram_user_id, &text).await {
            Ok(()) => {
                info!(subscriber_id = %subscriber.id, channel_id, "Channel access granted");
                true
            }
            Err(e) => {
                warn!(subscriber_id = %subscriber.id, "Failed to deliver invite link: {:#}", e);
                false
            }
        }
    }

    /// Removes the subscriber from the channel (ban, then unban so they can
    /// rejoin after renewing). Only a confirmed removal notifies the
    /// subscriber and writes the REVOKE row.
    pub async fn revoke(
        &self,
        subscriber: &Subscriber,
        bot: &SellingBot,
        channel_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.remove_member(subscriber, bot, channel_id, reason).await {
            return false;
        }
        let entry = NewAccessLog::system(subscriber.id, bot.id, AccessAction::Revoke, reason);
        if let Err(e) = self.ledger.record_access(&entry, now).await {
            warn!(subscriber_id = %subscriber.id, "Failed to write REVOKE log: {:#}", e);
        }
        true
    }

    async fn remove_member(&self, subscriber: &Subscriber, bot: &SellingBot, channel_id: i64, reason: &str) -> bool {
        let gateway = match self.gateways.for_bot(bot).await {
            Ok(gateway) => gateway,
            Err(e) => {
                warn!(subscriber_id = %subscriber.id, bot_id = %bot.id, "No gateway for revoke: {:#}", e);
                return false;
            }
        };

        let user_id = subscriber.telegram_user_id;
        if let Err(e) = gateway.ban_member(channel_id, user_id).await {
            warn!(subscriber_id = %subscriber.id, channel_id, "Removal failed, access pending: {:#}", e);
            return false;
        }
        if let Err(e) = gateway.unban_member(channel_id, user_id).await {
            warn!(subscriber_id = %subscriber.id, channel_id, "Unban after removal failed: {:#}", e);
        }

        let text = self.notifications.access_revoked(reason);
        if let Err(e) = gateway.send_message(user_id, &text).await {
            warn!(subscriber_id = %subscriber.id, "Failed to notify revoked subscriber: {:#}", e);
        }
        info!(subscriber_id = %subscriber.id, channel_id, reason, "Channel access revoked");
        true
    }

    /// Join request seen by a running dispatcher. The bot row is read per
    /// request so a relinked channel takes effect without a restart.
    pub async fn handle_join_request_for(
        &self,
        bot_id: Uuid,
        chat_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<JoinDecision, ServiceError> {
        let Some(bot) = self.ledger.bot(bot_id).await? else {
            warn!(bot_id = %bot_id, chat_id, "Join request for a bot that no longer exists");
            return Ok(JoinDecision::Ignored);
        };
        self.handle_join_request(&bot, chat_id, user_id, now).await
    }

    /// Approves only subscribers that are ACTIVE with an end date in the future.
    pub async fn handle_join_request(
        &self,
        bot: &SellingBot,
        chat_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<JoinDecision, ServiceError> {
        let Some(channel_id) = bot.channel().filter(|c| *c == chat_id) else {
            debug!(bot_id = %bot.id, chat_id, "Join request for an unlinked chat");
            return Ok(JoinDecision::Ignored);
        };

        let subscriber = self.ledger.subscriber_for_user(bot.id, user_id).await?;
        let gateway = self.gateways.for_bot(bot).await.map_err(ServiceError::Upstream)?;

        let decision = match &subscriber {
            Some(s) if s.has_access_at(now) => {
                gateway
                    .approve_join_request(channel_id, user_id)
                    .await
                    .map_err(ServiceError::Upstream)?;
                JoinDecision::Approved
            }
            Some(_) => {
                self.decline(gateway.as_ref(), channel_id, user_id, &self.notifications.join_declined())
                    .await?;
                JoinDecision::Declined
            }
            None => {
                self.decline(gateway.as_ref(), channel_id, user_id, &self.notifications.subscribe_first())
                    .await?;
                JoinDecision::NotSubscribed
            }
        };

        info!(bot_id = %bot.id, channel_id, user_id, ?decision, "Join request handled");
        Ok(decision)
    }

    async fn decline(
        &self,
        gateway: &dyn MessagingGateway,
        channel_id: i64,
        user_id: i64,
        notice: &str,
    ) -> Result<(), ServiceError> {
        gateway
            .decline_join_request(channel_id, user_id)
            .await
            .map_err(ServiceError::Upstream)?;
        if let Err(e) = gateway.send_message(user_id, notice).await {
            warn!(user_id, "Failed to send decline notice: {:#}", e);
        }
        Ok(())
    }

    /// `end = max(current_end, now) + days`, status ACTIVE. Never sends a new
    /// invite.
    pub async fn manual_extend(
        &self,
        subscriber_id: Uuid,
        days: i64,
        actor: &Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Subscriber, ServiceError> {
        if days <= 0 {
            return Err(ServiceError::InvalidInput("days must be positive".into()));
        }
        let subscriber = self
            .ledger
            .extend_subscriber(subscriber_id, days, now)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("subscriber {subscriber_id}")))?;

        let entry = NewAccessLog {
            subscriber_id,
            bot_id: subscriber.bot_id,
            action: AccessAction::ManualExtend,
            performed_by: actor.performed_by,
            performer_id: actor.performer_id.clone(),
            reason: Some(reason.unwrap_or_else(|| format!("Extended by {days} days"))),
        };
        if let Err(e) = self.ledger.record_access(&entry, now).await {
            warn!(subscriber_id = %subscriber_id, "Failed to write MANUAL_EXTEND log: {:#}", e);
        }

        info!(subscriber_id = %subscriber_id, days, end = ?subscriber.subscription_end_date, "Subscription extended manually");
        Ok(subscriber)
    }

    /// Status REVOKED, then `revoke` when a channel is linked (REVOKE row on
    /// confirmed removal), then a MANUAL_REVOKE row whatever the outcome.
    pub async fn manual_revoke(
        &self,
        subscriber_id: Uuid,
        actor: &Actor,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ManualRevokeOutcome, ServiceError> {
        let SubscriberWithBot { bot, .. } = self
            .ledger
            .subscriber(subscriber_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("subscriber {subscriber_id}")))?;
        let subscriber = self
            .ledger
            .revoke_subscriber(subscriber_id, now)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("subscriber {subscriber_id}")))?;

        let removed = match bot.channel() {
            Some(channel_id) => Some(self.revoke(&subscriber, &bot, channel_id, reason, now).await),
            None => None,
        };

        let entry = NewAccessLog {
            subscriber_id,
            bot_id: bot.id,
            action: AccessAction::ManualRevoke,
            performed_by: actor.performed_by,
            performer_id: actor.performer_id.clone(),
            reason: Some(reason.to_string()),
        };
        if let Err(e) = self.ledger.record_access(&entry, now).await {
            warn!(subscriber_id = %subscriber_id, "Failed to write MANUAL_REVOKE log: {:#}", e);
        }

        info!(subscriber_id = %subscriber_id, ?removed, "Subscription revoked manually");
        Ok(ManualRevokeOutcome { subscriber, removed })
    }
}
