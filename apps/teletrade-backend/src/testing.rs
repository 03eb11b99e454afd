//! In-memory doubles for the store, the Telegram gateway and the payment
//! provider. Test-only.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use teletrade_db::LedgerStore;
use teletrade_db::models::audit::{AccessAction, AccessControlLog, NewAccessLog, NewNotificationLog, NotificationLog, ReminderKey};
use teletrade_db::models::bot::{BotStatus, CredentialScheme, SellingBot};
use teletrade_db::models::client::{Client, ClientStatus};
use teletrade_db::models::payment::{
    decide, manual_extension_end, paid_window, ActivatedClient, ActivatedSubscriber, NewPaymentTransaction, Payer,
    PaymentOutcome, PaymentStatus, PaymentTransaction, PaymentType, PaymentUpdate, Transition,
};
use teletrade_db::models::plan::{NewPlan, PlanChanges, PlanFilter, PlanType, SubscriptionPlan};
use teletrade_db::models::stats::PlatformStats;
use teletrade_db::models::subscriber::{Subscriber, SubscriberWithBot, SubscriptionStatus};
use uuid::Uuid;

use crate::jobs::expiration::ExpirationJob;
use crate::jobs::reminders::ReminderJob;
use crate::jobs::trial::TrialJob;
use crate::jobs::Lifecycle;
use crate::services::access_control::AccessControlService;
use crate::services::catalog_service::CatalogService;
use crate::services::client_service::ClientService;
use crate::services::messaging::{GatewayProvider, MessagingGateway};
use crate::services::notification_service::NotificationService;
use crate::services::payment::nowpayments::{map_payment_status, NowPaymentsProvider};
use crate::services::payment::{InvoiceRequest, PaymentProvider, ProviderInvoice, SignatureError};
use crate::services::payment_service::{PaymentService, PaymentServiceConfig};
use crate::crypto::CredentialCipher;
use crate::AppState;

pub const IPN_SECRET: &str = "ipn-secret";
pub const API_KEY: &str = "admin-key";
pub const CHANNEL_ID: i64 = -100_123;

#[derive(Default)]
pub struct MemoryState {
    pub clients: HashMap<Uuid, Client>,
    pub bots: HashMap<Uuid, SellingBot>,
    pub plans: HashMap<Uuid, SubscriptionPlan>,
    pub subscribers: HashMap<Uuid, Subscriber>,
    /// Keyed by provider invoice id.
    pub payments: HashMap<String, PaymentTransaction>,
    pub access_logs: Vec<AccessControlLog>,
    pub notifications: Vec<NotificationLog>,
}

impl MemoryState {
    fn with_bot(&self, subscriber: &Subscriber) -> Option<SubscriberWithBot> {
        self.bots.get(&subscriber.bot_id).map(|bot| SubscriberWithBot {
            subscriber: subscriber.clone(),
            bot: bot.clone(),
        })
    }

    fn set_client_bots(&mut self, client_id: Uuid, from: BotStatus, to: BotStatus, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut moved = Vec::new();
        for bot in self.bots.values_mut().filter(|b| b.client_id == client_id && b.status == from) {
            bot.status = to;
            bot.updated_at = now;
            moved.push(bot.id);
        }
        moved
    }

    fn activate_subscriber(&mut self, payment: &PaymentTransaction, update: &PaymentUpdate, now: DateTime<Utc>) -> Option<ActivatedSubscriber> {
        let plan = self.plans.get(&payment.plan_id)?.clone();
        let subscriber = self.subscribers.get_mut(&payment.subscriber_id?)?;
        let running = match (subscriber.subscription_status, subscriber.subscription_end_date) {
            (SubscriptionStatus::Active, Some(end)) => Some((subscriber.subscription_start_date, end)),
            _ => None,
        };
        let (start, end) = paid_window(now, running, plan.duration_days);
        subscriber.subscription_status = SubscriptionStatus::Active;
        subscriber.subscription_start_date = Some(start);
        subscriber.subscription_end_date = Some(end);
        subscriber.subscription_plan_id = Some(plan.id);
        subscriber.updated_at = now;
        let subscriber = subscriber.clone();
        let bot = self.bots.get(&subscriber.bot_id)?.clone();
        Some(ActivatedSubscriber {
            transaction_id: payment.id,
            subscriber,
            bot,
            paid_amount: update.paid_amount.or(payment.paid_amount),
            paid_currency: update.paid_currency.clone().or_else(|| payment.paid_currency.clone()),
        })
    }

    fn activate_client(&mut self, payment: &PaymentTransaction, now: DateTime<Utc>) -> Option<ActivatedClient> {
        let plan = self.plans.get(&payment.plan_id)?.clone();
        let client_id = payment.client_id?;
        let client = self.clients.get_mut(&client_id)?;
        if !client.status.accepts_platform_payment() {
            return None;
        }
        let running = match (client.status, client.platform_subscription_end) {
            (ClientStatus::Active, Some(end)) => Some((client.platform_subscription_start, end)),
            _ => None,
        };
        let (start, end) = paid_window(now, running, plan.duration_days);
        client.status = ClientStatus::Active;
        client.platform_subscription_plan_id = Some(plan.id);
        client.platform_subscription_start = Some(start);
        client.platform_subscription_end = Some(end);
        client.updated_at = now;
        let client = client.clone();
        let reactivated_bots = self.set_client_bots(client_id, BotStatus::Paused, BotStatus::Active, now);
        Some(ActivatedClient {
            transaction_id: payment.id,
            client,
            reactivated_bots,
        })
    }
}

/// `LedgerStore` over a mutex-guarded map. Every operation holds the lock for
/// its whole duration, which gives the same atomicity as the SQL transaction.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
    fail_payments: AtomicBool,
    broken_rows: Mutex<HashSet<Uuid>>,
}

impl MemoryLedger {
    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    /// Makes `apply_payment_status` fail as if the database were down.
    pub fn fail_payments(&self, fail: bool) {
        self.fail_payments.store(fail, Ordering::SeqCst);
    }

    /// Makes every per-row write (and the reminder lookup) for `id` fail.
    pub fn break_row(&self, id: Uuid) {
        self.broken_rows.lock().unwrap().insert(id);
    }

    fn check_row(&self, id: Uuid) -> Result<()> {
        if self.broken_rows.lock().unwrap().contains(&id) {
            bail!("row {id} is locked by another session");
        }
        Ok(())
    }

    pub fn insert_client(&self, client: Client) {
        self.state().clients.insert(client.id, client);
    }

    pub fn insert_bot(&self, bot: SellingBot) {
        self.state().bots.insert(bot.id, bot);
    }

    pub fn insert_plan(&self, plan: SubscriptionPlan) {
        self.state().plans.insert(plan.id, plan);
    }

    pub fn insert_subscriber(&self, subscriber: Subscriber) {
        self.state().subscribers.insert(subscriber.id, subscriber);
    }

    pub fn insert_payment_row(&self, payment: PaymentTransaction) {
        self.state().payments.insert(payment.provider_invoice_id.clone(), payment);
    }

    pub fn subscriber_row(&self, id: Uuid) -> Subscriber {
        self.state().subscribers[&id].clone()
    }

    pub fn client_row(&self, id: Uuid) -> Client {
        self.state().clients[&id].clone()
    }

    pub fn bot_row(&self, id: Uuid) -> SellingBot {
        self.state().bots[&id].clone()
    }

    pub fn payment_row(&self, invoice_id: &str) -> PaymentTransaction {
        self.state().payments[invoice_id].clone()
    }

    pub fn access_actions(&self, subscriber_id: Uuid) -> Vec<AccessAction> {
        self.state()
            .access_logs
            .iter()
            .filter(|l| l.subscriber_id == subscriber_id)
            .map(|l| l.action)
            .collect()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn apply_payment_status(&self, update: &PaymentUpdate, now: DateTime<Utc>) -> Result<PaymentOutcome> {
        if self.fail_payments.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        let mut state = self.state();
        let Some(payment) = state.payments.get(&update.invoice_id).cloned() else {
            return Ok(PaymentOutcome::NotFound);
        };
        let current = payment.payment_status;
        let cascade = match decide(current, update.status) {
            Transition::Duplicate => return Ok(PaymentOutcome::Duplicate { status: current }),
            Transition::Rejected => {
                return Ok(PaymentOutcome::Rejected {
                    current,
                    incoming: update.status,
                })
            }
            Transition::Apply { cascade } => cascade,
        };

        if let Some(row) = state.payments.get_mut(&update.invoice_id) {
            row.payment_status = update.status;
            row.provider_payment_id = update.payment_id.clone().or(row.provider_payment_id.take());
            row.paid_amount = update.paid_amount.or(row.paid_amount);
            row.paid_currency = update.paid_currency.clone().or(row.paid_currency.take());
            if update.status == PaymentStatus::Confirmed {
                row.confirmed_at = Some(now);
            }
            row.updated_at = now;
        }

        let recorded = PaymentOutcome::Recorded {
            previous: current,
            current: update.status,
        };
        if !cascade {
            return Ok(recorded);
        }
        let activated = match payment.payment_type {
            PaymentType::SubscriberSubscription => state
                .activate_subscriber(&payment, update, now)
                .map(PaymentOutcome::ActivatedSubscriber),
            PaymentType::PlatformSubscription => state.activate_client(&payment, now).map(PaymentOutcome::ActivatedClient),
        };
        Ok(activated.unwrap_or(recorded))
    }

    async fn insert_payment(&self, new: &NewPaymentTransaction, now: DateTime<Utc>) -> Result<PaymentTransaction> {
        let mut state = self.state();
        if state.payments.contains_key(&new.provider_invoice_id) {
            bail!("duplicate provider invoice id {}", new.provider_invoice_id);
        }
        let (subscriber_id, client_id) = match new.payer {
            Payer::Subscriber(id) => (Some(id), None),
            Payer::Client(id) => (None, Some(id)),
        };
        let row = PaymentTransaction {
            id: Uuid::new_v4(),
            payment_type: new.payer.payment_type(),
            subscriber_id,
            client_id,
            plan_id: new.plan_id,
            provider_invoice_id: new.provider_invoice_id.clone(),
            provider_payment_id: None,
            amount: new.amount,
            currency: new.currency.clone(),
            paid_amount: None,
            paid_currency: None,
            payment_status: PaymentStatus::Pending,
            created_at: now,
            confirmed_at: None,
            expires_at: new.expires_at,
            updated_at: now,
        };
        state.payments.insert(row.provider_invoice_id.clone(), row.clone());
        Ok(row)
    }

    async fn payment_by_invoice(&self, invoice_id: &str) -> Result<Option<PaymentTransaction>> {
        Ok(self.state().payments.get(invoice_id).cloned())
    }

    async fn plan(&self, id: Uuid) -> Result<Option<SubscriptionPlan>> {
        Ok(self.state().plans.get(&id).cloned())
    }

    async fn list_plans(&self, filter: &PlanFilter) -> Result<Vec<SubscriptionPlan>> {
        let mut plans: Vec<_> = self.state().plans.values().filter(|p| filter.matches(p)).cloned().collect();
        plans.sort_by_key(|p| (p.created_at, p.id));
        Ok(plans)
    }

    async fn create_plan(&self, new: &NewPlan, now: DateTime<Utc>) -> Result<SubscriptionPlan> {
        let plan = SubscriptionPlan {
            id: Uuid::new_v4(),
            plan_type: new.plan_type,
            bot_id: new.bot_id,
            name: new.name.clone(),
            duration_days: new.duration_days,
            price_amount: new.price_amount,
            price_currency: new.price_currency.clone(),
            is_active: true,
            created_at: now,
        };
        self.state().plans.insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn update_plan(&self, id: Uuid, changes: &PlanChanges) -> Result<Option<SubscriptionPlan>> {
        let mut state = self.state();
        let Some(plan) = state.plans.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = &changes.name {
            plan.name = name.clone();
        }
        if let Some(days) = changes.duration_days {
            plan.duration_days = days;
        }
        if let Some(amount) = changes.price_amount {
            plan.price_amount = amount;
        }
        if let Some(currency) = &changes.price_currency {
            plan.price_currency = currency.clone();
        }
        Ok(Some(plan.clone()))
    }

    async fn set_plan_active(&self, id: Uuid, active: bool) -> Result<Option<SubscriptionPlan>> {
        Ok(self.state().plans.get_mut(&id).map(|plan| {
            plan.is_active = active;
            plan.clone()
        }))
    }

    async fn client(&self, id: Uuid) -> Result<Option<Client>> {
        Ok(self.state().clients.get(&id).cloned())
    }

    async fn list_clients(&self, status: Option<ClientStatus>) -> Result<Vec<Client>> {
        let mut clients: Vec<_> = self
            .state()
            .clients
            .values()
            .filter(|c| status.is_none_or(|s| c.status == s))
            .cloned()
            .collect();
        clients.sort_by_key(|c| (c.created_at, c.id));
        Ok(clients)
    }

    async fn expired_trials(&self, now: DateTime<Utc>) -> Result<Vec<Client>> {
        Ok(self
            .state()
            .clients
            .values()
            .filter(|c| c.status == ClientStatus::Trial && c.trial_end_date.is_some_and(|end| end < now))
            .cloned()
            .collect())
    }

    async fn trials_ending_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Client>> {
        Ok(self
            .state()
            .clients
            .values()
            .filter(|c| c.status == ClientStatus::Trial && c.trial_end_date.is_some_and(|end| end >= from && end < to))
            .cloned()
            .collect())
    }

    async fn lapsed_platform_clients(&self, now: DateTime<Utc>) -> Result<Vec<Client>> {
        Ok(self
            .state()
            .clients
            .values()
            .filter(|c| c.status == ClientStatus::Active && c.platform_subscription_end.is_some_and(|end| end < now))
            .cloned()
            .collect())
    }

    async fn transition_client(&self, id: Uuid, from: ClientStatus, to: ClientStatus, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state();
        match state.clients.get_mut(&id) {
            Some(client) if client.status == from => {
                client.status = to;
                client.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_client(&self, id: Uuid, from: ClientStatus, now: DateTime<Utc>) -> Result<Option<Vec<Uuid>>> {
        self.check_row(id)?;
        let mut state = self.state();
        match state.clients.get_mut(&id) {
            Some(client) if client.status == from && client.window_lapsed(now) => {
                client.status = ClientStatus::Expired;
                client.updated_at = now;
            }
            _ => return Ok(None),
        }
        Ok(Some(state.set_client_bots(id, BotStatus::Active, BotStatus::Paused, now)))
    }

    async fn suspend_client(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<(ClientStatus, Vec<Uuid>)>> {
        let mut state = self.state();
        let previous = match state.clients.get_mut(&id) {
            Some(client) if client.status.can_transition_to(ClientStatus::Suspended) => {
                let previous = client.status;
                client.status = ClientStatus::Suspended;
                client.updated_at = now;
                previous
            }
            _ => return Ok(None),
        };
        Ok(Some((previous, state.set_client_bots(id, BotStatus::Active, BotStatus::Paused, now))))
    }

    async fn start_trial(&self, id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state();
        match state.clients.get_mut(&id) {
            Some(client) if client.status == ClientStatus::Pending && !client.trial_activated => {
                client.status = ClientStatus::Trial;
                client.trial_activated = true;
                client.trial_start_date = Some(start);
                client.trial_end_date = Some(end);
                client.updated_at = start;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn bot(&self, id: Uuid) -> Result<Option<SellingBot>> {
        Ok(self.state().bots.get(&id).cloned())
    }

    async fn bots_with_status(&self, status: BotStatus) -> Result<Vec<SellingBot>> {
        Ok(self.state().bots.values().filter(|b| b.status == status).cloned().collect())
    }

    async fn list_bots(&self, client_id: Option<Uuid>) -> Result<Vec<SellingBot>> {
        let mut bots: Vec<_> = self
            .state()
            .bots
            .values()
            .filter(|b| client_id.is_none_or(|id| b.client_id == id))
            .cloned()
            .collect();
        bots.sort_by_key(|b| (b.created_at, b.id));
        Ok(bots)
    }

    async fn set_bot_status(&self, id: Uuid, from: BotStatus, to: BotStatus, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state();
        match state.bots.get_mut(&id) {
            Some(bot) if bot.status == from => {
                bot.status = to;
                bot.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn subscriber(&self, id: Uuid) -> Result<Option<SubscriberWithBot>> {
        let state = self.state();
        Ok(state.subscribers.get(&id).and_then(|s| state.with_bot(s)))
    }

    async fn subscriber_for_user(&self, bot_id: Uuid, telegram_user_id: i64) -> Result<Option<Subscriber>> {
        Ok(self
            .state()
            .subscribers
            .values()
            .find(|s| s.bot_id == bot_id && s.telegram_user_id == telegram_user_id)
            .cloned())
    }

    async fn bot_subscribers(&self, bot_id: Uuid, status: Option<SubscriptionStatus>) -> Result<Vec<Subscriber>> {
        let mut subscribers: Vec<_> = self
            .state()
            .subscribers
            .values()
            .filter(|s| s.bot_id == bot_id && status.is_none_or(|st| s.subscription_status == st))
            .cloned()
            .collect();
        subscribers.sort_by_key(|s| (s.created_at, s.id));
        Ok(subscribers)
    }

    async fn expired_subscribers(&self, now: DateTime<Utc>) -> Result<Vec<SubscriberWithBot>> {
        let state = self.state();
        Ok(state
            .subscribers
            .values()
            .filter(|s| s.subscription_status == SubscriptionStatus::Active && s.subscription_end_date.is_some_and(|end| end < now))
            .filter_map(|s| state.with_bot(s))
            .collect())
    }

    async fn subscribers_ending_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<SubscriberWithBot>> {
        let state = self.state();
        Ok(state
            .subscribers
            .values()
            .filter(|s| {
                s.subscription_status == SubscriptionStatus::Active
                    && s.subscription_end_date.is_some_and(|end| end >= from && end < to)
            })
            .filter_map(|s| state.with_bot(s))
            .collect())
    }

    async fn expire_subscriber(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.check_row(id)?;
        let mut state = self.state();
        match state.subscribers.get_mut(&id) {
            Some(s) if s.subscription_status == SubscriptionStatus::Active && s.subscription_end_date.is_some_and(|end| end < now) => {
                s.subscription_status = SubscriptionStatus::Expired;
                s.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend_subscriber(&self, id: Uuid, days: i64, now: DateTime<Utc>) -> Result<Option<Subscriber>> {
        let mut state = self.state();
        let Some(s) = state.subscribers.get_mut(&id) else {
            return Ok(None);
        };
        let end = manual_extension_end(now, s.subscription_end_date, days);
        s.subscription_start_date = Some(s.subscription_start_date.unwrap_or(now));
        s.subscription_status = SubscriptionStatus::Active;
        s.subscription_end_date = Some(end);
        s.updated_at = now;
        Ok(Some(s.clone()))
    }

    async fn revoke_subscriber(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Subscriber>> {
        let mut state = self.state();
        let Some(s) = state.subscribers.get_mut(&id) else {
            return Ok(None);
        };
        s.subscription_status = SubscriptionStatus::Revoked;
        s.updated_at = now;
        Ok(Some(s.clone()))
    }

    async fn record_access(&self, entry: &NewAccessLog, now: DateTime<Utc>) -> Result<()> {
        self.state().access_logs.push(AccessControlLog {
            id: Uuid::new_v4(),
            subscriber_id: entry.subscriber_id,
            bot_id: entry.bot_id,
            action: entry.action,
            performed_by: entry.performed_by,
            performer_id: entry.performer_id.clone(),
            reason: entry.reason.clone(),
            created_at: now,
        });
        Ok(())
    }

    async fn access_log(&self, subscriber_id: Uuid) -> Result<Vec<AccessControlLog>> {
        let mut logs: Vec<_> = self
            .state()
            .access_logs
            .iter()
            .filter(|l| l.subscriber_id == subscriber_id)
            .cloned()
            .collect();
        logs.reverse();
        Ok(logs)
    }

    async fn record_notification(&self, entry: &NewNotificationLog) -> Result<()> {
        self.state().notifications.push(NotificationLog {
            id: Uuid::new_v4(),
            recipient_type: entry.recipient_type,
            recipient_id: entry.recipient_id,
            notification_kind: entry.notification_kind,
            days_remaining: entry.days_remaining,
            success: entry.success,
            error_message: entry.error_message.clone(),
            sent_at: entry.sent_at,
        });
        Ok(())
    }

    async fn notification_sent_since(&self, key: &ReminderKey, since: DateTime<Utc>) -> Result<bool> {
        self.check_row(key.recipient_id)?;
        Ok(self.state().notifications.iter().any(|n| {
            n.recipient_type == key.recipient_type
                && n.recipient_id == key.recipient_id
                && n.notification_kind == key.notification_kind
                && n.days_remaining == Some(key.days_remaining)
                && n.sent_at >= since
        }))
    }

    async fn stats(&self) -> Result<PlatformStats> {
        let state = self.state();
        let mut stats = PlatformStats::default();
        for client in state.clients.values() {
            *stats.clients.entry(client.status).or_default() += 1;
        }
        for bot in state.bots.values() {
            *stats.bots.entry(bot.status).or_default() += 1;
        }
        for subscriber in state.subscribers.values() {
            *stats.subscribers.entry(subscriber.subscription_status).or_default() += 1;
        }
        stats.active_plans = state.plans.values().filter(|p| p.is_active).count() as i64;
        for payment in state.payments.values().filter(|p| p.payment_status == PaymentStatus::Confirmed) {
            stats.confirmed_payments += 1;
            *stats.revenue.entry(payment.currency.clone()).or_default() += payment.amount;
        }
        Ok(stats)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    InviteLink { channel_id: i64, name: String },
    Ban { channel_id: i64, user_id: i64 },
    Unban { channel_id: i64, user_id: i64 },
    Approve { channel_id: i64, user_id: i64 },
    Decline { channel_id: i64, user_id: i64 },
    Message { user_id: i64, text: String },
}

/// Records every call in order. Individual calls can be made to fail.
#[derive(Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<Call>>,
    links: AtomicUsize,
    pub fail_ban: AtomicBool,
    pub fail_unban: AtomicBool,
    pub fail_send: AtomicBool,
}

impl RecordingGateway {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn messages_to(&self, user_id: i64) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Message { user_id: u, text } if u == user_id => Some(text),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn create_invite_link(&self, channel_id: i64, name: &str) -> Result<String> {
        self.push(Call::InviteLink {
            channel_id,
            name: name.to_string(),
        });
        let n = self.links.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("https://t.me/+invite{n}"))
    }

    async fn ban_member(&self, channel_id: i64, user_id: i64) -> Result<()> {
        self.push(Call::Ban { channel_id, user_id });
        if self.fail_ban.load(Ordering::SeqCst) {
            bail!("Bad Request: not enough rights to restrict/unrestrict chat member");
        }
        Ok(())
    }

    async fn unban_member(&self, channel_id: i64, user_id: i64) -> Result<()> {
        self.push(Call::Unban { channel_id, user_id });
        if self.fail_unban.load(Ordering::SeqCst) {
            bail!("unban failed");
        }
        Ok(())
    }

    async fn approve_join_request(&self, channel_id: i64, user_id: i64) -> Result<()> {
        self.push(Call::Approve { channel_id, user_id });
        Ok(())
    }

    async fn decline_join_request(&self, channel_id: i64, user_id: i64) -> Result<()> {
        self.push(Call::Decline { channel_id, user_id });
        Ok(())
    }

    async fn send_message(&self, user_id: i64, html: &str) -> Result<()> {
        self.push(Call::Message {
            user_id,
            text: html.to_string(),
        });
        if self.fail_send.load(Ordering::SeqCst) {
            bail!("Forbidden: bot was blocked by the user");
        }
        Ok(())
    }
}

/// One recording gateway shared by every selling bot plus one for the main bot.
pub struct TestGateways {
    pub bot: Arc<RecordingGateway>,
    pub platform: Arc<RecordingGateway>,
    pub bot_unavailable: AtomicBool,
}

#[async_trait]
impl GatewayProvider for TestGateways {
    async fn for_bot(&self, _bot: &SellingBot) -> Result<Arc<dyn MessagingGateway>> {
        if self.bot_unavailable.load(Ordering::SeqCst) {
            bail!("bot token rejected");
        }
        Ok(self.bot.clone())
    }

    fn platform(&self) -> Option<Arc<dyn MessagingGateway>> {
        Some(self.platform.clone())
    }
}

/// Issues sequential invoice ids and verifies signatures like NOWPayments.
pub struct MockProvider {
    verifier: NowPaymentsProvider,
    pub requests: Mutex<Vec<(String, InvoiceRequest)>>,
    pub fail: AtomicBool,
}

impl MockProvider {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            verifier: NowPaymentsProvider::with_base_url("http://127.0.0.1:9", secret.map(str::to_string)).unwrap(),
            requests: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    async fn create_invoice(&self, api_key: &str, request: &InvoiceRequest) -> Result<ProviderInvoice> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("provider returned 500");
        }
        let mut requests = self.requests.lock().unwrap();
        requests.push((api_key.to_string(), request.clone()));
        let n = requests.len();
        Ok(ProviderInvoice {
            invoice_id: format!("np_{n}"),
            invoice_url: format!("https://nowpayments.io/payment/?iid=np_{n}"),
        })
    }

    fn verify_signature(&self, payload: &[u8], signature: Option<&str>) -> Result<(), SignatureError> {
        self.verifier.verify_signature(payload, signature)
    }

    fn map_status(&self, raw: &str) -> PaymentStatus {
        map_payment_status(raw)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Fully wired engine over the in-memory doubles.
pub struct TestEngine {
    pub ledger: Arc<MemoryLedger>,
    pub gateways: Arc<TestGateways>,
    pub provider: Arc<MockProvider>,
    pub state: AppState,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_secret(Some(IPN_SECRET))
    }

    pub fn with_secret(secret: Option<&str>) -> Self {
        let ledger = Arc::new(MemoryLedger::default());
        let gateways = Arc::new(TestGateways {
            bot: Arc::new(RecordingGateway::default()),
            platform: Arc::new(RecordingGateway::default()),
            bot_unavailable: AtomicBool::new(false),
        });
        let provider = Arc::new(MockProvider::new(secret));
        let notifications = Arc::new(NotificationService::new("TeleTrade", Some("teletrade_bot".to_string())));
        let store: Arc<dyn LedgerStore> = ledger.clone();
        let gateway_provider: Arc<dyn GatewayProvider> = gateways.clone();

        let access = Arc::new(AccessControlService::new(store.clone(), gateway_provider.clone(), notifications.clone()));
        let payments = PaymentService::new(
            store.clone(),
            provider.clone(),
            access.clone(),
            gateway_provider.clone(),
            notifications.clone(),
            Arc::new(CredentialCipher::from_base64(None).unwrap()),
            PaymentServiceConfig {
                platform_api_key: Some("platform-np-key".to_string()),
                ipn_callback_url: Some("https://backend.example/webhooks/nowpayments".to_string()),
                invoice_expiration_minutes: 30,
            },
        );
        let lifecycle = Arc::new(Lifecycle::new(
            ExpirationJob::new(store.clone(), access.clone()),
            TrialJob::new(store.clone(), gateway_provider.clone(), notifications.clone(), 7, vec![5, 3, 1]),
            ReminderJob::new(store.clone(), gateway_provider, notifications, vec![7, 3, 1]),
        ));
        let state = AppState {
            ledger: store.clone(),
            payments,
            access,
            clients: Arc::new(ClientService::new(store.clone())),
            catalog: Arc::new(CatalogService::new(store)),
            lifecycle,
            admin_api_key: Some(Arc::from(API_KEY)),
            trial_days: 7,
        };
        Self {
            ledger,
            gateways,
            provider,
            state,
        }
    }

    pub fn bot_calls(&self) -> Vec<Call> {
        self.gateways.bot.calls()
    }
}

pub fn client(status: ClientStatus, now: DateTime<Utc>) -> Client {
    Client {
        id: Uuid::new_v4(),
        telegram_user_id: 5_000_001,
        username: Some("seller".to_string()),
        business_name: "Signals & Co".to_string(),
        status,
        trial_activated: status == ClientStatus::Trial,
        trial_start_date: None,
        trial_end_date: None,
        platform_subscription_plan_id: None,
        platform_subscription_start: None,
        platform_subscription_end: None,
        created_at: now - Duration::days(30),
        updated_at: now - Duration::days(30),
    }
}

pub fn bot(client_id: Uuid, channel: Option<i64>, now: DateTime<Utc>) -> SellingBot {
    SellingBot {
        id: Uuid::new_v4(),
        client_id,
        bot_username: Some("signals_bot".to_string()),
        bot_token: "123456:plain-token".to_string(),
        bot_token_scheme: CredentialScheme::PlaintextV0,
        payment_api_key: Some("bot-np-key".to_string()),
        payment_api_key_scheme: Some(CredentialScheme::PlaintextV0),
        linked_channel_id: channel,
        linked_channel_username: channel.map(|_| "signals_vip".to_string()),
        status: BotStatus::Active,
        created_at: now - Duration::days(30),
        updated_at: now - Duration::days(30),
    }
}

pub fn plan(bot_id: Option<Uuid>, duration_days: i32, now: DateTime<Utc>) -> SubscriptionPlan {
    SubscriptionPlan {
        id: Uuid::new_v4(),
        plan_type: if bot_id.is_some() { PlanType::Client } else { PlanType::Platform },
        bot_id,
        name: "Monthly".to_string(),
        duration_days,
        price_amount: 10.0,
        price_currency: "USD".to_string(),
        is_active: true,
        created_at: now - Duration::days(30),
    }
}

pub fn subscriber(bot_id: Uuid, telegram_user_id: i64, status: SubscriptionStatus, end: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Subscriber {
    Subscriber {
        id: Uuid::new_v4(),
        telegram_user_id,
        username: Some("buyer".to_string()),
        bot_id,
        subscription_status: status,
        subscription_start_date: end.map(|e| e - Duration::days(30)),
        subscription_end_date: end,
        subscription_plan_id: None,
        created_at: now - Duration::days(40),
        updated_at: now - Duration::days(40),
    }
}

pub fn pending_payment(payer: Payer, plan_id: Uuid, invoice_id: &str, now: DateTime<Utc>) -> PaymentTransaction {
    let (subscriber_id, client_id) = match payer {
        Payer::Subscriber(id) => (Some(id), None),
        Payer::Client(id) => (None, Some(id)),
    };
    PaymentTransaction {
        id: Uuid::new_v4(),
        payment_type: payer.payment_type(),
        subscriber_id,
        client_id,
        plan_id,
        provider_invoice_id: invoice_id.to_string(),
        provider_payment_id: None,
        amount: 10.0,
        currency: "USD".to_string(),
        paid_amount: None,
        paid_currency: None,
        payment_status: PaymentStatus::Pending,
        created_at: now - Duration::minutes(5),
        confirmed_at: None,
        expires_at: Some(now + Duration::minutes(25)),
        updated_at: now - Duration::minutes(5),
    }
}

/// A selling setup: active client, bot with a linked channel, 30-day plan and
/// a PENDING_PAYMENT subscriber with an open invoice `inv_1`.
pub struct Shop {
    pub client: Client,
    pub bot: SellingBot,
    pub plan: SubscriptionPlan,
    pub subscriber: Subscriber,
}

pub fn seed_shop(ledger: &MemoryLedger, channel: Option<i64>, now: DateTime<Utc>) -> Shop {
    let client = client(ClientStatus::Active, now);
    let bot = bot(client.id, channel, now);
    let plan = plan(Some(bot.id), 30, now);
    let subscriber = subscriber(bot.id, 42, SubscriptionStatus::PendingPayment, None, now);
    ledger.insert_client(client.clone());
    ledger.insert_bot(bot.clone());
    ledger.insert_plan(plan.clone());
    ledger.insert_subscriber(subscriber.clone());
    ledger.insert_payment_row(pending_payment(Payer::Subscriber(subscriber.id), plan.id, "inv_1", now));
    Shop {
        client,
        bot,
        plan,
        subscriber,
    }
}

pub fn confirmed(invoice_id: &str) -> PaymentUpdate {
    PaymentUpdate {
        invoice_id: invoice_id.to_string(),
        status: PaymentStatus::Confirmed,
        payment_id: Some("5077125051".to_string()),
        paid_amount: Some(10.0),
        paid_currency: Some("usdttrc20".to_string()),
    }
}
