use async_trait::async_trait;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::audit::{AccessControlLog, NewAccessLog, NewNotificationLog, ReminderKey};
use crate::models::bot::{BotStatus, SellingBot};
use crate::models::client::{Client, ClientStatus};
use crate::models::payment::{NewPaymentTransaction, PaymentOutcome, PaymentTransaction, PaymentUpdate};
use crate::models::plan::{NewPlan, PlanChanges, PlanFilter, SubscriptionPlan};
use crate::models::stats::PlatformStats;
use crate::models::subscriber::{Subscriber, SubscriberWithBot, SubscriptionStatus};
use crate::repositories::audit_repo::AuditRepository;
use crate::repositories::bot_repo::BotRepository;
use crate::repositories::client_repo::ClientRepository;
use crate::repositories::payment_repo::PaymentRepository;
use crate::repositories::plan_repo::PlanRepository;
use crate::repositories::stats_repo::StatsRepository;
use crate::repositories::subscriber_repo::SubscriberRepository;

/// Everything the engine reads from and writes to durable storage.
///
/// Every status write is a compare-and-swap against the status the caller
/// expects; a `false`/`None` return means somebody else moved the row first.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn ping(&self) -> Result<()>;

    /// The one compound operation: lock the invoice, swap its status and
    /// cascade the activation, atomically.
    async fn apply_payment_status(&self, update: &PaymentUpdate, now: DateTime<Utc>) -> Result<PaymentOutcome>;
    async fn insert_payment(&self, new: &NewPaymentTransaction, now: DateTime<Utc>) -> Result<PaymentTransaction>;
    async fn payment_by_invoice(&self, invoice_id: &str) -> Result<Option<PaymentTransaction>>;

    async fn plan(&self, id: Uuid) -> Result<Option<SubscriptionPlan>>;
    async fn list_plans(&self, filter: &PlanFilter) -> Result<Vec<SubscriptionPlan>>;
    async fn create_plan(&self, new: &NewPlan, now: DateTime<Utc>) -> Result<SubscriptionPlan>;
    async fn update_plan(&self, id: Uuid, changes: &PlanChanges) -> Result<Option<SubscriptionPlan>>;
    async fn set_plan_active(&self, id: Uuid, active: bool) -> Result<Option<SubscriptionPlan>>;

    async fn client(&self, id: Uuid) -> Result<Option<Client>>;
    async fn list_clients(&self, status: Option<ClientStatus>) -> Result<Vec<Client>>;
    async fn expired_trials(&self, now: DateTime<Utc>) -> Result<Vec<Client>>;
    async fn trials_ending_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Client>>;
    async fn lapsed_platform_clients(&self, now: DateTime<Utc>) -> Result<Vec<Client>>;
    async fn transition_client(&self, id: Uuid, from: ClientStatus, to: ClientStatus, now: DateTime<Utc>) -> Result<bool>;
    /// `from -> EXPIRED` and pause of the client's ACTIVE bots in one unit.
    async fn expire_client(&self, id: Uuid, from: ClientStatus, now: DateTime<Utc>) -> Result<Option<Vec<Uuid>>>;
    async fn suspend_client(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<(ClientStatus, Vec<Uuid>)>>;
    async fn start_trial(&self, id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool>;

    async fn bot(&self, id: Uuid) -> Result<Option<SellingBot>>;
    async fn bots_with_status(&self, status: BotStatus) -> Result<Vec<SellingBot>>;
    async fn list_bots(&self, client_id: Option<Uuid>) -> Result<Vec<SellingBot>>;
    async fn set_bot_status(&self, id: Uuid, from: BotStatus, to: BotStatus, now: DateTime<Utc>) -> Result<bool>;

    async fn subscriber(&self, id: Uuid) -> Result<Option<SubscriberWithBot>>;
    async fn subscriber_for_user(&self, bot_id: Uuid, telegram_user_id: i64) -> Result<Option<Subscriber>>;
    async fn bot_subscribers(&self, bot_id: Uuid, status: Option<SubscriptionStatus>) -> Result<Vec<Subscriber>>;
    async fn expired_subscribers(&self, now: DateTime<Utc>) -> Result<Vec<SubscriberWithBot>>;
    async fn subscribers_ending_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<SubscriberWithBot>>;
    async fn expire_subscriber(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;
    async fn extend_subscriber(&self, id: Uuid, days: i64, now: DateTime<Utc>) -> Result<Option<Subscriber>>;
    async fn revoke_subscriber(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Subscriber>>;

    async fn record_access(&self, entry: &NewAccessLog, now: DateTime<Utc>) -> Result<()>;
    async fn access_log(&self, subscriber_id: Uuid) -> Result<Vec<AccessControlLog>>;
    async fn record_notification(&self, entry: &NewNotificationLog) -> Result<()>;
    async fn notification_sent_since(&self, key: &ReminderKey, since: DateTime<Utc>) -> Result<bool>;

    async fn stats(&self) -> Result<PlatformStats>;
}

/// `LedgerStore` over PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
    pub payments: PaymentRepository,
    pub plans: PlanRepository,
    pub clients: ClientRepository,
    pub bots: BotRepository,
    pub subscribers: SubscriberRepository,
    pub audit: AuditRepository,
    pub stats: StatsRepository,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            payments: PaymentRepository::new(pool.clone()),
            plans: PlanRepository::new(pool.clone()),
            clients: ClientRepository::new(pool.clone()),
            bots: BotRepository::new(pool.clone()),
            subscribers: SubscriberRepository::new(pool.clone()),
            audit: AuditRepository::new(pool.clone()),
            stats: StatsRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn ping(&self) -> Result<()> {
        crate::db::ping(&self.pool).await
    }

    async fn apply_payment_status(&self, update: &PaymentUpdate, now: DateTime<Utc>) -> Result<PaymentOutcome> {
        self.payments.apply_status(update, now).await
    }

    async fn insert_payment(&self, new: &NewPaymentTransaction, now: DateTime<Utc>) -> Result<PaymentTransaction> {
        self.payments.create(new, now).await
    }

    async fn payment_by_invoice(&self, invoice_id: &str) -> Result<Option<PaymentTransaction>> {
        self.payments.get_by_invoice(invoice_id).await
    }

    async fn plan(&self, id: Uuid) -> Result<Option<SubscriptionPlan>> {
        self.plans.get_by_id(id).await
    }

    async fn list_plans(&self, filter: &PlanFilter) -> Result<Vec<SubscriptionPlan>> {
        self.plans.list(filter).await
    }

    async fn create_plan(&self, new: &NewPlan, now: DateTime<Utc>) -> Result<SubscriptionPlan> {
        self.plans.create(new, now).await
    }

    async fn update_plan(&self, id: Uuid, changes: &PlanChanges) -> Result<Option<SubscriptionPlan>> {
        self.plans.update(id, changes).await
    }

    async fn set_plan_active(&self, id: Uuid, active: bool) -> Result<Option<SubscriptionPlan>> {
        self.plans.set_active(id, active).await
    }

    async fn client(&self, id: Uuid) -> Result<Option<Client>> {
        self.clients.get_by_id(id).await
    }

    async fn list_clients(&self, status: Option<ClientStatus>) -> Result<Vec<Client>> {
        self.clients.list(status).await
    }

    async fn expired_trials(&self, now: DateTime<Utc>) -> Result<Vec<Client>> {
        self.clients.get_expired_trials(now).await
    }

    async fn trials_ending_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Client>> {
        self.clients.get_trials_ending_between(from, to).await
    }

    async fn lapsed_platform_clients(&self, now: DateTime<Utc>) -> Result<Vec<Client>> {
        self.clients.get_lapsed_platform(now).await
    }

    async fn transition_client(&self, id: Uuid, from: ClientStatus, to: ClientStatus, now: DateTime<Utc>) -> Result<bool> {
        self.clients.transition(id, from, to, now).await
    }

    async fn expire_client(&self, id: Uuid, from: ClientStatus, now: DateTime<Utc>) -> Result<Option<Vec<Uuid>>> {
        self.clients.expire(id, from, now).await
    }

    async fn suspend_client(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<(ClientStatus, Vec<Uuid>)>> {
        self.clients.suspend(id, now).await
    }

    async fn start_trial(&self, id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool> {
        self.clients.start_trial(id, start, end).await
    }

    async fn bot(&self, id: Uuid) -> Result<Option<SellingBot>> {
        self.bots.get_by_id(id).await
    }

    async fn bots_with_status(&self, status: BotStatus) -> Result<Vec<SellingBot>> {
        self.bots.list_by_status(status).await
    }

    async fn list_bots(&self, client_id: Option<Uuid>) -> Result<Vec<SellingBot>> {
        self.bots.list_for_client(client_id).await
    }

    async fn set_bot_status(&self, id: Uuid, from: BotStatus, to: BotStatus, now: DateTime<Utc>) -> Result<bool> {
        self.bots.set_status(id, from, to, now).await
    }

    async fn subscriber(&self, id: Uuid) -> Result<Option<SubscriberWithBot>> {
        self.subscribers.get_with_bot(id).await
    }

    async fn subscriber_for_user(&self, bot_id: Uuid, telegram_user_id: i64) -> Result<Option<Subscriber>> {
        self.subscribers.get_by_bot_and_user(bot_id, telegram_user_id).await
    }

    async fn bot_subscribers(&self, bot_id: Uuid, status: Option<SubscriptionStatus>) -> Result<Vec<Subscriber>> {
        self.subscribers.list_for_bot(bot_id, status).await
    }

    async fn expired_subscribers(&self, now: DateTime<Utc>) -> Result<Vec<SubscriberWithBot>> {
        self.subscribers.get_expired_active(now).await
    }

    async fn subscribers_ending_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<SubscriberWithBot>> {
        self.subscribers.get_ending_between(from, to).await
    }

    async fn expire_subscriber(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.subscribers.expire_if_lapsed(id, now).await
    }

    async fn extend_subscriber(&self, id: Uuid, days: i64, now: DateTime<Utc>) -> Result<Option<Subscriber>> {
        self.subscribers.extend(id, days, now).await
    }

    async fn revoke_subscriber(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Subscriber>> {
        self.subscribers.revoke(id, now).await
    }

    async fn record_access(&self, entry: &NewAccessLog, now: DateTime<Utc>) -> Result<()> {
        self.audit.log_access(entry, now).await.map(|_| ())
    }

    async fn access_log(&self, subscriber_id: Uuid) -> Result<Vec<AccessControlLog>> {
        self.audit.access_logs_for(subscriber_id).await
    }

    async fn record_notification(&self, entry: &NewNotificationLog) -> Result<()> {
        self.audit.log_notification(entry).await.map(|_| ())
    }

    async fn notification_sent_since(&self, key: &ReminderKey, since: DateTime<Utc>) -> Result<bool> {
        self.audit.notification_sent_since(key, since).await
    }

    async fn stats(&self) -> Result<PlatformStats> {
        self.stats.snapshot().await
    }
}
