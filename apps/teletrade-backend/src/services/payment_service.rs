use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use teletrade_db::LedgerStore;
use teletrade_db::models::bot::BotStatus;
use teletrade_db::models::client::ClientStatus;
use teletrade_db::models::payment::{
    NewPaymentTransaction, Payer, PaymentOutcome, PaymentTransaction, PaymentUpdate,
};
use teletrade_db::models::plan::{PlanType, SubscriptionPlan};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crypto::CredentialCipher;

use super::ServiceError;
use super::access_control::AccessControlService;
use super::messaging::GatewayProvider;
use super::notification_service::NotificationService;
use super::payment::{InvoiceRequest, PaymentProvider};

#[derive(Debug, Clone, Serialize)]
pub struct OpenedInvoice {
    pub transaction: PaymentTransaction,
    pub invoice_url: String,
}

/// Drives the payment state machine: opens invoices, applies provider status
/// reports and runs the post-commit side effects.
#[derive(Clone)]
pub struct PaymentService {
    ledger: Arc<dyn LedgerStore>,
    provider: Arc<dyn PaymentProvider>,
    access: Arc<AccessControlService>,
    gateways: Arc<dyn GatewayProvider>,
    notifications: Arc<NotificationService>,
    cipher: Arc<CredentialCipher>,
    platform_api_key: Option<String>,
    ipn_callback_url: Option<String>,
    invoice_ttl: Duration,
}

pub struct PaymentServiceConfig {
    pub platform_api_key: Option<String>,
    pub ipn_callback_url: Option<String>,
    pub invoice_expiration_minutes: i64,
}

impl PaymentService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        provider: Arc<dyn PaymentProvider>,
        access: Arc<AccessControlService>,
        gateways: Arc<dyn GatewayProvider>,
        notifications: Arc<NotificationService>,
        cipher: Arc<CredentialCipher>,
        config: PaymentServiceConfig,
    ) -> Self {
        Self {
            ledger,
            provider,
            access,
            gateways,
            notifications,
            cipher,
            platform_api_key: config.platform_api_key,
            ipn_callback_url: config.ipn_callback_url,
            invoice_ttl: Duration::minutes(config.invoice_expiration_minutes),
        }
    }

    pub fn provider(&self) -> &Arc<dyn PaymentProvider> {
        &self.provider
    }

    /// Commits the status transition. Returns only after the store has
    /// committed, or with the store's error.
    pub async fn apply_update(&self, update: &PaymentUpdate, now: DateTime<Utc>) -> Result<PaymentOutcome> {
        let outcome = self.ledger.apply_payment_status(update, now).await?;
        match &outcome {
            PaymentOutcome::ActivatedSubscriber(a) => info!(
                invoice_id = %update.invoice_id,
                subscriber_id = %a.subscriber.id,
                end = ?a.subscriber.subscription_end_date,
                "Subscriber subscription activated"
            ),
            PaymentOutcome::ActivatedClient(a) => info!(
                invoice_id = %update.invoice_id,
                client_id = %a.client.id,
                reactivated_bots = a.reactivated_bots.len(),
                "Client platform subscription activated"
            ),
            PaymentOutcome::Duplicate { status } => {
                debug!(invoice_id = %update.invoice_id, ?status, "Duplicate webhook ignored")
            }
            PaymentOutcome::NotFound => warn!(invoice_id = %update.invoice_id, "Transaction not found"),
            PaymentOutcome::Recorded { previous, current } => {
                info!(invoice_id = %update.invoice_id, ?previous, ?current, "Transaction status updated")
            }
            PaymentOutcome::Rejected { current, incoming } => {
                warn!(invoice_id = %update.invoice_id, ?current, ?incoming, "Stale status after terminal state ignored")
            }
        }
        Ok(outcome)
    }

    /// Runs the grant side effect on its own task. Its failures are only logged.
    pub fn spawn_fulfilment(&self, outcome: PaymentOutcome) {
        if !matches!(
            outcome,
            PaymentOutcome::ActivatedSubscriber(_) | PaymentOutcome::ActivatedClient(_)
        ) {
            return;
        }
        let service = self.clone();
        tokio::spawn(async move {
            service.fulfil(&outcome, Utc::now()).await;
        });
    }

    pub async fn fulfil(&self, outcome: &PaymentOutcome, now: DateTime<Utc>) {
        match outcome {
            PaymentOutcome::ActivatedSubscriber(a) => {
                let paid = match (a.paid_amount, a.paid_currency.as_deref()) {
                    (Some(amount), Some(currency)) => format!("{amount} {currency}"),
                    (Some(amount), None) => amount.to_string(),
                    _ => "n/a".to_string(),
                };
                let reason = format!("Payment confirmed: {paid}");
                self.access.grant(&a.subscriber, &a.bot, &reason, now).await;
            }
            PaymentOutcome::ActivatedClient(a) => {
                let Some(gateway) = self.gateways.platform() else {
                    debug!(client_id = %a.client.id, "Main bot not configured, skipping activation notice");
                    return;
                };
                let text = self
                    .notifications
                    .platform_activated(a.client.platform_subscription_end, a.reactivated_bots.len());
                if let Err(e) = gateway.send_message(a.client.telegram_user_id, &text).await {
                    warn!(client_id = %a.client.id, "Failed to notify client of activation: {:#}", e);
                }
            }
            _ => {}
        }
    }

    /// Creates a provider invoice and records it as a PENDING transaction.
    pub async fn open_invoice(&self, payer: Payer, plan_id: Uuid, now: DateTime<Utc>) -> Result<OpenedInvoice, ServiceError> {
        let plan = self
            .ledger
            .plan(plan_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| ServiceError::NotFound(format!("active plan {plan_id}")))?;

        let (api_key, description) = match payer {
            Payer::Subscriber(subscriber_id) => {
                let found = self
                    .ledger
                    .subscriber(subscriber_id)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("subscriber {subscriber_id}")))?;
                let bot = found.bot;
                if plan.plan_type != PlanType::Client || plan.bot_id != Some(bot.id) {
                    return Err(ServiceError::InvalidInput("plan is not sold by the subscriber's bot".into()));
                }
                if bot.status != BotStatus::Active {
                    return Err(ServiceError::Conflict(format!("bot {} is not active", bot.id)));
                }
                let stored = bot
                    .payment_key()
                    .ok_or_else(|| ServiceError::Conflict(format!("bot {} has no payment key", bot.id)))?;
                let key = self
                    .cipher
                    .open(&stored)
                    .map_err(|e| ServiceError::Store(e.into()))?;
                (key, describe(&plan, bot.bot_username.as_deref()))
            }
            Payer::Client(client_id) => {
                let client = self
                    .ledger
                    .client(client_id)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("client {client_id}")))?;
                if plan.plan_type != PlanType::Platform {
                    return Err(ServiceError::InvalidInput("plan is not a platform plan".into()));
                }
                if client.status == ClientStatus::Suspended {
                    return Err(ServiceError::Conflict(format!("client {client_id} is suspended")));
                }
                let key = self
                    .platform_api_key
                    .clone()
                    .ok_or_else(|| ServiceError::Conflict("platform payment key is not configured".into()))?;
                (key, describe(&plan, None))
            }
        };

        let request = InvoiceRequest {
            price_amount: plan.price_amount,
            price_currency: plan.price_currency.to_lowercase(),
            order_id: format!("{}_{}", plan.id.simple(), now.timestamp_millis()),
            order_description: description,
            ipn_callback_url: self.ipn_callback_url.clone(),
        };
        let invoice = self
            .provider
            .create_invoice(&api_key, &request)
            .await
            .map_err(ServiceError::Upstream)?;

        let transaction = self
            .ledger
            .insert_payment(
                &NewPaymentTransaction {
                    payer,
                    plan_id: plan.id,
                    provider_invoice_id: invoice.invoice_id,
                    amount: plan.price_amount,
                    currency: plan.price_currency.clone(),
                    expires_at: Some(now + self.invoice_ttl),
                },
                now,
            )
            .await?;

        info!(
            transaction_id = %transaction.id,
            invoice_id = %transaction.provider_invoice_id,
            provider = self.provider.name(),
            "Invoice opened"
        );
        Ok(OpenedInvoice {
            transaction,
            invoice_url: invoice.invoice_url,
        })
    }
}

fn describe(plan: &SubscriptionPlan, bot_username: Option<&str>) -> String {
    match bot_username {
        Some(username) => format!("{} ({} days) via @{}", plan.name, plan.duration_days, username),
        None => format!("{} ({} days)", plan.name, plan.duration_days),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::Duration;
    use teletrade_db::models::audit::AccessAction;
    use teletrade_db::models::payment::PaymentStatus;
    use teletrade_db::models::subscriber::SubscriptionStatus;

    use super::*;
    use crate::testing::*;

    fn update(invoice_id: &str, status: PaymentStatus) -> PaymentUpdate {
        PaymentUpdate {
            status,
            ..confirmed(invoice_id)
        }
    }

    #[tokio::test]
    async fn confirmed_invoice_activates_subscriber_and_sends_one_invite() {
        let engine = TestEngine::new();
        let now = Utc::now();
        let shop = seed_shop(&engine.ledger, Some(CHANNEL_ID), now);
        let payments = &engine.state.payments;

        let outcome = payments.apply_update(&confirmed("inv_1"), now).await.unwrap();
        let PaymentOutcome::ActivatedSubscriber(activated) = &outcome else {
            panic!("expected activation, got {outcome:?}");
        };
        assert_eq!(activated.subscriber.subscription_status, SubscriptionStatus::Active);
        assert_eq!(activated.subscriber.subscription_end_date, Some(now + Duration::days(30)));
        payments.fulfil(&outcome, now).await;

        let row = engine.ledger.payment_row("inv_1");
        assert_eq!(row.payment_status, PaymentStatus::Confirmed);
        assert_eq!(row.confirmed_at, Some(now));
        assert_eq!(row.paid_currency.as_deref(), Some("usdttrc20"));

        let stored = engine.ledger.subscriber_row(shop.subscriber.id);
        assert_eq!(stored.subscription_status, SubscriptionStatus::Active);
        assert_eq!(stored.subscription_plan_id, Some(shop.plan.id));
        assert_eq!(engine.ledger.access_actions(shop.subscriber.id), vec![AccessAction::Grant]);

        let calls = engine.bot_calls();
        let expected_name = format!("Sub {}", &shop.subscriber.id.simple().to_string()[..8]);
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            Call::InviteLink {
                channel_id: CHANNEL_ID,
                name: expected_name
            }
        );
        let messages = engine.gateways.bot.messages_to(42);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("https://t.me/+invite1"));

        // Provider redelivery.
        let again = payments.apply_update(&confirmed("inv_1"), now + Duration::seconds(5)).await.unwrap();
        assert!(matches!(again, PaymentOutcome::Duplicate { status: PaymentStatus::Confirmed }));
        payments.fulfil(&again, now).await;
        assert_eq!(engine.bot_calls().len(), 2);
        assert_eq!(engine.ledger.access_actions(shop.subscriber.id).len(), 1);
        assert_eq!(
            engine.ledger.subscriber_row(shop.subscriber.id).subscription_end_date,
            Some(now + Duration::days(30))
        );
    }

    #[tokio::test]
    async fn stale_status_never_regresses_a_confirmed_payment() {
        let engine = TestEngine::new();
        let now = Utc::now();
        seed_shop(&engine.ledger, Some(CHANNEL_ID), now);
        let payments = &engine.state.payments;

        payments.apply_update(&confirmed("inv_1"), now).await.unwrap();
        for stale in [PaymentStatus::Pending, PaymentStatus::Confirming, PaymentStatus::Expired] {
            let outcome = payments.apply_update(&update("inv_1", stale), now).await.unwrap();
            assert!(matches!(
                outcome,
                PaymentOutcome::Rejected {
                    current: PaymentStatus::Confirmed,
                    ..
                }
            ));
        }
        assert_eq!(engine.ledger.payment_row("inv_1").payment_status, PaymentStatus::Confirmed);
    }

    #[tokio::test]
    async fn intermediate_statuses_are_recorded_without_activation() {
        let engine = TestEngine::new();
        let now = Utc::now();
        let shop = seed_shop(&engine.ledger, Some(CHANNEL_ID), now);
        let payments = &engine.state.payments;

        let outcome = payments.apply_update(&update("inv_1", PaymentStatus::Confirming), now).await.unwrap();
        assert!(matches!(
            outcome,
            PaymentOutcome::Recorded {
                previous: PaymentStatus::Pending,
                current: PaymentStatus::Confirming
            }
        ));
        assert_eq!(
            engine.ledger.subscriber_row(shop.subscriber.id).subscription_status,
            SubscriptionStatus::PendingPayment
        );

        let outcome = payments.apply_update(&confirmed("inv_1"), now).await.unwrap();
        assert!(matches!(outcome, PaymentOutcome::ActivatedSubscriber(_)));
    }

    #[tokio::test]
    async fn renewal_extends_a_running_window_from_its_end() {
        let engine = TestEngine::new();
        let now = Utc::now();
        let shop = seed_shop(&engine.ledger, Some(CHANNEL_ID), now);
        let current_end = now + Duration::days(10);
        {
            let mut state = engine.ledger.state();
            let s = state.subscribers.get_mut(&shop.subscriber.id).unwrap();
            s.subscription_status = SubscriptionStatus::Active;
            s.subscription_start_date = Some(now - Duration::days(20));
            s.subscription_end_date = Some(current_end);
        }

        engine.state.payments.apply_update(&confirmed("inv_1"), now).await.unwrap();

        let stored = engine.ledger.subscriber_row(shop.subscriber.id);
        assert_eq!(stored.subscription_end_date, Some(current_end + Duration::days(30)));
        assert_eq!(stored.subscription_start_date, Some(now - Duration::days(20)));
    }

    #[tokio::test]
    async fn lapsed_subscriber_restarts_from_now() {
        let engine = TestEngine::new();
        let now = Utc::now();
        let shop = seed_shop(&engine.ledger, Some(CHANNEL_ID), now);
        {
            let mut state = engine.ledger.state();
            let s = state.subscribers.get_mut(&shop.subscriber.id).unwrap();
            s.subscription_status = SubscriptionStatus::Expired;
            s.subscription_end_date = Some(now - Duration::days(5));
        }

        engine.state.payments.apply_update(&confirmed("inv_1"), now).await.unwrap();

        let stored = engine.ledger.subscriber_row(shop.subscriber.id);
        assert_eq!(stored.subscription_start_date, Some(now));
        assert_eq!(stored.subscription_end_date, Some(now + Duration::days(30)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_confirmations_activate_exactly_once() {
        let engine = TestEngine::new();
        let now = Utc::now();
        let shop = seed_shop(&engine.ledger, Some(CHANNEL_ID), now);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let payments = engine.state.payments.clone();
                tokio::spawn(async move { payments.apply_update(&confirmed("inv_1"), now).await.unwrap() })
            })
            .collect();
        let mut activated = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                PaymentOutcome::ActivatedSubscriber(_) => activated += 1,
                PaymentOutcome::Duplicate { .. } => duplicates += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        assert_eq!(activated, 1);
        assert_eq!(duplicates, 7);
        assert_eq!(
            engine.ledger.subscriber_row(shop.subscriber.id).subscription_end_date,
            Some(now + Duration::days(30))
        );
    }

    #[tokio::test]
    async fn unknown_invoice_is_not_found() {
        let engine = TestEngine::new();
        let outcome = engine.state.payments.apply_update(&confirmed("nope"), Utc::now()).await.unwrap();
        assert!(matches!(outcome, PaymentOutcome::NotFound));
    }

    #[tokio::test]
    async fn grant_without_linked_channel_writes_the_log_only() {
        let engine = TestEngine::new();
        let now = Utc::now();
        let shop = seed_shop(&engine.ledger, None, now);

        let outcome = engine.state.payments.apply_update(&confirmed("inv_1"), now).await.unwrap();
        engine.state.payments.fulfil(&outcome, now).await;

        assert!(engine.bot_calls().is_empty());
        assert_eq!(engine.ledger.access_actions(shop.subscriber.id), vec![AccessAction::Grant]);
        let log = engine.ledger.access_log(shop.subscriber.id).await.unwrap();
        assert_eq!(log[0].reason.as_deref(), Some("Payment confirmed: 10 usdttrc20"));
    }

    #[tokio::test]
    async fn platform_payment_reactivates_paused_bots() {
        let engine = TestEngine::new();
        let now = Utc::now();
        let mut client = client(ClientStatus::Expired, now);
        client.trial_activated = true;
        let mut paused = bot(client.id, Some(CHANNEL_ID), now);
        paused.status = BotStatus::Paused;
        let platform_plan = plan(None, 30, now);
        engine.ledger.insert_client(client.clone());
        engine.ledger.insert_bot(paused.clone());
        engine.ledger.insert_plan(platform_plan.clone());
        engine
            .ledger
            .insert_payment_row(pending_payment(Payer::Client(client.id), platform_plan.id, "inv_p", now));

        let outcome = engine.state.payments.apply_update(&confirmed("inv_p"), now).await.unwrap();
        let PaymentOutcome::ActivatedClient(activated) = &outcome else {
            panic!("expected client activation, got {outcome:?}");
        };
        assert_eq!(activated.reactivated_bots, vec![paused.id]);
        engine.state.payments.fulfil(&outcome, now).await;

        let stored = engine.ledger.client_row(client.id);
        assert_eq!(stored.status, ClientStatus::Active);
        assert_eq!(stored.platform_subscription_end, Some(now + Duration::days(30)));
        assert_eq!(engine.ledger.bot_row(paused.id).status, BotStatus::Active);
        assert_eq!(engine.gateways.platform.messages_to(client.telegram_user_id).len(), 1);
    }

    #[tokio::test]
    async fn suspended_client_payment_is_recorded_only() {
        let engine = TestEngine::new();
        let now = Utc::now();
        let client = client(ClientStatus::Suspended, now);
        let platform_plan = plan(None, 30, now);
        engine.ledger.insert_client(client.clone());
        engine.ledger.insert_plan(platform_plan.clone());
        engine
            .ledger
            .insert_payment_row(pending_payment(Payer::Client(client.id), platform_plan.id, "inv_s", now));

        let outcome = engine.state.payments.apply_update(&confirmed("inv_s"), now).await.unwrap();
        assert!(matches!(
            outcome,
            PaymentOutcome::Recorded {
                current: PaymentStatus::Confirmed,
                ..
            }
        ));
        assert_eq!(engine.ledger.client_row(client.id).status, ClientStatus::Suspended);
    }

    #[tokio::test]
    async fn subscriber_invoice_uses_the_bot_key_and_records_a_pending_row() {
        let engine = TestEngine::new();
        let now = Utc::now();
        let shop = seed_shop(&engine.ledger, Some(CHANNEL_ID), now);

        let opened = engine
            .state
            .payments
            .open_invoice(Payer::Subscriber(shop.subscriber.id), shop.plan.id, now)
            .await
            .unwrap();

        assert_eq!(opened.transaction.provider_invoice_id, "np_1");
        assert_eq!(opened.transaction.payment_status, PaymentStatus::Pending);
        assert_eq!(opened.transaction.expires_at, Some(now + Duration::minutes(30)));
        assert!(opened.invoice_url.contains("np_1"));

        let requests = engine.provider.requests.lock().unwrap();
        assert_eq!(requests[0].0, "bot-np-key");
        assert_eq!(requests[0].1.price_currency, "usd");
        assert!(requests[0].1.order_description.contains("@signals_bot"));
    }

    #[tokio::test]
    async fn platform_invoice_uses_the_platform_key() {
        let engine = TestEngine::new();
        let now = Utc::now();
        let client = client(ClientStatus::Trial, now);
        let platform_plan = plan(None, 30, now);
        engine.ledger.insert_client(client.clone());
        engine.ledger.insert_plan(platform_plan.clone());

        let opened = engine
            .state
            .payments
            .open_invoice(Payer::Client(client.id), platform_plan.id, now)
            .await
            .unwrap();

        assert_eq!(opened.transaction.client_id, Some(client.id));
        assert_eq!(engine.provider.requests.lock().unwrap()[0].0, "platform-np-key");
    }

    #[tokio::test]
    async fn invoice_preconditions_are_enforced() {
        let engine = TestEngine::new();
        let now = Utc::now();
        let shop = seed_shop(&engine.ledger, Some(CHANNEL_ID), now);
        let payments = &engine.state.payments;

        let platform_plan = plan(None, 30, now);
        engine.ledger.insert_plan(platform_plan.clone());
        let err = payments
            .open_invoice(Payer::Subscriber(shop.subscriber.id), platform_plan.id, now)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let err = payments
            .open_invoice(Payer::Subscriber(shop.subscriber.id), Uuid::new_v4(), now)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        engine.provider.fail.store(true, Ordering::SeqCst);
        let err = payments
            .open_invoice(Payer::Subscriber(shop.subscriber.id), shop.plan.id, now)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Upstream(_)));
        engine.provider.fail.store(false, Ordering::SeqCst);

        engine.ledger.state().bots.get_mut(&shop.bot.id).unwrap().status = BotStatus::Paused;
        let err = payments
            .open_invoice(Payer::Subscriber(shop.subscriber.id), shop.plan.id, now)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let err = payments
            .open_invoice(Payer::Client(shop.client.id), shop.plan.id, now)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        engine.ledger.state().clients.get_mut(&shop.client.id).unwrap().status = ClientStatus::Suspended;
        let err = payments
            .open_invoice(Payer::Client(shop.client.id), platform_plan.id, now)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert!(engine.ledger.state().payments.len() == 1);
    }
}
