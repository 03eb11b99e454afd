use sqlx::{PgConnection, PgPool};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;
use crate::models::bot::SellingBot;
use crate::models::client::{Client, ClientStatus};
use crate::models::payment::{
    decide, paid_window, ActivatedClient, ActivatedSubscriber, NewPaymentTransaction, Payer,
    PaymentOutcome, PaymentStatus, PaymentTransaction, PaymentType, PaymentUpdate, Transition,
};
use crate::models::plan::SubscriptionPlan;
use crate::models::subscriber::{Subscriber, SubscriptionStatus};
use super::bot_repo::reactivate_client_bots;

#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: &NewPaymentTransaction, now: DateTime<Utc>) -> Result<PaymentTransaction> {
        let (subscriber_id, client_id) = match new.payer {
            Payer::Subscriber(id) => (Some(id), None),
            Payer::Client(id) => (None, Some(id)),
        };
        sqlx::query_as::<_, PaymentTransaction>(
            r#"
            INSERT INTO payment_transactions
                (id, payment_type, subscriber_id, client_id, plan_id, provider_invoice_id, amount, currency,
                 payment_status, created_at, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'PENDING', $9, $10, $9)
            RETURNING *
            "#
        )
        .bind(Uuid::new_v4())
        .bind(new.payer.payment_type())
        .bind(subscriber_id)
        .bind(client_id)
        .bind(new.plan_id)
        .bind(&new.provider_invoice_id)
        .bind(new.amount)
        .bind(&new.currency)
        .bind(now)
        .bind(new.expires_at)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create payment transaction")
    }

    pub async fn get_by_invoice(&self, invoice_id: &str) -> Result<Option<PaymentTransaction>> {
        sqlx::query_as::<_, PaymentTransaction>("SELECT * FROM payment_transactions WHERE provider_invoice_id = $1")
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch payment by invoice")
    }

    /// Reads the payment under a row lock, writes the new status with a
    /// compare-and-swap and, on confirmation, activates the payer. All of it
    /// commits or none of it does.
    pub async fn apply_status(&self, update: &PaymentUpdate, now: DateTime<Utc>) -> Result<PaymentOutcome> {
        let mut tx = self.pool.begin().await.context("Failed to begin payment transaction")?;

        let payment = sqlx::query_as::<_, PaymentTransaction>(
            "SELECT * FROM payment_transactions WHERE provider_invoice_id = $1 FOR UPDATE"
        )
        .bind(&update.invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to lock payment transaction")?;

        let Some(payment) = payment else {
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

        let confirmed_at = (update.status == PaymentStatus::Confirmed).then_some(now);
        let res = sqlx::query(
            r#"
            UPDATE payment_transactions
            SET payment_status = $1,
                provider_payment_id = COALESCE($2, provider_payment_id),
                paid_amount = COALESCE($3, paid_amount),
                paid_currency = COALESCE($4, paid_currency),
                confirmed_at = COALESCE($5, confirmed_at),
                updated_at = $6
            WHERE id = $7 AND payment_status = $8
            "#
        )
        .bind(update.status)
        .bind(&update.payment_id)
        .bind(update.paid_amount)
        .bind(&update.paid_currency)
        .bind(confirmed_at)
        .bind(now)
        .bind(payment.id)
        .bind(current)
        .execute(&mut *tx)
        .await
        .context("Failed to update payment status")?;

        if res.rows_affected() == 0 {
            debug!(invoice_id = %update.invoice_id, "Payment status changed underneath the lock");
            return Ok(PaymentOutcome::Duplicate { status: update.status });
        }

        let recorded = PaymentOutcome::Recorded {
            previous: current,
            current: update.status,
        };
        let outcome = if !cascade {
            recorded
        } else {
            let activated = match payment.payment_type {
                PaymentType::SubscriberSubscription => activate_subscriber(&mut *tx, &payment, update, now)
                    .await?
                    .map(PaymentOutcome::ActivatedSubscriber),
                PaymentType::PlatformSubscription => activate_client(&mut *tx, &payment, now)
                    .await?
                    .map(PaymentOutcome::ActivatedClient),
            };
            activated.unwrap_or(recorded)
        };

        tx.commit().await.context("Failed to commit payment transition")?;
        Ok(outcome)
    }
}

async fn fetch_plan(conn: &mut PgConnection, plan_id: Uuid) -> Result<Option<SubscriptionPlan>> {
    sqlx::query_as::<_, SubscriptionPlan>("SELECT * FROM subscription_plans WHERE id = $1")
        .bind(plan_id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch plan for payment")
}

async fn activate_subscriber(
    conn: &mut PgConnection,
    payment: &PaymentTransaction,
    update: &PaymentUpdate,
    now: DateTime<Utc>,
) -> Result<Option<ActivatedSubscriber>> {
    let Some(subscriber_id) = payment.subscriber_id else {
        warn!(payment_id = %payment.id, "Subscriber payment without subscriber");
        return Ok(None);
    };
    let Some(plan) = fetch_plan(&mut *conn, payment.plan_id).await? else {
        warn!(payment_id = %payment.id, plan_id = %payment.plan_id, "Confirmed payment references a missing plan");
        return Ok(None);
    };

    let subscriber = sqlx::query_as::<_, Subscriber>("SELECT * FROM subscribers WHERE id = $1 FOR UPDATE")
        .bind(subscriber_id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to lock subscriber")?;
    let Some(subscriber) = subscriber else {
        warn!(payment_id = %payment.id, subscriber_id = %subscriber_id, "Confirmed payment references a missing subscriber");
        return Ok(None);
    };

    let running = match (subscriber.subscription_status, subscriber.subscription_end_date) {
        (SubscriptionStatus::Active, Some(end)) => Some((subscriber.subscription_start_date, end)),
        _ => None,
    };
    let (start, end) = paid_window(now, running, plan.duration_days);

    let subscriber = sqlx::query_as::<_, Subscriber>(
        r#"
        UPDATE subscribers
        SET subscription_status = 'ACTIVE', subscription_start_date = $2, subscription_end_date = $3,
            subscription_plan_id = $4, updated_at = $5
        WHERE id = $1
        RETURNING *
        "#
    )
    .bind(subscriber_id)
    .bind(start)
    .bind(end)
    .bind(plan.id)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .context("Failed to activate subscriber")?;

    let bot = sqlx::query_as::<_, SellingBot>("SELECT * FROM selling_bots WHERE id = $1")
        .bind(subscriber.bot_id)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to fetch bot of activated subscriber")?;

    Ok(Some(ActivatedSubscriber {
        transaction_id: payment.id,
        subscriber,
        bot,
        paid_amount: update.paid_amount.or(payment.paid_amount),
        paid_currency: update.paid_currency.clone().or_else(|| payment.paid_currency.clone()),
    }))
}

async fn activate_client(
    conn: &mut PgConnection,
    payment: &PaymentTransaction,
    now: DateTime<Utc>,
) -> Result<Option<ActivatedClient>> {
    let Some(client_id) = payment.client_id else {
        warn!(payment_id = %payment.id, "Platform payment without client");
        return Ok(None);
    };
    let Some(plan) = fetch_plan(&mut *conn, payment.plan_id).await? else {
        warn!(payment_id = %payment.id, plan_id = %payment.plan_id, "Confirmed payment references a missing plan");
        return Ok(None);
    };

    let client = sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE id = $1 FOR UPDATE")
        .bind(client_id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to lock client")?;
    let Some(client) = client else {
        warn!(payment_id = %payment.id, client_id = %client_id, "Confirmed payment references a missing client");
        return Ok(None);
    };
    if !client.status.accepts_platform_payment() {
        warn!(client_id = %client_id, status = ?client.status, "Platform payment recorded without activation");
        return Ok(None);
    }

    let running = match (client.status, client.platform_subscription_end) {
        (ClientStatus::Active, Some(end)) => Some((client.platform_subscription_start, end)),
        _ => None,
    };
    let (start, end) = paid_window(now, running, plan.duration_days);

    let client = sqlx::query_as::<_, Client>(
        r#"
        UPDATE clients
        SET status = 'ACTIVE', platform_subscription_plan_id = $2, platform_subscription_start = $3,
            platform_subscription_end = $4, updated_at = $5
        WHERE id = $1
        RETURNING *
        "#
    )
    .bind(client_id)
    .bind(plan.id)
    .bind(start)
    .bind(end)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .context("Failed to activate client")?;

    let reactivated_bots = reactivate_client_bots(&mut *conn, client_id, now).await?;

    Ok(Some(ActivatedClient {
        transaction_id: payment.id,
        client,
        reactivated_bots,
    }))
}
