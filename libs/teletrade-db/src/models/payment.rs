use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::bot::SellingBot;
use super::client::Client;
use super::subscriber::Subscriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    SubscriberSubscription,
    PlatformSubscription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Confirming,
    Confirmed,
    Failed,
    Expired,
    Refunded,
}

impl PaymentStatus {
    /// No provider callout moves a payment out of these.
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Confirmed | PaymentStatus::Refunded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub payment_type: PaymentType,
    pub subscriber_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub plan_id: Uuid,
    pub provider_invoice_id: String,
    pub provider_payment_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub paid_amount: Option<f64>,
    pub paid_currency: Option<String>,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Who an invoice is for. Keeps the subscriber/client exclusivity in the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payer {
    Subscriber(Uuid),
    Client(Uuid),
}

impl Payer {
    pub fn payment_type(self) -> PaymentType {
        match self {
            Payer::Subscriber(_) => PaymentType::SubscriberSubscription,
            Payer::Client(_) => PaymentType::PlatformSubscription,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPaymentTransaction {
    pub payer: Payer,
    pub plan_id: Uuid,
    pub provider_invoice_id: String,
    pub amount: f64,
    pub currency: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A provider status report for one invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentUpdate {
    pub invoice_id: String,
    pub status: PaymentStatus,
    pub payment_id: Option<String>,
    pub paid_amount: Option<f64>,
    pub paid_currency: Option<String>,
}

/// What to do with an incoming status given the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Duplicate,
    Rejected,
    Apply { cascade: bool },
}

pub fn decide(current: PaymentStatus, incoming: PaymentStatus) -> Transition {
    if current == incoming {
        Transition::Duplicate
    } else if current.is_terminal() {
        Transition::Rejected
    } else {
        Transition::Apply {
            cascade: incoming == PaymentStatus::Confirmed,
        }
    }
}

/// Window granted by a confirmed payment. A window that is still running is
/// extended from its end and keeps its start; anything else starts at `now`.
pub fn paid_window(
    now: DateTime<Utc>,
    running: Option<(Option<DateTime<Utc>>, DateTime<Utc>)>,
    duration_days: i32,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let duration = Duration::days(i64::from(duration_days));
    match running {
        Some((start, end)) if end > now => (start.unwrap_or(now), end + duration),
        _ => (now, now + duration),
    }
}

/// `max(current_end, now) + days`.
pub fn manual_extension_end(
    now: DateTime<Utc>,
    current_end: Option<DateTime<Utc>>,
    days: i64,
) -> DateTime<Utc> {
    let base = match current_end {
        Some(end) if end > now => end,
        _ => now,
    };
    base + Duration::days(days)
}

#[derive(Debug, Clone)]
pub struct ActivatedSubscriber {
    pub transaction_id: Uuid,
    pub subscriber: Subscriber,
    pub bot: SellingBot,
    pub paid_amount: Option<f64>,
    pub paid_currency: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ActivatedClient {
    pub transaction_id: Uuid,
    pub client: Client,
    pub reactivated_bots: Vec<Uuid>,
}

/// Result of the atomic "apply payment status" operation.
#[derive(Debug, Clone)]
pub enum PaymentOutcome {
    ActivatedSubscriber(ActivatedSubscriber),
    ActivatedClient(ActivatedClient),
    Duplicate {
        status: PaymentStatus,
    },
    NotFound,
    /// Status written without any activation.
    Recorded {
        previous: PaymentStatus,
        current: PaymentStatus,
    },
    /// Incoming status would move a terminal payment; nothing written.
    /// The webhook answers it as `ignored`, the no-write counterpart of
    /// `Recorded`.
    Rejected {
        current: PaymentStatus,
        incoming: PaymentStatus,
    },
}
