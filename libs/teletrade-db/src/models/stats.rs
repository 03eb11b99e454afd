use std::collections::HashMap;

use serde::Serialize;

use super::bot::BotStatus;
use super::client::ClientStatus;
use super::subscriber::SubscriptionStatus;

/// Platform-wide counters for the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlatformStats {
    pub clients: HashMap<ClientStatus, i64>,
    pub bots: HashMap<BotStatus, i64>,
    pub subscribers: HashMap<SubscriptionStatus, i64>,
    pub active_plans: i64,
    pub confirmed_payments: i64,
    /// Sum of confirmed payment amounts, per currency.
    pub revenue: HashMap<String, f64>,
}
