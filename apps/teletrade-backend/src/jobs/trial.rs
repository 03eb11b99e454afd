use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use teletrade_db::LedgerStore;
use teletrade_db::models::audit::{NotificationKind, RecipientType, ReminderKey};
use teletrade_db::models::client::{Client, ClientStatus};
use tracing::{debug, error, info, warn};

use crate::services::messaging::GatewayProvider;
use crate::services::notification_service::NotificationService;

use super::{send_reminder, ReminderStats};

#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct TrialReport {
    pub expired_trials: usize,
    pub lapsed_platform: usize,
    pub bots_paused: usize,
    pub reminders: ReminderStats,
    pub failures: usize,
}

/// Daily client sweep: trial expiry, trial reminders, lapsed platform plans.
/// Subscribers of affected clients are left alone.
pub struct TrialJob {
    ledger: Arc<dyn LedgerStore>,
    gateways: Arc<dyn GatewayProvider>,
    notifications: Arc<NotificationService>,
    trial_days: i64,
    lead_times: Vec<i32>,
}

impl TrialJob {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateways: Arc<dyn GatewayProvider>,
        notifications: Arc<NotificationService>,
        trial_days: i64,
        lead_times: Vec<i32>,
    ) -> Self {
        Self {
            ledger,
            gateways,
            notifications,
            trial_days,
            lead_times,
        }
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> anyhow::Result<TrialReport> {
        let mut report = TrialReport::default();

        for client in self.candidates(self.ledger.expired_trials(now).await, "expired trials", &mut report) {
            match self.expire(&client, ClientStatus::Trial, now).await {
                Ok(Some(paused)) => {
                    report.expired_trials += 1;
                    report.bots_paused += paused;
                    self.notify(&client, &self.notifications.trial_expired(self.trial_days)).await;
                }
                Ok(None) => debug!(client_id = %client.id, "Trial already left TRIAL, skipping"),
                Err(e) => {
                    error!(client_id = %client.id, "Failed to expire trial: {:#}", e);
                    report.failures += 1;
                }
            }
        }

        for &days in &self.lead_times {
            let from = now + Duration::days(i64::from(days));
            let to = from + Duration::days(1);
            let clients = match self.ledger.trials_ending_between(from, to).await {
                Ok(clients) => clients,
                Err(e) => {
                    error!(days, "Failed to load trials for reminders: {:#}", e);
                    report.failures += 1;
                    continue;
                }
            };
            for client in clients {
                let Some(end) = client.trial_end_date else { continue };
                let key = ReminderKey {
                    recipient_type: RecipientType::Client,
                    recipient_id: client.id,
                    notification_kind: NotificationKind::TrialReminder,
                    days_remaining: days,
                };
                let text = self.notifications.trial_reminder(days, end);
                match send_reminder(self.ledger.as_ref(), self.gateways.platform(), &key, client.telegram_user_id, &text, now).await {
                    Ok(result) => report.reminders.add(result),
                    Err(e) => {
                        error!(client_id = %client.id, days, "Trial reminder failed: {:#}", e);
                        report.failures += 1;
                    }
                }
            }
        }

        for client in self.candidates(self.ledger.lapsed_platform_clients(now).await, "lapsed clients", &mut report) {
            match self.expire(&client, ClientStatus::Active, now).await {
                Ok(Some(paused)) => {
                    report.lapsed_platform += 1;
                    report.bots_paused += paused;
                    self.notify(&client, &self.notifications.platform_lapsed()).await;
                }
                Ok(None) => debug!(client_id = %client.id, "Client already left ACTIVE, skipping"),
                Err(e) => {
                    error!(client_id = %client.id, "Failed to expire platform subscription: {:#}", e);
                    report.failures += 1;
                }
            }
        }

        info!(
            expired_trials = report.expired_trials,
            lapsed_platform = report.lapsed_platform,
            bots_paused = report.bots_paused,
            reminders_sent = report.reminders.sent,
            reminders_skipped = report.reminders.skipped,
            failures = report.failures,
            "Trial check complete"
        );
        Ok(report)
    }

    fn candidates(&self, loaded: anyhow::Result<Vec<Client>>, what: &str, report: &mut TrialReport) -> Vec<Client> {
        loaded.unwrap_or_else(|e| {
            error!("Failed to load {}: {:#}", what, e);
            report.failures += 1;
            Vec::new()
        })
    }

    async fn expire(&self, client: &Client, from: ClientStatus, now: DateTime<Utc>) -> anyhow::Result<Option<usize>> {
        let paused = self.ledger.expire_client(client.id, from, now).await?;
        if let Some(bots) = &paused {
            info!(client_id = %client.id, ?from, paused = bots.len(), "Client expired, bots paused");
        }
        Ok(paused.map(|bots| bots.len()))
    }

    async fn notify(&self, client: &Client, text: &str) {
        let Some(gateway) = self.gateways.platform() else {
            warn!(client_id = %client.id, "Main bot not configured, client not notified");
            return;
        };
        if let Err(e) = gateway.send_message(client.telegram_user_id, text).await {
            warn!(client_id = %client.id, "Failed to notify client: {:#}", e);
        }
    }
}
