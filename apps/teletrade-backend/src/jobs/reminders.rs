use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use teletrade_db::LedgerStore;
use teletrade_db::models::audit::{NotificationKind, RecipientType, ReminderKey};
use tracing::{error, info, warn};

use crate::services::messaging::GatewayProvider;
use crate::services::notification_service::NotificationService;

use super::{send_reminder, ReminderStats};

#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct ReminderReport {
    pub reminders: ReminderStats,
    pub failures: usize,
}

/// Daily renewal reminders for ACTIVE subscribers, sent through their own
/// selling bot.
pub struct ReminderJob {
    ledger: Arc<dyn LedgerStore>,
    gateways: Arc<dyn GatewayProvider>,
    notifications: Arc<NotificationService>,
    lead_times: Vec<i32>,
}

impl ReminderJob {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateways: Arc<dyn GatewayProvider>,
        notifications: Arc<NotificationService>,
        lead_times: Vec<i32>,
    ) -> Self {
        Self {
            ledger,
            gateways,
            notifications,
            lead_times,
        }
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> anyhow::Result<ReminderReport> {
        let mut report = ReminderReport::default();

        for &days in &self.lead_times {
            let from = now + Duration::days(i64::from(days));
            let subscribers = match self.ledger.subscribers_ending_between(from, from + Duration::days(1)).await {
                Ok(subscribers) => subscribers,
                Err(e) => {
                    error!(days, "Failed to load subscribers for reminders: {:#}", e);
                    report.failures += 1;
                    continue;
                }
            };

            for item in subscribers {
                let subscriber = &item.subscriber;
                let Some(end) = subscriber.subscription_end_date else { continue };
                let gateway = match self.gateways.for_bot(&item.bot).await {
                    Ok(gateway) => Some(gateway),
                    Err(e) => {
                        warn!(bot_id = %item.bot.id, "No gateway for reminder: {:#}", e);
                        None
                    }
                };
                let key = ReminderKey {
                    recipient_type: RecipientType::Subscriber,
                    recipient_id: subscriber.id,
                    notification_kind: NotificationKind::RenewalReminder,
                    days_remaining: days,
                };
                let text = self.notifications.renewal_reminder(days, end);
                match send_reminder(self.ledger.as_ref(), gateway, &key, subscriber.telegram_user_id, &text, now).await {
                    Ok(result) => report.reminders.add(result),
                    Err(e) => {
                        error!(subscriber_id = %subscriber.id, days, "Renewal reminder failed: {:#}", e);
                        report.failures += 1;
                    }
                }
            }
        }

        info!(
            sent = report.reminders.sent,
            failed = report.reminders.failed,
            skipped = report.reminders.skipped,
            failures = report.failures,
            "Reminder sweep complete"
        );
        Ok(report)
    }
}
