use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use teletrade_db::LedgerStore;
use tracing::{debug, error, info};

use crate::services::access_control::AccessControlService;

pub const EXPIRED_REASON: &str = "Subscription expired.";

#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct ExpirationReport {
    pub candidates: usize,
    pub expired: usize,
    pub revoked: usize,
    /// Expired, but channel removal did not go through.
    pub revoke_pending: usize,
    /// Extended between the read and the write.
    pub skipped: usize,
    pub failures: usize,
}

/// Hourly sweep: ACTIVE subscribers past their end date become EXPIRED and
/// lose channel access.
pub struct ExpirationJob {
    ledger: Arc<dyn LedgerStore>,
    access: Arc<AccessControlService>,
}

impl ExpirationJob {
    pub fn new(ledger: Arc<dyn LedgerStore>, access: Arc<AccessControlService>) -> Self {
        Self { ledger, access }
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> anyhow::Result<ExpirationReport> {
        let candidates = self.ledger.expired_subscribers(now).await?;
        let mut report = ExpirationReport {
            candidates: candidates.len(),
            ..Default::default()
        };

        for item in candidates {
            let subscriber = &item.subscriber;
            match self.ledger.expire_subscriber(subscriber.id, now).await {
                Ok(false) => {
                    debug!(subscriber_id = %subscriber.id, "Subscriber no longer lapsed, skipping");
                    report.skipped += 1;
                }
                Ok(true) => {
                    report.expired += 1;
                    if let Some(channel_id) = item.bot.channel() {
                        if self.access.revoke(subscriber, &item.bot, channel_id, EXPIRED_REASON, now).await {
                            report.revoked += 1;
                        } else {
                            report.revoke_pending += 1;
                        }
                    }
                }
                Err(e) => {
                    error!(subscriber_id = %subscriber.id, "Failed to expire subscriber: {:#}", e);
                    report.failures += 1;
                }
            }
        }

        info!(
            candidates = report.candidates,
            expired = report.expired,
            revoked = report.revoked,
            revoke_pending = report.revoke_pending,
            failures = report.failures,
            "Expiration check complete"
        );
        Ok(report)
    }
}
