use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use teletrade_db::LedgerStore;
use teletrade_db::models::audit::{NewNotificationLog, ReminderKey};
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::bot_manager::BotSupervisor;
use crate::services::access_control::AccessControlService;
use crate::services::messaging::MessagingGateway;

pub mod expiration;
pub mod reminders;
pub mod trial;

use expiration::{ExpirationJob, ExpirationReport};
use reminders::{ReminderJob, ReminderReport};
use trial::{TrialJob, TrialReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum JobKind {
    Expiration,
    Trial,
    Reminders,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Expiration => "expiration",
            JobKind::Trial => "trial",
            JobKind::Reminders => "reminders",
        }
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expiration" => Ok(JobKind::Expiration),
            "trial" => Ok(JobKind::Trial),
            "reminders" => Ok(JobKind::Reminders),
            other => Err(format!("unknown job '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum JobReport {
    Expiration(ExpirationReport),
    Trial(TrialReport),
    Reminders(ReminderReport),
}

#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ReminderStats {
    pub sent: usize,
    pub failed: usize,
    /// Already sent within the last day.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderResult {
    Sent,
    Failed,
    Skipped,
}

impl ReminderStats {
    pub fn add(&mut self, result: ReminderResult) {
        match result {
            ReminderResult::Sent => self.sent += 1,
            ReminderResult::Failed => self.failed += 1,
            ReminderResult::Skipped => self.skipped += 1,
        }
    }
}

/// Sends one reminder unless the same (recipient, kind, lead time) was
/// attempted within the last day. Every attempt is logged, successful or not.
pub(crate) async fn send_reminder(
    ledger: &dyn LedgerStore,
    gateway: Option<Arc<dyn MessagingGateway>>,
    key: &ReminderKey,
    chat_id: i64,
    text: &str,
    now: DateTime<Utc>,
) -> Result<ReminderResult> {
    if ledger.notification_sent_since(key, now - Duration::days(1)).await? {
        debug!(recipient_id = %key.recipient_id, days = key.days_remaining, "Reminder already sent");
        return Ok(ReminderResult::Skipped);
    }

    let delivery = match gateway {
        Some(gateway) => gateway.send_message(chat_id, text).await,
        None => Err(anyhow::anyhow!("no gateway available")),
    };
    let error_message = delivery.as_ref().err().map(|e| format!("{e:#}"));
    if let Some(message) = &error_message {
        warn!(recipient_id = %key.recipient_id, days = key.days_remaining, "Reminder not delivered: {}", message);
    }

    ledger
        .record_notification(&NewNotificationLog {
            recipient_type: key.recipient_type,
            recipient_id: key.recipient_id,
            notification_kind: key.notification_kind,
            days_remaining: Some(key.days_remaining),
            success: error_message.is_none(),
            error_message,
            sent_at: now,
        })
        .await?;

    Ok(if delivery.is_ok() { ReminderResult::Sent } else { ReminderResult::Failed })
}

/// The three sweeps behind one entry point. A sweep that is already running
/// is skipped instead of run twice.
pub struct Lifecycle {
    expiration: ExpirationJob,
    trial: TrialJob,
    reminders: ReminderJob,
    expiration_lock: Mutex<()>,
    trial_lock: Mutex<()>,
    reminders_lock: Mutex<()>,
}

impl Lifecycle {
    pub fn new(expiration: ExpirationJob, trial: TrialJob, reminders: ReminderJob) -> Self {
        Self {
            expiration,
            trial,
            reminders,
            expiration_lock: Mutex::new(()),
            trial_lock: Mutex::new(()),
            reminders_lock: Mutex::new(()),
        }
    }

    /// `Ok(None)` when the sweep is already in progress.
    pub async fn run(&self, kind: JobKind, now: DateTime<Utc>) -> Result<Option<JobReport>> {
        let lock = match kind {
            JobKind::Expiration => &self.expiration_lock,
            JobKind::Trial => &self.trial_lock,
            JobKind::Reminders => &self.reminders_lock,
        };
        let Ok(_guard) = lock.try_lock() else {
            warn!(job = kind.as_str(), "Job still running, skipping this run");
            return Ok(None);
        };

        let report = match kind {
            JobKind::Expiration => JobReport::Expiration(self.expiration.run_at(now).await?),
            JobKind::Trial => JobReport::Trial(self.trial.run_at(now).await?),
            JobKind::Reminders => JobReport::Reminders(self.reminders.run_at(now).await?),
        };
        Ok(Some(report))
    }
}

pub struct SchedulerIntervals {
    pub expiration: std::time::Duration,
    pub trial: std::time::Duration,
    pub reminders: std::time::Duration,
    pub bot_sync: std::time::Duration,
}

/// Background loops: one per sweep plus the bot supervisor sync.
pub struct Scheduler {
    lifecycle: Arc<Lifecycle>,
    supervisor: Arc<BotSupervisor>,
    access: Arc<AccessControlService>,
}

impl Scheduler {
    pub fn new(lifecycle: Arc<Lifecycle>, supervisor: Arc<BotSupervisor>, access: Arc<AccessControlService>) -> Self {
        Self {
            lifecycle,
            supervisor,
            access,
        }
    }

    pub fn start(&self, intervals: SchedulerIntervals) {
        info!("Starting lifecycle scheduler...");
        for (kind, period) in [
            (JobKind::Expiration, intervals.expiration),
            (JobKind::Trial, intervals.trial),
            (JobKind::Reminders, intervals.reminders),
        ] {
            let lifecycle = self.lifecycle.clone();
            tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    match lifecycle.run(kind, Utc::now()).await {
                        Ok(Some(report)) => debug!(job = kind.as_str(), ?report, "Scheduled job finished"),
                        Ok(None) => {}
                        Err(e) => error!(job = kind.as_str(), "Scheduled job failed: {:#}", e),
                    }
                }
            });
        }

        let supervisor = self.supervisor.clone();
        let access = self.access.clone();
        let period = intervals.bot_sync;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = supervisor.reconcile(&access).await {
                    error!("Bot sync failed: {:#}", e);
                }
            }
        });
    }
}
