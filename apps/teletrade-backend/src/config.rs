use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use anyhow::{Context, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub database_url: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    #[serde(default)]
    pub main_bot_token: Option<String>,
    #[serde(default)]
    pub admin_api_key: Option<String>,
    #[serde(default)]
    pub nowpayments_api_key: Option<String>,
    #[serde(default)]
    pub nowpayments_ipn_secret: Option<String>,
    #[serde(default)]
    pub nowpayments_ipn_callback_url: Option<String>,
    #[serde(default)]
    pub credential_key: Option<String>,
    #[serde(default = "default_platform_name")]
    pub platform_name: String,
    #[serde(default = "default_trial_days")]
    pub trial_duration_days: i64,
    #[serde(default = "default_subscriber_reminders")]
    pub subscriber_reminder_days: Vec<i32>,
    #[serde(default = "default_trial_reminders")]
    pub trial_reminder_days: Vec<i32>,
    #[serde(default = "default_expiration_interval")]
    pub expiration_interval_secs: u64,
    #[serde(default = "default_daily_interval")]
    pub trial_interval_secs: u64,
    #[serde(default = "default_daily_interval")]
    pub reminder_interval_secs: u64,
    #[serde(default = "default_bot_sync_interval")]
    pub bot_sync_interval_secs: u64,
    #[serde(default = "default_invoice_expiration")]
    pub invoice_expiration_minutes: i64,
}

fn default_listen_port() -> u16 {
    3000
}
fn default_max_connections() -> u32 {
    10
}
fn default_platform_name() -> String {
    "TeleTrade".to_string()
}
fn default_trial_days() -> i64 {
    7
}
fn default_subscriber_reminders() -> Vec<i32> {
    vec![7, 3, 1]
}
fn default_trial_reminders() -> Vec<i32> {
    vec![5, 3, 1]
}
fn default_expiration_interval() -> u64 {
    3600
}
fn default_daily_interval() -> u64 {
    86_400
}
fn default_bot_sync_interval() -> u64 {
    300
}
fn default_invoice_expiration() -> i64 {
    30
}

impl BackendConfig {
    pub fn load() -> Result<Self> {
        let config_paths = ["/etc/teletrade/backend.toml", "./backend.toml"];

        for path in config_paths {
            if let Ok(contents) = fs::read_to_string(path) {
                tracing::info!("Loading config from {}", path);
                let config: Self = toml::from_str(&contents)
                    .with_context(|| format!("Invalid config file {path}"))?;
                return Ok(config.normalized());
            }
        }

        tracing::info!("Loading config from environment");
        Self::from_env(|key| std::env::var(key).ok())
    }

    /// Builds the config from a key lookup. Unset keys take their defaults.
    pub fn from_env(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parsed = |key: &str| -> Result<Option<u64>> {
            var(key)
                .map(|v| v.trim().parse::<u64>().with_context(|| format!("{key} must be a number")))
                .transpose()
        };

        let config = Self {
            database_url: var("DATABASE_URL").context("DATABASE_URL is not set")?,
            listen_port: parsed("LISTEN_PORT")?.map(|v| v as u16).unwrap_or_else(default_listen_port),
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS")?
                .map(|v| v as u32)
                .unwrap_or_else(default_max_connections),
            main_bot_token: var("MAIN_BOT_TOKEN"),
            admin_api_key: var("ADMIN_API_KEY"),
            nowpayments_api_key: var("NOWPAYMENTS_API_KEY"),
            nowpayments_ipn_secret: var("NOWPAYMENTS_IPN_SECRET"),
            nowpayments_ipn_callback_url: var("NOWPAYMENTS_IPN_CALLBACK_URL"),
            credential_key: var("CREDENTIAL_KEY"),
            platform_name: var("PLATFORM_NAME").unwrap_or_else(default_platform_name),
            trial_duration_days: parsed("TRIAL_DURATION_DAYS")?
                .map(|v| v as i64)
                .unwrap_or_else(default_trial_days),
            subscriber_reminder_days: match var("SUBSCRIBER_REMINDER_DAYS") {
                Some(raw) => parse_days(&raw).context("SUBSCRIBER_REMINDER_DAYS")?,
                None => default_subscriber_reminders(),
            },
            trial_reminder_days: match var("TRIAL_REMINDER_DAYS") {
                Some(raw) => parse_days(&raw).context("TRIAL_REMINDER_DAYS")?,
                None => default_trial_reminders(),
            },
            expiration_interval_secs: parsed("EXPIRATION_INTERVAL_SECS")?.unwrap_or_else(default_expiration_interval),
            trial_interval_secs: parsed("TRIAL_INTERVAL_SECS")?.unwrap_or_else(default_daily_interval),
            reminder_interval_secs: parsed("REMINDER_INTERVAL_SECS")?.unwrap_or_else(default_daily_interval),
            bot_sync_interval_secs: parsed("BOT_SYNC_INTERVAL_SECS")?.unwrap_or_else(default_bot_sync_interval),
            invoice_expiration_minutes: parsed("INVOICE_EXPIRATION_MINUTES")?
                .map(|v| v as i64)
                .unwrap_or_else(default_invoice_expiration),
        };
        Ok(config.normalized())
    }

    /// Blank secrets count as unset.
    fn normalized(mut self) -> Self {
        for secret in [
            &mut self.main_bot_token,
            &mut self.admin_api_key,
            &mut self.nowpayments_api_key,
            &mut self.nowpayments_ipn_secret,
            &mut self.nowpayments_ipn_callback_url,
            &mut self.credential_key,
        ] {
            if secret.as_deref().is_some_and(|s| s.trim().is_empty()) {
                *secret = None;
            }
        }
        self
    }

    pub fn interval(secs: u64) -> Duration {
        Duration::from_secs(secs.max(1))
    }
}

fn parse_days(raw: &str) -> Result<Vec<i32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i32>().with_context(|| format!("invalid lead time '{s}'")))
        .collect()
}
