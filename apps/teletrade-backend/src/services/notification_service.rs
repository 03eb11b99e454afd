use chrono::{DateTime, Utc};
use teloxide::utils::html;

/// Renders the HTML messages sent to subscribers and clients.
#[derive(Debug, Clone)]
pub struct NotificationService {
    platform_name: String,
    main_bot_username: Option<String>,
}

fn format_date(date: DateTime<Utc>) -> String {
    date.format("%b %-d, %Y").to_string()
}

fn plural_days(days: i64) -> String {
    if days == 1 { "1 day".to_string() } else { format!("{days} days") }
}

impl NotificationService {
    pub fn new(platform_name: impl Into<String>, main_bot_username: Option<String>) -> Self {
        Self {
            platform_name: platform_name.into(),
            main_bot_username,
        }
    }

    fn with_footer(&self, body: String) -> String {
        let name = html::escape(&self.platform_name);
        let footer = match &self.main_bot_username {
            Some(username) => format!(
                "<i>Powered by</i> <a href=\"https://t.me/{}\">{}</a>",
                html::escape(username),
                name
            ),
            None => format!("<i>Powered by</i> {name}"),
        };
        format!("{body}\n\n{footer}")
    }

    pub fn access_granted(&self, invite_link: &str, end_date: Option<DateTime<Utc>>) -> String {
        let expires = end_date.map(format_date).unwrap_or_else(|| "N/A".to_string());
        self.with_footer(format!(
            "✅ <b>Payment Confirmed!</b>\n\nYour subscription is now active.\n\n🔗 <b>Join the channel:</b> {}\n\n📅 <b>Expires:</b> {}",
            html::link(invite_link, "Click here"),
            expires
        ))
    }

    pub fn access_revoked(&self, reason: &str) -> String {
        self.with_footer(format!(
            "⚠️ <b>Subscription Ended</b>\n\nYour access to the premium channel has ended.\n\n{}\n\nUse /plans to renew.",
            html::escape(reason)
        ))
    }

    pub fn join_declined(&self) -> String {
        self.with_footer(
            "❌ <b>Join Request Declined</b>\n\nYou don't have an active subscription.\n\nUse /plans to view subscription options."
                .to_string(),
        )
    }

    pub fn subscribe_first(&self) -> String {
        self.with_footer(
            "❌ <b>Join Request Declined</b>\n\nPlease start the bot and subscribe first.\n\nUse /start to begin.".to_string(),
        )
    }

    pub fn renewal_reminder(&self, days_left: i32, end_date: DateTime<Utc>) -> String {
        self.with_footer(format!(
            "⏰ <b>Subscription Expiring Soon</b>\n\nYour subscription ends in <b>{}</b>.\n\n📅 <b>End Date:</b> {}\n\nUse /plans to renew and keep your access.",
            plural_days(i64::from(days_left)),
            format_date(end_date)
        ))
    }

    pub fn trial_reminder(&self, days_left: i32, end_date: DateTime<Utc>) -> String {
        self.with_footer(format!(
            "⏳ <b>Trial Ending Soon</b>\n\nYour free trial ends in <b>{}</b>.\n\n📅 <b>End Date:</b> {}\n\nAfter your trial ends your selling bots will be paused. Upgrade to keep selling.",
            plural_days(i64::from(days_left)),
            format_date(end_date)
        ))
    }

    pub fn trial_expired(&self, trial_days: i64) -> String {
        self.with_footer(format!(
            "⚠️ <b>Trial Expired</b>\n\nYour {}-day free trial has ended.\n\nYour selling bots have been paused. Existing subscriber subscriptions will continue until their individual expiration.\n\nTo continue using {} and reactivate your bots, please upgrade to a paid plan.",
            trial_days,
            html::escape(&self.platform_name)
        ))
    }

    pub fn platform_activated(&self, end_date: Option<DateTime<Utc>>, reactivated_bots: usize) -> String {
        let expires = end_date.map(format_date).unwrap_or_else(|| "N/A".to_string());
        self.with_footer(format!(
            "✅ <b>Platform Subscription Active</b>\n\n📅 <b>Renews by:</b> {}\n🤖 <b>Bots reactivated:</b> {}",
            expires, reactivated_bots
        ))
    }

    pub fn platform_lapsed(&self) -> String {
        self.with_footer(
            "⚠️ <b>Platform Subscription Expired</b>\n\nYour selling bots have been paused. Existing subscriber subscriptions will continue until their individual expiration.\n\nRenew your plan to reactivate them."
                .to_string(),
        )
    }
}
