mod bot_manager;
mod config;
mod crypto;
mod handlers;
mod jobs;
mod services;

#[cfg(test)]
mod testing;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use clap::{Parser, Subcommand};
use teloxide::prelude::*;
use teletrade_db::{init_db, LedgerStore, PgLedger};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bot_manager::BotSupervisor;
use config::BackendConfig;
use crypto::CredentialCipher;
use jobs::expiration::ExpirationJob;
use jobs::reminders::ReminderJob;
use jobs::trial::TrialJob;
use jobs::{JobKind, Lifecycle, Scheduler, SchedulerIntervals};
use services::access_control::AccessControlService;
use services::catalog_service::CatalogService;
use services::client_service::ClientService;
use services::messaging::{GatewayProvider, MessagingGateway, TelegramGateway};
use services::notification_service::NotificationService;
use services::payment::nowpayments::NowPaymentsProvider;
use services::payment_service::{PaymentService, PaymentServiceConfig};

const MAX_BODY_BYTES: usize = 256 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn LedgerStore>,
    pub payments: PaymentService,
    pub access: Arc<AccessControlService>,
    pub clients: Arc<ClientService>,
    pub catalog: Arc<CatalogService>,
    pub lifecycle: Arc<Lifecycle>,
    pub admin_api_key: Option<Arc<str>>,
    pub trial_days: i64,
}

#[derive(Parser)]
#[command(name = "teletrade")]
#[command(about = "TeleTrade subscription backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server, scheduler and selling bots
    Serve,
    /// Run one lifecycle sweep now and print its report
    RunJob {
        #[arg(value_enum)]
        job: JobKind,
    },
    /// Seal a bot token or API key with CREDENTIAL_KEY
    SealToken {
        /// Value to seal
        plaintext: String,
    },
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/webhooks/nowpayments", post(handlers::webhooks::nowpayments_ipn))
        .nest("/api", handlers::api::routes(state.clone()))
        .with_state(state)
        .layer(tower_http::limit::RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(tower_http::set_header::SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            axum::http::HeaderValue::from_static("nosniff"),
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Everything `serve` and `run-job` share.
struct Engine {
    state: AppState,
    supervisor: Arc<BotSupervisor>,
}

async fn main_bot(token: Option<&str>) -> (Option<Arc<dyn MessagingGateway>>, Option<String>) {
    let Some(token) = token else {
        warn!("MAIN_BOT_TOKEN is not set, client notifications are disabled");
        return (None, None);
    };
    let bot = Bot::new(token);
    let username = match bot.get_me().await {
        Ok(me) => me.user.username.clone(),
        Err(e) => {
            warn!("Failed to validate main bot token: {}", e);
            None
        }
    };
    if let Some(username) = &username {
        info!("Main bot username initialized: @{}", username);
    }
    (Some(Arc::new(TelegramGateway::new(bot))), username)
}

async fn build_engine(config: &BackendConfig) -> Result<Engine> {
    let pool = init_db(&config.database_url, config.database_max_connections).await?;
    info!("Database initialized successfully.");
    let ledger: Arc<dyn LedgerStore> = Arc::new(PgLedger::new(pool));

    let cipher = Arc::new(CredentialCipher::from_base64(config.credential_key.as_deref())?);
    if !cipher.has_key() {
        warn!("CREDENTIAL_KEY is not set, only plaintext credentials can be used");
    }

    let (platform, main_bot_username) = main_bot(config.main_bot_token.as_deref()).await;
    let notifications = Arc::new(NotificationService::new(config.platform_name.clone(), main_bot_username));
    let supervisor = Arc::new(BotSupervisor::new(ledger.clone(), cipher.clone(), platform));
    let gateways: Arc<dyn GatewayProvider> = supervisor.clone();

    let access = Arc::new(AccessControlService::new(ledger.clone(), gateways.clone(), notifications.clone()));
    if config.nowpayments_ipn_secret.is_none() {
        warn!("NOWPAYMENTS_IPN_SECRET is not set, payment webhooks will be rejected");
    }
    let provider = Arc::new(NowPaymentsProvider::new(config.nowpayments_ipn_secret.clone())?);
    let payments = PaymentService::new(
        ledger.clone(),
        provider,
        access.clone(),
        gateways.clone(),
        notifications.clone(),
        cipher,
        PaymentServiceConfig {
            platform_api_key: config.nowpayments_api_key.clone(),
            ipn_callback_url: config.nowpayments_ipn_callback_url.clone(),
            invoice_expiration_minutes: config.invoice_expiration_minutes,
        },
    );

    let lifecycle = Arc::new(Lifecycle::new(
        ExpirationJob::new(ledger.clone(), access.clone()),
        TrialJob::new(
            ledger.clone(),
            gateways.clone(),
            notifications.clone(),
            config.trial_duration_days,
            config.trial_reminder_days.clone(),
        ),
        ReminderJob::new(ledger.clone(), gateways, notifications, config.subscriber_reminder_days.clone()),
    ));

    let state = AppState {
        clients: Arc::new(ClientService::new(ledger.clone())),
        catalog: Arc::new(CatalogService::new(ledger.clone())),
        ledger,
        payments,
        access,
        lifecycle,
        admin_api_key: config.admin_api_key.as_deref().map(Arc::from),
        trial_days: config.trial_duration_days,
    };
    Ok(Engine { state, supervisor })
}

async fn run_server(config: BackendConfig) -> Result<()> {
    let Engine { state, supervisor } = build_engine(&config).await?;
    if state.admin_api_key.is_none() {
        warn!("ADMIN_API_KEY is not set, the admin API will reject every request");
    }

    if let Err(e) = supervisor.reconcile(&state.access).await {
        error!("Initial bot sync failed: {:#}", e);
    }
    Scheduler::new(state.lifecycle.clone(), supervisor.clone(), state.access.clone()).start(SchedulerIntervals {
        expiration: BackendConfig::interval(config.expiration_interval_secs),
        trial: BackendConfig::interval(config.trial_interval_secs),
        reminders: BackendConfig::interval(config.reminder_interval_secs),
        bot_sync: BackendConfig::interval(config.bot_sync_interval_secs),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    supervisor.stop_all().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Failed to load .env file: {}", e);
    }

    let cli = Cli::parse();

    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| ".".to_string());
    let file_appender = tracing_appender::rolling::never(log_dir, "server.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "teletrade_backend=debug,teletrade_db=info,tower_http=info,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stdout))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    let config = BackendConfig::load()?;

    match cli.command {
        Commands::Serve => run_server(config).await?,
        Commands::RunJob { job } => {
            let engine = build_engine(&config).await?;
            match engine.state.lifecycle.run(job, Utc::now()).await? {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => println!("{} is already running", job.as_str()),
            }
        }
        Commands::SealToken { plaintext } => {
            let cipher = CredentialCipher::from_base64(config.credential_key.as_deref())?;
            println!("{}", cipher.seal(&plaintext)?);
        }
    }

    Ok(())
}
