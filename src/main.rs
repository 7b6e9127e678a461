//! Application entry point.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mobile_money_gateway::api::{RateLimitConfig, create_router, create_router_with_rate_limit};
use mobile_money_gateway::app::{
    AppState, ProviderRegistry, SchedulerConfig, ServiceConfig, WorkerConfig, spawn_scheduler,
    spawn_worker_pool,
};
use mobile_money_gateway::domain::Provider;
use mobile_money_gateway::infra::{
    AirtelConfig, AirtelProvider, HttpCallbackClient, MtnConfig, MtnProvider, PostgresClient,
    PostgresConfig, PostgresJobQueue, TracingAuditLogger, TracingUsageRecorder,
};

/// Application configuration
struct Config {
    database_url: String,
    host: String,
    port: u16,
    enable_rate_limiting: bool,
    rate_limit_config: RateLimitConfig,
    worker_config: WorkerConfig,
    scheduler_config: SchedulerConfig,
    service_config: ServiceConfig,
    provider_timeout: Duration,
    callback_timeout: Duration,
    callback_signing_secret: Option<SecretString>,
    mtn: Option<MtnConfig>,
    airtel: Option<AirtelConfig>,
    webhook_secrets: HashMap<Provider, SecretString>,
    json_logs: bool,
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    env_opt(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let host = env_opt("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = env_or("PORT", 3000u16);
        let provider_timeout = Duration::from_secs(env_or("PROVIDER_TIMEOUT_SECS", 30u64));
        let callback_timeout = Duration::from_secs(env_or("CALLBACK_TIMEOUT_SECS", 10u64));

        let worker_config = WorkerConfig {
            enabled: env_flag("ENABLE_BACKGROUND_WORKER", true),
            poll_interval: Duration::from_millis(env_or("WORKER_POLL_INTERVAL_MS", 1000u64)),
            batch_size: env_or("WORKER_BATCH_SIZE", 10i64).max(1),
            concurrency: env_or("WORKER_CONCURRENCY", 4usize).max(1),
        };

        let reconciliation_hour_utc = env_or("RECONCILIATION_HOUR_UTC", 2u32);
        if reconciliation_hour_utc > 23 {
            anyhow::bail!("RECONCILIATION_HOUR_UTC must be 0-23, got {reconciliation_hour_utc}");
        }
        let scheduler_config = SchedulerConfig {
            reconciliation_hour_utc,
            ..Default::default()
        };

        let service_config = ServiceConfig {
            currency: env_opt("CURRENCY").unwrap_or_else(|| "ZMW".to_string()),
            payment_ttl: chrono::Duration::minutes(env_or("PAYMENT_TTL_MINUTES", 30i64).max(1)),
            ..Default::default()
        };

        let mtn = match (
            env_opt("MTN_API_USER"),
            env_opt("MTN_API_KEY"),
            env_opt("MTN_SUBSCRIPTION_KEY"),
        ) {
            (Some(user), Some(key), Some(subscription)) => {
                let mut config =
                    MtnConfig::new(user, SecretString::from(key), SecretString::from(subscription));
                if let Some(url) = env_opt("MTN_BASE_URL") {
                    config.base_url = url;
                }
                if let Some(target) = env_opt("MTN_TARGET_ENVIRONMENT") {
                    config.target_environment = target;
                }
                config.timeout = provider_timeout;
                Some(config)
            }
            _ => None,
        };

        let airtel = match (env_opt("AIRTEL_CLIENT_ID"), env_opt("AIRTEL_CLIENT_SECRET")) {
            (Some(id), Some(secret)) => {
                let mut config = AirtelConfig::new(id, SecretString::from(secret));
                if let Some(url) = env_opt("AIRTEL_BASE_URL") {
                    config.base_url = url;
                }
                if let Some(country) = env_opt("AIRTEL_COUNTRY") {
                    config.country = country;
                }
                config.currency = service_config.currency.clone();
                config.timeout = provider_timeout;
                Some(config)
            }
            _ => None,
        };

        let webhook_secrets = [
            (Provider::Mtn, "MTN_WEBHOOK_SECRET"),
            (Provider::Airtel, "AIRTEL_WEBHOOK_SECRET"),
        ]
        .into_iter()
        .filter_map(|(provider, key)| env_opt(key).map(|s| (provider, SecretString::from(s))))
        .collect();

        Ok(Self {
            database_url,
            host,
            port,
            enable_rate_limiting: env_flag("ENABLE_RATE_LIMITING", false),
            rate_limit_config: RateLimitConfig::from_env(),
            worker_config,
            scheduler_config,
            service_config,
            provider_timeout,
            callback_timeout,
            callback_signing_secret: env_opt("CALLBACK_SIGNING_SECRET").map(SecretString::from),
            mtn,
            airtel,
            webhook_secrets,
            json_logs: env_opt("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        })
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

fn build_registry(config: &mut Config) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    match config.mtn.take() {
        Some(mtn) => {
            info!(base_url = %mtn.base_url, env = %mtn.target_environment, "   ✓ MTN adapter configured");
            registry = registry.with(Arc::new(
                MtnProvider::new(mtn).context("Failed to build MTN adapter")?,
            ));
        }
        None => warn!("   ○ MTN adapter disabled (MTN_API_USER/MTN_API_KEY/MTN_SUBSCRIPTION_KEY not set)"),
    }

    match config.airtel.take() {
        Some(airtel) => {
            info!(base_url = %airtel.base_url, country = %airtel.country, "   ✓ Airtel adapter configured");
            registry = registry.with(Arc::new(
                AirtelProvider::new(airtel).context("Failed to build Airtel adapter")?,
            ));
        }
        None => warn!("   ○ Airtel adapter disabled (AIRTEL_CLIENT_ID/AIRTEL_CLIENT_SECRET not set)"),
    }

    if registry.is_empty() {
        warn!("No provider adapters configured; every payment request will be rejected");
    }
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let mut config = Config::from_env()?;
    init_tracing(config.json_logs);

    info!("Mobile Money Gateway v{}", env!("CARGO_PKG_VERSION"));

    let postgres_client = PostgresClient::new(&config.database_url, PostgresConfig::default()).await?;
    postgres_client.run_migrations().await?;
    info!("   ✓ Database connected and migrations applied");

    let queue = Arc::new(PostgresJobQueue::new(postgres_client.pool().clone()));
    let registry = build_registry(&mut config)?;

    for provider in Provider::ALL {
        if !config.webhook_secrets.contains_key(&provider) {
            warn!(%provider, "   ○ No webhook secret; deliveries for this provider will be rejected");
        }
    }

    let app_state = AppState::new(
        Arc::new(postgres_client),
        queue.clone(),
        registry,
        Arc::new(TracingAuditLogger),
        Arc::new(TracingUsageRecorder),
        config.service_config.clone(),
    )
    .with_webhook_secrets(std::mem::take(&mut config.webhook_secrets));

    let callbacks = Arc::new(
        HttpCallbackClient::new(config.callback_timeout, config.callback_signing_secret.take())
            .context("Failed to build callback client")?,
    );
    let job_context = app_state.job_context(callbacks);
    let app_state = Arc::new(app_state);

    let worker_shutdown_tx = if config.worker_config.enabled {
        let (_handles, shutdown_tx) = spawn_worker_pool(job_context, config.worker_config.clone());
        info!(
            concurrency = config.worker_config.concurrency,
            "   ✓ Background workers started"
        );
        Some(shutdown_tx)
    } else {
        info!("   ○ Background workers disabled");
        None
    };

    let (_scheduler_handle, scheduler_shutdown_tx) =
        spawn_scheduler(queue, config.scheduler_config.clone());
    info!(
        hour_utc = config.scheduler_config.reconciliation_hour_utc,
        "   ✓ Reconciliation scheduler started"
    );

    let router = if config.enable_rate_limiting {
        create_router_with_rate_limit(app_state, config.rate_limit_config)
    } else {
        info!("   ○ Rate limiting disabled");
        create_router(app_state)
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(provider_timeout_secs = config.provider_timeout.as_secs(), "Server starting on http://{}", addr);
    info!("Swagger UI available at http://{}/swagger-ui", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(tx) = worker_shutdown_tx {
        let _ = tx.send(true);
    }
    let _ = scheduler_shutdown_tx.send(true);

    info!("Server shutdown complete");
    Ok(())
}
