use anyhow::Context;
use jetset_api::{app, state::{AppState, AuthConfig}};
use jetset_booking::{DeadlineReaper, DispatchHandle, DispatchPolicy, LifecyclePolicy, QuoteLifecycle, SideEffectDispatcher};
use jetset_core::events::{EventPublisher, NoopEventPublisher};
use jetset_core::SystemClock;
use jetset_store::app_config::LifecycleConfig;
use jetset_store::{
    Config, DbClient, EventProducer, HttpDocumentGenerator, HttpNotifier, PgEffectOutbox,
    PgPaymentRepository, PgQuoteRepository, PgSeatAllocator, RedisClient,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn lifecycle_policy(rules: &LifecycleConfig) -> LifecyclePolicy {
    LifecyclePolicy {
        unconfirmed_hold_ttl: chrono::Duration::minutes(rules.unconfirmed_hold_minutes),
        ..LifecyclePolicy::default()
    }
}

fn dispatch_policy(rules: &LifecycleConfig) -> DispatchPolicy {
    DispatchPolicy {
        max_attempts: rules.dispatch_max_attempts,
        base_backoff: chrono::Duration::seconds(rules.dispatch_base_backoff_seconds),
        max_backoff: chrono::Duration::seconds(rules.dispatch_max_backoff_seconds),
        poll_interval: Duration::from_secs(rules.dispatch_poll_seconds),
        ..DispatchPolicy::default()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jetset_api=debug,jetset_booking=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Jetset API on port {}", config.server.port);

    // Postgres
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;
    let rules = db
        .fetch_lifecycle_rules(config.lifecycle.clone())
        .await
        .context("Failed to load business rules")?;
    tracing::info!(?rules, "Lifecycle rules loaded");

    // Kafka
    let publisher: Arc<dyn EventPublisher> = match &config.kafka {
        Some(kafka) => Arc::new(
            EventProducer::new(&kafka.brokers, &kafka.topic).context("Failed to create Kafka producer")?,
        ),
        None => {
            tracing::warn!("Kafka not configured, transition events are not published");
            Arc::new(NoopEventPublisher)
        }
    };

    // Redis
    let rate_limiter = match &config.redis {
        Some(redis) => Some(Arc::new(
            RedisClient::new(&redis.url, redis.rate_limit_per_minute).context("Invalid Redis URL")?,
        )),
        None => None,
    };

    let timeout = Duration::from_secs(config.services.timeout_seconds);
    let documents = Arc::new(
        HttpDocumentGenerator::new(&config.services.document_generator_url, timeout)
            .context("Failed to build document generator client")?,
    );
    let notifier = Arc::new(
        HttpNotifier::new(&config.services.notifier_url, timeout).context("Failed to build notifier client")?,
    );

    let pool = db.pool();
    let clock = Arc::new(SystemClock);
    let effects = DispatchHandle::new(Arc::new(PgEffectOutbox::new(pool.clone())));
    let lifecycle = Arc::new(
        QuoteLifecycle::new(
            Arc::new(PgQuoteRepository::new(pool.clone())),
            Arc::new(PgPaymentRepository::new(pool.clone())),
            Arc::new(PgSeatAllocator::new(pool)),
            effects.clone(),
            clock.clone(),
        )
        .with_publisher(publisher)
        .with_policy(lifecycle_policy(&rules)),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = SideEffectDispatcher::new(effects, documents, notifier, clock, dispatch_policy(&rules));
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_rx.clone()));

    let reaper = DeadlineReaper::new(lifecycle.clone(), Duration::from_secs(rules.reaper_interval_seconds));
    let reaper_task = tokio::spawn(reaper.run(shutdown_rx));

    let app_state = AppState {
        lifecycle,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            issuer: config.auth.jwt_issuer.clone(),
        },
        rate_limiter,
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(
        listener,
        app(app_state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown signal received");
    })
    .await
    .context("Server error")?;

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(dispatcher_task, reaper_task);
    tracing::info!("Background workers stopped");
    Ok(())
}
