use lms_quiz_backend::{
    config::{get_config, init_config, LogFormat},
    database::{
        pg_repository::PgAttemptRepository,
        pool::{create_pool, run_migrations},
    },
    routes,
    services::{
        attempt_service::{AttemptService, EngineSettings},
        notification_service::{AttemptNotifier, NotificationService, TracingNotifier},
    },
    utils::time::SystemClock,
    AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_config()?;
    let config = get_config();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tower_http=info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    let pool = create_pool(config).await?;
    run_migrations(&pool).await?;

    let notifier: Arc<dyn AttemptNotifier> = match &config.notification_webhook_url {
        Some(url) => {
            let outbox =
                NotificationService::new(pool.clone(), url.clone(), config.webhook_secret.clone());
            let worker = outbox.clone();
            tokio::spawn(async move {
                loop {
                    match worker.run_once().await {
                        Ok(true) => {}
                        Ok(false) => {
                            tokio::time::sleep(Duration::from_millis(1000)).await;
                        }
                        Err(e) => {
                            tracing::error!(error = ?e, "Webhook worker error");
                            tokio::time::sleep(Duration::from_secs(2)).await;
                        }
                    }
                }
            });
            info!("Delivering attempt events to {}", url);
            Arc::new(outbox)
        }
        None => {
            info!("NOTIFICATION_WEBHOOK_URL not set, attempt events are only logged");
            Arc::new(TracingNotifier)
        }
    };

    let attempt_service = AttemptService::new(
        Arc::new(PgAttemptRepository::new(pool.clone())),
        notifier,
        Arc::new(SystemClock),
        EngineSettings {
            grace_seconds: config.submission_grace_seconds,
            abandon_after_seconds: config.abandon_after_seconds,
            ..EngineSettings::default()
        },
    );

    {
        let svc = attempt_service.clone();
        let interval = Duration::from_secs(config.sweep_interval_seconds.max(1));
        tokio::spawn(async move {
            loop {
                if let Err(e) = svc.sweep().await {
                    tracing::error!("Attempt sweep error: {:?}", e);
                }
                tokio::time::sleep(interval).await;
            }
        });
    }

    let app_state = AppState::new(attempt_service.clone(), config.jwt_secret.clone());
    let app = routes::create_router(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    attempt_service.shutdown_timers();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {:?}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
