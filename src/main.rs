use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::extract::DefaultBodyLimit;
use tokio_util::sync::CancellationToken;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use romkeep::{
    catalog::{CatalogStore, SqliteCatalog},
    config::{self, AppConfig},
    db,
    inventory::FsInventory,
    jobs::{self, JobRunner},
    metrics::Metrics,
    providers, routes,
    scanner::Scanner,
    state::AppState,
};

/// stdout plus daily rotated files under ./logs. Dropping the guards loses buffered lines.
fn init_tracing() -> [WorkerGuard; 2] {
    std::fs::create_dir_all("logs").ok();
    let (stdout_nb, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let (file_nb, file_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily("logs", "romkeep.log"));
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(stdout_nb))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_nb))
        .init();
    [stdout_guard, file_guard]
}

async fn build_scanner(cfg: &AppConfig, catalog: Arc<dyn CatalogStore>) -> anyhow::Result<Scanner> {
    let inventory = FsInventory::from_config(&cfg.library)?;
    let registry = providers::load_registry(&cfg.providers).await;
    if registry.is_empty() {
        warn!("No metadata providers available; scans will fail until one is configured");
    } else {
        info!("Metadata providers: {:?}", registry);
    }
    Ok(Scanner::new(catalog, inventory, registry).with_platform_bindings(cfg.library.platform_bindings.clone()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guards = init_tracing();

    // embedded defaults -> romkeep.toml -> ROMKEEP_CONFIG -> env/.env
    let app_cfg = config::load()?;
    let pool = db::connect(&app_cfg.database).await?;
    let catalog: Arc<dyn CatalogStore> = Arc::new(SqliteCatalog::new(pool.clone()));
    let scanner = build_scanner(&app_cfg, catalog.clone()).await?;

    let shutdown = CancellationToken::new();
    let metrics = Metrics::new();
    let runner = JobRunner::start(scanner, &app_cfg.scan, metrics.clone(), shutdown.clone());
    if let Some(every) = app_cfg.scan.rescan_interval_secs {
        info!("Scheduled rescan every {}s", every);
        jobs::spawn_scheduled_rescan(runner.clone(), Duration::from_secs(every));
    }

    let addr: SocketAddr = format!("{}:{}", app_cfg.server.host, app_cfg.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen addr {}:{} - {}", app_cfg.server.host, app_cfg.server.port, e))?;
    let state = AppState::new(pool, app_cfg, catalog, runner, metrics);

    // the default compression predicate already leaves text/event-stream alone
    let app = routes::router(state)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());
    // separately served UI during development
    let app = if cfg!(debug_assertions) { app.layer(CorsLayer::permissive()) } else { app };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("romkeep listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // ends the worker, the running scan and with it every SSE stream
            shutdown.cancel();
        })
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received. Stopping server...");
}
