//! mixdeck service entry point

use anyhow::{Context, Result};
use mixdeck::config::Settings;
use mixdeck::services::feature_extractor::ExtractOptions;
use mixdeck::services::task_manager::DEFAULT_MAX_CONCURRENT;
use mixdeck::services::{AnalyzerClient, ExtractorHandle, PresetLibrary, TaskManager};
use mixdeck::store::Store;
use mixdeck::{build_router, AppState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env().context("configuration error")?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if settings.debug {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("starting mixdeck {}", env!("CARGO_PKG_VERSION"));
    info!(data_root = %settings.data_root.display(), max_workers = settings.max_workers, "resolved settings");

    std::fs::create_dir_all(settings.exports_dir())
        .context("data root is not writable")?;

    let store = Store::init(&settings.cache_dir(), settings.cache_ttl_days)
        .context("failed to initialise feature store")?;
    let presets =
        PresetLibrary::new(&settings.presets_dir()).context("failed to open presets directory")?;

    let analyzer = AnalyzerClient::new(settings.analyzer_cmd.clone());
    if let Err(err) = analyzer.probe() {
        // files will fail individually; the query surface still works
        warn!(error = %err, "feature analyzer unavailable");
    }
    let extractor = ExtractorHandle::new(
        Arc::new(analyzer),
        ExtractOptions {
            analysis_timeout: Duration::from_secs(settings.analysis_timeout_secs),
        },
    );

    let tasks = TaskManager::new(DEFAULT_MAX_CONCURRENT);
    let bind_addr = settings.bind_addr();

    let state = AppState::new(settings, store, tasks, extractor, presets);
    state.tasks.spawn_sweeper();

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!("listening on http://{bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // flush the cache index; bounded well under the 5 s shutdown budget
    if let Err(err) = state.store.shutdown() {
        warn!(error = %err, "store shutdown incomplete");
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received sigterm"),
    }
}
