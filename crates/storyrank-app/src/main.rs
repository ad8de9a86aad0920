//! Storyrank application entry point.
//!
//! Wires the feed client, embedding provider, vector store, ingestion worker
//! and query API together, then waits for a termination signal.

mod cli;

use std::sync::Arc;

use clap::Parser;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use storyrank_api::{start_server, AppState};
use storyrank_core::config::StoryrankConfig;
use storyrank_core::error::StoryrankError;
use storyrank_core::shutdown::ShutdownSignal;
use storyrank_feed::HackerNewsClient;
use storyrank_storage::Database;
use storyrank_vector::pipeline::IngestSettings;
use storyrank_vector::{build_provider, IngestionPipeline, SqliteVectorStore, VectorStore};

use crate::cli::CliArgs;

type ServerHandle = JoinHandle<Result<(), StoryrankError>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    let env = |key: &str| std::env::var(key).ok();

    // Config.
    let config_file = args.resolve_config_path(env);
    let file_found = config_file.exists();
    let mut config = if file_found {
        StoryrankConfig::load(&config_file)?
    } else {
        StoryrankConfig::default()
    };
    args.apply_overrides(&mut config, env);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Storyrank v{}", env!("CARGO_PKG_VERSION"));
    if file_found {
        tracing::info!(path = %config_file.display(), "Configuration loaded");
    } else {
        tracing::info!(path = %config_file.display(), "No configuration file, using defaults");
    }

    config.validate()?;

    // Storage. Only the worker clears the store; an API-only process must
    // not wipe items a separate worker is writing.
    let reset = config.storage.reset_on_start && args.mode.runs_worker();
    let db = Arc::new(Database::open(&config.storage.db_path, reset)?);
    let store = Arc::new(SqliteVectorStore::new(Arc::clone(&db))?);
    tracing::info!(
        path = %config.storage.db_path.display(),
        items = store.count().await?,
        "Vector store ready"
    );

    // Embeddings.
    let embedder = build_provider(&config.embedding)?;

    let shutdown = ShutdownSignal::new();

    // Ingestion worker.
    let mut worker = None;
    if args.mode.runs_worker() {
        if config.ingest.enabled {
            let feed = Arc::new(HackerNewsClient::new(&config.feed)?);
            let pipeline = IngestionPipeline::new(
                feed,
                Arc::clone(&embedder),
                store.clone(),
                IngestSettings::from_config(&config.ingest, &config.feed),
                shutdown.clone(),
            );
            worker = Some(tokio::spawn(async move { pipeline.run().await }));
        } else {
            tracing::info!("Ingestion disabled by configuration");
        }
    }

    // Query API.
    let mut server: Option<ServerHandle> = None;
    if args.mode.runs_api() {
        let api_config = config.api.clone();
        let state = AppState::new(config.clone(), Arc::clone(&embedder), store.clone());
        let server_shutdown = shutdown.clone();
        server = Some(tokio::spawn(async move {
            start_server(&api_config, state, server_shutdown).await
        }));
    }

    let early_exit = tokio::select! {
        _ = wait_for_signal() => None,
        result = server_exit(&mut server) => Some(result),
    };

    let mut exit_error = None;
    match early_exit {
        None => tracing::info!("Shutdown signal received"),
        Some(result) => {
            server = None;
            if let Err(e) = result {
                tracing::error!(error = %e, "API server exited");
                exit_error = Some(e);
            }
        }
    }

    shutdown.trigger();

    let grace = config.api.shutdown_grace();
    let drain = async {
        if let Some(handle) = server {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "API server error during shutdown"),
                Err(e) => tracing::error!(error = %e, "API server task failed"),
            }
        }
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Ingestion task failed");
            }
        }
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        tracing::warn!(
            grace_secs = grace.as_secs(),
            "Shutdown grace period elapsed; abandoning in-flight work"
        );
    }

    // Any in-progress write holds the connection lock, so this waits for it.
    store.close().await?;
    tracing::info!("Storyrank stopped");

    match exit_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Resolve when the server task finishes. Pending forever when no server runs.
async fn server_exit(server: &mut Option<ServerHandle>) -> Result<(), StoryrankError> {
    match server {
        Some(handle) => match handle.await {
            Ok(result) => result,
            Err(e) => Err(StoryrankError::Api(format!("Server task failed: {}", e))),
        },
        None => std::future::pending().await,
    }
}

/// Wait for Ctrl-C, or SIGTERM on unix.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
