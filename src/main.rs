//! Chunked Upload Service
//!
//! A resumable, idempotent HTTP service for uploading large binary
//! artifacts in chunks, reassembling them server-side, verifying their
//! content digest and structure, and handing them off to a downstream
//! AI pipeline.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod routes;
mod state;
mod storage;
mod upload;

use config::{Config, StorageProvider};
use state::AppState;
use storage::{FsObjectStore, ObjectStore, S3ObjectStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chunked_upload_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env();

    tracing::info!("Starting chunked upload service v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Storage provider: {:?}", config.storage.provider);

    let store: Arc<dyn ObjectStore> = match config.storage.provider {
        StorageProvider::S3 => {
            let s3 = S3ObjectStore::new(&config.storage)
                .await
                .expect("failed to initialize S3 object store");
            Arc::new(s3)
        }
        StorageProvider::Fs => {
            let path = std::path::PathBuf::from(&config.storage.fs_base_path);
            std::fs::create_dir_all(&path).expect("failed to create fs storage directory");
            Arc::new(FsObjectStore::new(path))
        }
    };

    let db_pool = db::create_pool(&config.database.url)
        .await
        .expect("failed to initialize database");
    tracing::info!("Database initialized at {}", config.database.url);

    let app_state = AppState::new(config.clone(), store, db_pool).await;

    let sweep_handle = app_state.upload_service().clone().start_sweep_task();

    routes::health::mark_boot_time();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::upload::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    sweep_handle.abort();
    tracing::info!("Server shutdown complete");
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
