//! Composition root: builds every component and wires them together, then
//! serves the HTTP API surface. Tracing-subscriber + `EnvFilter` setup,
//! figment config load, a `socket2` `SO_REUSEADDR` listener, and graceful
//! shutdown. Config/EventBus/Store are explicit dependencies built once
//! here and threaded through `AppState` rather than process-level
//! singletons.

mod api;
mod archive;
mod cache;
mod config;
mod db;
mod driver;
mod error;
mod events;
mod presets;
mod queue;
mod scheduler;
mod sources;
mod workers;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use archive::ArchiveManager;
use cache::InfoCache;
use config::Config;
use db::Store;
use driver::process::TokioCommandBuilder;
use driver::Driver;
use events::EventBus;
use queue::{OrderKey, QueueManager, Status};
use scheduler::Scheduler;
use sources::SourceRegistry;
use workers::WorkerPool;

/// Dependencies shared by every axum handler. Every field is an `Arc`, so
/// cloning `AppState` per-request is cheap and never duplicates state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub events: Arc<EventBus>,
    pub archive: Arc<ArchiveManager>,
    pub queue: Arc<QueueManager>,
    pub workers: Arc<WorkerPool>,
    pub driver: Arc<Driver>,
    pub scheduler: Arc<Scheduler>,
    pub sources: Arc<SourceRegistry>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "dlorc=info,tower_http=info".into()),
        ))
        .init();

    tracing::info!("starting dlorc v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config::ensure_appdata_dirs() {
        tracing::error!(error = %e, "failed to create appData directories");
        std::process::exit(2);
    }

    let config_file = config::get_config_file_path();
    let config: Config = match config::load(&config_file) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(config_path = %config.paths.config_path.display(), download_path = %config.paths.download_path.display(), "configuration loaded");

    if let Err(e) = std::fs::create_dir_all(&config.paths.download_path)
        .and_then(|_| std::fs::create_dir_all(&config.paths.temp_path))
        .and_then(|_| std::fs::create_dir_all(&config.paths.config_path))
    {
        tracing::error!(error = %e, "failed to create configured data directories");
        std::process::exit(2);
    }

    let config = Arc::new(config);
    let db_path = config::get_db_path(&config.paths.config_path);
    let store = match Store::open(&db_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!(error = %e, "failed to open persistence store");
            std::process::exit(1);
        }
    };

    let events = Arc::new(EventBus::new(config.events.buffer_depth));
    let archive = Arc::new(ArchiveManager::new());
    let cache = Arc::new(InfoCache::new(config.cache.max_entries, Duration::from_secs(config.cache.default_ttl_secs)));
    let sources = Arc::new(SourceRegistry::default());
    let conditions = Arc::new(RwLock::new(Vec::new()));

    let queue = Arc::new(QueueManager::new());
    // Rehydrate in-flight/waiting items left over from a previous run: the
    // queue table is the durable source of truth, the in-memory
    // QueueManager is rebuilt from it at startup.
    match store.all_queue_items() {
        Ok(items) => {
            for item in items {
                let order = OrderKey { created_at: item.created_at, sub_index: 0 };
                queue.add(item, order).await;
            }
            tracing::info!(count = queue.all().await.len(), "rehydrated queue from persistence store");
        }
        Err(e) => tracing::error!(error = %e, "failed to rehydrate queue from persistence store"),
    }

    let worker_config = Arc::new(config.workers.clone());
    let driver = Arc::new(Driver::new(
        Arc::clone(&config),
        Arc::clone(&store),
        Arc::clone(&events),
        Arc::clone(&archive),
        Arc::clone(&cache),
        Arc::clone(&sources),
        Arc::clone(&conditions),
        TokioCommandBuilder::default(),
        Arc::clone(&worker_config),
    ));
    if let Err(e) = driver.reload_conditions().await {
        tracing::warn!(error = %e, "failed to load conditions at startup");
    }

    let workers = Arc::new(WorkerPool::new(Arc::clone(&queue), Arc::clone(&driver), worker_config));
    workers.start().await;

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&config),
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&archive),
        Arc::clone(&sources),
        Arc::clone(&events),
    ));
    let scheduler_shutdown = CancellationToken::new();
    let scheduler_handle = Arc::clone(&scheduler).spawn(scheduler_shutdown.clone());

    let state = AppState {
        config: Arc::clone(&config),
        store: Arc::clone(&store),
        events: Arc::clone(&events),
        archive: Arc::clone(&archive),
        queue: Arc::clone(&queue),
        workers: Arc::clone(&workers),
        driver: Arc::clone(&driver),
        scheduler: Arc::clone(&scheduler),
        sources: Arc::clone(&sources),
    };

    let app = axum::Router::new()
        .nest("/api", api::router())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = std::net::SocketAddr::new(config.server.host.parse().unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)), config.server.port);
    tracing::info!(%addr, "listening");

    // SO_REUSEADDR so a crash-restart doesn't have to wait out TIME_WAIT.
    use socket2::{Domain, Socket, Type};
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None).expect("failed to create socket");
    socket.set_reuse_address(true).expect("failed to set SO_REUSEADDR");
    socket.bind(&addr.into()).expect("failed to bind socket");
    socket.listen(1024).expect("failed to listen on socket");
    socket.set_nonblocking(true).expect("failed to set non-blocking mode");
    let listener = tokio::net::TcpListener::from_std(socket.into()).expect("failed to convert to tokio listener");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = server.await {
        tracing::error!(error = %e, "server exited with an error");
    }

    tracing::info!("shutting down: stopping task scheduler and worker pool");
    scheduler_shutdown.cancel();
    let _ = scheduler_handle.await;
    tokio::time::timeout(Duration::from_secs(config.workers.shutdown_grace_period_secs), workers.shutdown())
        .await
        .unwrap_or_else(|_| tracing::warn!("worker pool shutdown grace period elapsed with workers still in-flight"));

    tracing::info!("shutdown complete");
}

/// Resolves once SIGINT (or, on unix, SIGTERM) is received, so
/// `axum::serve`'s graceful-shutdown future can stop accepting new
/// connections while in-flight requests finish.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
