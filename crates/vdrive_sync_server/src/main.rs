use axum::{
    Router,
    extract::Extension,
    http::{Method, header},
    routing::get,
};
use rusqlite::Connection;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vdrive_sync_server::{
    auth::{AuthExtractor, SessionAuthority, SqliteSessionAuthority},
    channel::{ChannelRegistry, ChannelState},
    config::Config,
    db::{Repo, init_database},
    handlers::{ApiState, api_routes, channel_routes},
    scene_engine::SceneEngine,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vdrive_sync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting VDrive Sync Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Database path: {:?}", config.database_path);
    info!("CORS origins: {:?}", config.cors_origins);

    // Initialize database
    let conn = match Connection::open(&config.database_path) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_database(&conn) {
        error!("Failed to initialize database: {}", e);
        std::process::exit(1);
    }

    let repo = match Repo::new(conn) {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to read store clock: {}", e);
            std::process::exit(1);
        }
    };

    // Create shared state
    let authority: Arc<dyn SessionAuthority> = Arc::new(SqliteSessionAuthority::new(repo.clone()));
    let auth_extractor = AuthExtractor::new(authority.clone());
    let registry = Arc::new(ChannelRegistry::new());
    let scenes = SceneEngine::new(repo.clone(), registry.clone(), config.scene_debounce());

    info!(
        "Scene debounce: {}ms, heartbeat: {}s, batch limit: {}",
        config.scene_debounce_ms, config.heartbeat_interval_secs, config.max_batch_operations
    );

    let api_state = ApiState {
        repo: repo.clone(),
        registry: registry.clone(),
        max_batch_operations: config.max_batch_operations,
    };

    let channel_state = ChannelState {
        repo: repo.clone(),
        authority,
        registry: registry.clone(),
        scenes: scenes.clone(),
        heartbeat_interval: config.heartbeat_interval(),
    };

    // Build CORS layer
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .allow_origin(AllowOrigin::list(origins));

    // Build the router
    let app = Router::new()
        // Health check
        .route("/", get(|| async { "VDrive Sync Server" }))
        .route("/health", get(|| async { "OK" }))
        // API routes
        .nest("/api", api_routes(api_state))
        // Real-time channel
        .merge(channel_routes(channel_state))
        // Add layers
        .layer(Extension(auth_extractor))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Create listener
    let addr = config.server_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Server listening on http://{}", addr);

    // Start cleanup task
    let cleanup_repo = repo.clone();
    let cleanup_interval = config.session_cleanup_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            interval.tick().await;
            match cleanup_repo.cleanup_expired_sessions() {
                Ok(removed) => info!("Cleaned up {} expired sessions", removed),
                Err(e) => error!("Session cleanup failed: {}", e),
            }
        }
    });

    // Run server with graceful shutdown
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    // Commit scene updates still inside their debounce window
    let flushed = scenes.flush();
    if flushed > 0 {
        info!("Flushed {} pending scene updates", flushed);
    }
    let closed = registry.close_all();
    info!("Closed {} channel connections", closed);

    info!("Server shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
