use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parley_api::config::Config;
use parley_api::db::kv::{KeyValueStore, MemoryStore, RedisStore};
use parley_api::db::relations::PgRelationStore;
use parley_api::AppState;

const DB_POOL_SIZE: usize = 16;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing, env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    // Connect to PostgreSQL.
    let db = parley_api::db::pool::connect(&config.database_url, DB_POOL_SIZE)
        .expect("failed to build database pool");
    let relations = Arc::new(PgRelationStore::new(db));

    // Session cookies live in Redis; without it, sessions are per-process.
    let kv: Arc<dyn KeyValueStore> = match RedisStore::connect(&config.redis_url).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            tracing::warn!(error = %err, "redis session store unavailable, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let bus = parley_api::bridge::try_with_redis(&config.redis_url).await;
    let gateway = parley_api::gateway::spawn(&config.gateway, relations.clone(), bus);

    tracing::info!(node_id = %gateway.node_id, "parley-api configured");

    let cors = match &config.cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                origin
                    .parse::<HeaderValue>()
                    .expect("CORS_ORIGIN must be a valid header value"),
            )
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
            ])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let body_limit = RequestBodyLimitLayer::new(config.max_body_bytes);
    let timeout = TimeoutLayer::new(config.handler_timeout);

    let hub = gateway.hub.clone();
    let state = AppState {
        kv,
        relations,
        config: Arc::new(config),
        hub: gateway.hub.clone(),
        emitter: gateway.emitter.clone(),
    };

    let app = Router::new()
        .merge(parley_api::routes::router())
        .layer(body_limit)
        .layer(timeout)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "parley-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received, closing gateway sessions");
            hub.shutdown().await;
        })
        .await
        .expect("server error");

    for task in gateway.tasks {
        task.abort();
    }
    tracing::info!("parley-api shut down");
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
