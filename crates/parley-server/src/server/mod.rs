use crate::auth::NativeUserStore;
use crate::config::ServerConfig;
use crate::db::Database;
use crate::messages::MessageRepository;
use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use parley_core::{RouterConfig, SessionRegistry};
use serde_json::json;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

mod routes;

/// Session router bound to the server's stores.
pub type SessionRouter = parley_core::Router<NativeUserStore, MessageRepository>;

/// Server application state
pub struct AppState {
    /// Identity and message database
    pub db: Arc<Database>,
    /// Username/password identities
    pub users: Arc<NativeUserStore>,
    /// Durable message log
    pub messages: Arc<MessageRepository>,
    /// Shared session router (owns the session registry)
    pub router: SessionRouter,
}

impl AppState {
    pub fn new(db: Arc<Database>, router_config: RouterConfig) -> Self {
        let users = Arc::new(NativeUserStore::new(Arc::clone(&db)));
        let messages = Arc::new(MessageRepository::new(Arc::clone(&db)));
        let registry = Arc::new(SessionRegistry::new());
        let router = SessionRouter::new(
            registry,
            Arc::clone(&users),
            Arc::clone(&messages),
            router_config,
        );

        Self {
            db,
            users,
            messages,
            router,
        }
    }

    /// The live session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.router.registry()
    }
}

/// Bind the HTTP listener and serve until Ctrl-C.
pub async fn start(db: Arc<Database>, config: ServerConfig) -> Result<()> {
    let state = Arc::new(AppState::new(db, config.router.clone()));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "Bound HTTP listener");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("HTTP server received shutdown signal, draining connections");
        })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(Arc::clone(&state))
        .merge(routes::auth::router(Arc::clone(&state)))
        .merge(routes::messages::router(Arc::clone(&state)))
        .merge(routes::websocket::router(state))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
}

/// Health check endpoint (for load balancers)
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let registry = state.registry();
    let online_sessions = registry.session_count();
    let mut online_users = registry.online_usernames();
    online_users.sort();
    let duplicate_login = state.router.config().duplicate_login.to_string();

    match state.db.health_check().await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "service": "parley-server",
                "version": env!("CARGO_PKG_VERSION"),
                "online_sessions": online_sessions,
                "online_users": online_users,
                "duplicate_login": duplicate_login,
            })),
        ),
        Ok(false) => {
            warn!("Health check: database unhealthy");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "parley-server",
                    "version": env!("CARGO_PKG_VERSION"),
                    "online_sessions": online_sessions,
                "online_users": online_users,
                "duplicate_login": duplicate_login,
                    "error": "database unhealthy"
                })),
            )
        }
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "parley-server",
                    "version": env!("CARGO_PKG_VERSION"),
                    "online_sessions": online_sessions,
                "online_users": online_users,
                "duplicate_login": duplicate_login,
                    "error": format!("database error: {}", e)
                })),
            )
        }
    }
}
