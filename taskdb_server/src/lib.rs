//! # taskdb_server
//!
//! REST, WebSocket and GraphQL front-ends over one shared [`taskdb`] store.
//!
//! Every front-end goes through the same [`TaskService`](taskdb::TaskService),
//! so a task created over GraphQL is pushed to WebSocket clients exactly like
//! one created over REST.

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES, PRAGMA};
use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, patch, post};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;

pub mod auth;
pub mod config;
pub mod error;
pub mod graphql;
pub mod realtime;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::ApiError;
pub use state::AppState;

/// Build the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/auth/register", post(routes::auth::register))
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/logout", post(routes::auth::logout))
        .route("/auth/me", get(routes::auth::me))
        .route("/tasks", get(routes::tasks::list).post(routes::tasks::create))
        .route(
            "/tasks/:id",
            get(routes::tasks::get)
                .put(routes::tasks::update)
                .delete(routes::tasks::delete),
        )
        .route("/tasks/:id/toggle", patch(routes::tasks::toggle))
        .route("/tasks/:id/upload", post(routes::tasks::upload))
        .route(
            "/tasks/:id/attachments/:filename",
            delete(routes::tasks::remove_attachment),
        )
        .route("/upload", post(routes::uploads::upload))
        .route("/uploads/:owner/:filename", get(routes::uploads::download));

    let no_cache = Router::new()
        .nest("/api", api)
        .route(
            "/graphql",
            get(graphql::graphiql).post(graphql::graphql_handler),
        )
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, proxy-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            EXPIRES,
            HeaderValue::from_static("0"),
        ));

    let mut app = Router::new()
        .merge(no_cache)
        .route("/ws", get(realtime::ws_handler))
        .route("/health", get(routes::health))
        .layer(DefaultBodyLimit::max(routes::BODY_LIMIT));

    if let Some(cors) = cors_layer(&state.config) {
        app = app.layer(cors);
    }
    if let Some(dir) = &state.config.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }
    app.with_state(state)
}

fn cors_layer(config: &Config) -> Option<CorsLayer> {
    let origin = config.cors_origin.as_deref()?;
    match origin.parse::<HeaderValue>() {
        Ok(origin) => Some(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_credentials(true)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([CONTENT_TYPE]),
        ),
        Err(e) => {
            log::warn!("Ignoring invalid CORS origin {origin:?}: {e}");
            None
        }
    }
}

/// Bind, serve until Ctrl+C or SIGTERM, then drain in-flight requests.
pub async fn serve(config: Config) -> std::io::Result<()> {
    let addr = config.addr();
    let state = AppState::new(config)?;
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    log::info!("Server running on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
        log::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                log::info!("Received SIGTERM, shutting down");
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {e}");
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
}
