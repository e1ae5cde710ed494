pub mod request_id;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::controllers::{audiobook::AudiobookController, health};
use crate::infrastructure::config::Config;
use crate::infrastructure::db::DbPool;

pub use request_id::{request_id_middleware, RequestId, X_REQUEST_ID};

/// Build the application router
pub fn build_router(
    pool: Option<Arc<DbPool>>,
    audiobook_controller: Arc<AudiobookController>,
) -> Router {
    let audiobook_routes = Router::new()
        .route(
            "/api/audiobooks",
            get(AudiobookController::list).post(AudiobookController::submit),
        )
        .route(
            "/api/audiobooks/:id",
            get(AudiobookController::get_status).delete(AudiobookController::delete),
        )
        .route("/api/audiobooks/:id/events", get(AudiobookController::events))
        .route("/api/audiobooks/:id/cancel", post(AudiobookController::cancel))
        .route(
            "/api/audiobooks/:id/duration",
            post(AudiobookController::update_duration),
        )
        .with_state(audiobook_controller);

    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::health_ready))
        .with_state(pool)
        .merge(audiobook_routes)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server with all routes configured
pub async fn start_http_server(
    config: Arc<Config>,
    router: Router,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = if config.is_development() {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };

    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.host, config.port)).await?;

    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
