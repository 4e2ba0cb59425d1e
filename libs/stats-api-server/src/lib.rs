mod http;
pub mod ownership;
pub mod service;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tokio_util::sync::CancellationToken;

use stats_api::StatsError;

pub use ownership::{DEFAULT_LOOKUP_TIMEOUT, HttpOwnershipClient};
pub use service::StatsService;

#[derive(Clone)]
struct AppState {
    service: Arc<StatsService>,
}

/// Маршруты query endpoint'а поверх `service`.
pub fn router(service: Arc<StatsService>) -> Router {
    Router::new()
        .route("/health", get(http::handle_health))
        .route("/api/stats/posts", get(http::handle_post_stats_query))
        .route("/api/stats/posts/{post_id}", get(http::handle_post_stats))
        .route("/api/stats/top-posts", get(http::handle_top_posts))
        .route("/api/stats/top-users", get(http::handle_top_users))
        .with_state(AppState { service })
}

/// HTTP API агрегатов. Возвращается после отмены `shutdown`, когда
/// открытые запросы завершены.
pub async fn run(
    addr: &str,
    service: Arc<StatsService>,
    shutdown: CancellationToken,
) -> Result<(), StatsError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| StatsError::io(format!("bind api {addr}: {e}")))?;
    tracing::info!(addr = %addr, "stats api listening");

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| StatsError::io(format!("axum serve: {e}")))?;

    tracing::info!("stats api stopped");
    Ok(())
}
