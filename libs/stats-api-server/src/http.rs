use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use stats_api::StatsError;

use super::AppState;

/// Store failure surfaced to the HTTP caller as 502.
pub(crate) struct ApiError(StatsError);

impl From<StatsError> for ApiError {
    fn from(e: StatsError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, kind = %self.0.kind(), "stats query failed");
        (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "error": self.0.message() })),
        )
            .into_response()
    }
}

/// Non-numeric `limit` counts as absent.
fn parse_limit(raw: Option<&str>) -> i32 {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or(0)
}

fn parse_flag(raw: Option<&str>) -> bool {
    matches!(raw, Some("true" | "1" | "yes"))
}

// ═══════════════════════════════════════════════════════════════
//  GET /health
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ═══════════════════════════════════════════════════════════════
//  GET /api/stats/posts/{post_id}, GET /api/stats/posts?post_id=
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub(crate) struct PostStatsParams {
    post_id: Option<String>,
}

pub(crate) async fn handle_post_stats(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> Result<Response, ApiError> {
    let stats = state.service.get_post_stats(&post_id).await?;
    Ok(Json(stats).into_response())
}

pub(crate) async fn handle_post_stats_query(
    State(state): State<AppState>,
    Query(params): Query<PostStatsParams>,
) -> Result<Response, ApiError> {
    let post_id = params.post_id.unwrap_or_default();
    let stats = state.service.get_post_stats(&post_id).await?;
    Ok(Json(stats).into_response())
}

// ═══════════════════════════════════════════════════════════════
//  GET /api/stats/top-posts?metric=&limit=&owners=
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub(crate) struct TopPostsParams {
    metric: Option<String>,
    limit: Option<String>,
    owners: Option<String>,
}

pub(crate) async fn handle_top_posts(
    State(state): State<AppState>,
    Query(params): Query<TopPostsParams>,
) -> Result<Response, ApiError> {
    let metric = params.metric.unwrap_or_default();
    let limit = parse_limit(params.limit.as_deref());

    if parse_flag(params.owners.as_deref()) {
        let posts = state.service.get_top_posts_with_owners(&metric, limit).await?;
        return Ok(Json(posts).into_response());
    }
    let posts = state.service.get_top_posts(&metric, limit).await?;
    Ok(Json(posts).into_response())
}

// ═══════════════════════════════════════════════════════════════
//  GET /api/stats/top-users?limit=
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub(crate) struct TopUsersParams {
    limit: Option<String>,
}

pub(crate) async fn handle_top_users(
    State(state): State<AppState>,
    Query(params): Query<TopUsersParams>,
) -> Result<Response, ApiError> {
    let limit = parse_limit(params.limit.as_deref());
    let users = state.service.get_top_users_by_likes(limit).await?;
    Ok(Json(users).into_response())
}
