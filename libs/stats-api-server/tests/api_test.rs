//! Query endpoint driven through the axum router without a socket.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::{Value, json};
use tower::Service;

use event_store::MemoryEventStore;
use stats_api::{Event, EventStore, EventType, OwnershipLookup, PostCount, StatsError};
use stats_api_server::{StatsService, router};

async fn get_json(app: &mut axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .call(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

/// Owner is `"user" + post_id`; post "p3" has none.
struct PrefixOwners;

impl OwnershipLookup for PrefixOwners {
    fn post_owner(
        &self,
        post_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, StatsError>> + Send + '_>> {
        let post_id = post_id.to_string();
        Box::pin(async move {
            if post_id == "p3" {
                return Ok(None);
            }
            Ok(Some(format!("user{post_id}")))
        })
    }
}

struct DownStore;

impl EventStore for DownStore {
    fn ensure_schema(&self) -> Pin<Box<dyn Future<Output = Result<(), StatsError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn save_event(&self, _event: &Event) -> Pin<Box<dyn Future<Output = Result<(), StatsError>> + Send + '_>> {
        Box::pin(async { Err(StatsError::io("clickhouse down")) })
    }

    fn post_stats(&self, _post_id: &str) -> Pin<Box<dyn Future<Output = Result<(i64, i64), StatsError>> + Send + '_>> {
        Box::pin(async { Err(StatsError::io("clickhouse down")) })
    }

    fn top_posts(
        &self,
        _event_type: EventType,
        _limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PostCount>, StatsError>> + Send + '_>> {
        Box::pin(async { Err(StatsError::io("clickhouse down")) })
    }

    fn likes_per_post(&self) -> Pin<Box<dyn Future<Output = Result<Vec<PostCount>, StatsError>> + Send + '_>> {
        Box::pin(async { Err(StatsError::io("clickhouse down")) })
    }
}

async fn seeded_app() -> axum::Router {
    let store = Arc::new(MemoryEventStore::new());
    let seed = [
        (EventType::View, "p1", 3),
        (EventType::View, "p2", 1),
        (EventType::Like, "p1", 7),
        (EventType::Like, "p2", 3),
        (EventType::Like, "p3", 9),
    ];
    for (event_type, post_id, times) in seed {
        for _ in 0..times {
            let event = Event {
                event_type,
                post_id: post_id.to_string(),
                timestamp: Utc::now(),
            };
            store.save_event(&event).await.unwrap();
        }
    }
    let service = StatsService::new(store, Some(Arc::new(PrefixOwners)));
    router(Arc::new(service))
}

#[tokio::test]
async fn health() {
    let mut app = seeded_app().await;
    let (status, _) = get_json(&mut app, "/health").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn post_stats_by_path_and_query() {
    let mut app = seeded_app().await;

    let (status, body) = get_json(&mut app, "/api/stats/posts/p1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"post_id": "p1", "views": 3, "likes": 7}));

    let (_, body) = get_json(&mut app, "/api/stats/posts?post_id=p2").await;
    assert_eq!(body, json!({"post_id": "p2", "views": 1, "likes": 3}));

    let (status, body) = get_json(&mut app, "/api/stats/posts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"post_id": "", "views": 0, "likes": 0}));
}

#[tokio::test]
async fn top_posts_defaults_to_views() {
    let mut app = seeded_app().await;

    let (status, body) = get_json(&mut app, "/api/stats/top-posts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"post_id": "p1", "value": 3}, {"post_id": "p2", "value": 1}]));

    let (_, body) = get_json(&mut app, "/api/stats/top-posts?metric=likes&limit=abc").await;
    assert_eq!(body.as_array().unwrap().len(), 3);
    assert_eq!(body[0], json!({"post_id": "p3", "value": 9}));

    let (_, body) = get_json(&mut app, "/api/stats/top-posts?metric=likes&limit=1").await;
    assert_eq!(body, json!([{"post_id": "p3", "value": 9}]));
}

#[tokio::test]
async fn top_posts_with_owners_keep_unowned_posts() {
    let mut app = seeded_app().await;

    let (_, body) = get_json(&mut app, "/api/stats/top-posts?metric=likes&owners=true").await;
    assert_eq!(
        body,
        json!([
            {"post_id": "p3", "value": 9, "owner_id": null},
            {"post_id": "p1", "value": 7, "owner_id": "userp1"},
            {"post_id": "p2", "value": 3, "owner_id": "userp2"},
        ])
    );
}

#[tokio::test]
async fn top_users_skip_unowned_posts() {
    let mut app = seeded_app().await;

    let (status, body) = get_json(&mut app, "/api/stats/top-users?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([{"user_id": "userp1", "likes": 7}, {"user_id": "userp2", "likes": 3}])
    );
}

#[tokio::test]
async fn store_failure_is_bad_gateway() {
    let mut app = router(Arc::new(StatsService::new(Arc::new(DownStore), None)));

    for uri in ["/api/stats/posts/p1", "/api/stats/top-posts", "/api/stats/top-users"] {
        let (status, body) = get_json(&mut app, uri).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY, "{uri}");
        assert!(body["error"].as_str().unwrap().contains("clickhouse down"), "{uri}");
    }

    // Missing id never reaches the store.
    let (status, _) = get_json(&mut app, "/api/stats/posts").await;
    assert_eq!(status, StatusCode::OK);
}
