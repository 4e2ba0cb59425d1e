use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::Deserialize;

use stats_api::{OwnershipLookup, StatsError};

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct PostOwner {
    #[serde(default)]
    owner_id: Option<String>,
}

/// Клиент сервиса постов: `GET {base}/posts/{post_id}` → `{owner_id, ...}`.
///
/// Это HTTP-контракт. Сам posts-service отдаёт только gRPC `GetPost`
/// (порт 50051), поэтому `base` должен указывать на HTTP-фасад перед ним
/// (gateway, sidecar). Направленный на gRPC-порт клиент не найдёт ни
/// одного владельца: каждый lookup завершится ошибкой и будет пропущен.
#[derive(Clone)]
pub struct HttpOwnershipClient {
    client: reqwest::Client,
    base: Url,
}

impl HttpOwnershipClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StatsError> {
        let base = Url::parse(base_url)
            .map_err(|e| StatsError::config(format!("posts service url '{base_url}': {e}")))?;
        if base.cannot_be_a_base() {
            return Err(StatsError::config(format!("posts service url '{base_url}' cannot be a base")));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StatsError::config(format!("posts service client: {e}")))?;
        Ok(Self { client, base })
    }

    fn post_url(&self, post_id: &str) -> Result<Url, StatsError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StatsError::config(format!("posts service url '{}' cannot be a base", self.base)))?
            .pop_if_empty()
            .push("posts")
            .push(post_id);
        Ok(url)
    }
}

impl OwnershipLookup for HttpOwnershipClient {
    fn post_owner(
        &self,
        post_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, StatsError>> + Send + '_>> {
        let post_id = post_id.to_string();
        Box::pin(async move {
            let url = self.post_url(&post_id)?;
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| StatsError::io(format!("get post {post_id}: {e}")))?;

            if resp.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !resp.status().is_success() {
                return Err(StatsError::io(format!("get post {post_id}: status {}", resp.status())));
            }

            let post: PostOwner = resp
                .json()
                .await
                .map_err(|e| StatsError::format_err(format!("get post {post_id}: {e}")))?;
            Ok(post.owner_id.filter(|id| !id.is_empty()))
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::extract::Path;
    use axum::http::StatusCode as HttpStatus;
    use axum::response::IntoResponse;
    use axum::routing::get;

    use super::*;

    async fn fake_post(Path(id): Path<String>) -> axum::response::Response {
        match id.as_str() {
            "p1" => axum::Json(serde_json::json!({"post_id": "p1", "owner_id": "u1", "title": "hi"})).into_response(),
            "anon" => axum::Json(serde_json::json!({"post_id": "anon", "owner_id": ""})).into_response(),
            "boom" => HttpStatus::INTERNAL_SERVER_ERROR.into_response(),
            _ => HttpStatus::NOT_FOUND.into_response(),
        }
    }

    async fn serve_posts() -> String {
        let app = Router::new().route("/api/posts/{id}", get(fake_post));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/api/")
    }

    #[tokio::test]
    async fn resolves_owner_over_http() {
        let client = HttpOwnershipClient::new(&serve_posts().await, DEFAULT_LOOKUP_TIMEOUT).unwrap();

        assert_eq!(client.post_owner("p1").await.unwrap(), Some("u1".to_string()));
        assert_eq!(client.post_owner("anon").await.unwrap(), None);
        assert_eq!(client.post_owner("missing").await.unwrap(), None);
        let err = client.post_owner("boom").await.unwrap_err();
        assert_eq!(err.kind(), stats_api::ErrorKind::Io);
    }

    #[test]
    fn post_id_is_a_single_path_segment() {
        let client = HttpOwnershipClient::new("http://posts-service:8080", DEFAULT_LOOKUP_TIMEOUT).unwrap();
        assert_eq!(
            client.post_url("a/b?c").unwrap().as_str(),
            "http://posts-service:8080/posts/a%2Fb%3Fc"
        );
    }

    #[test]
    fn bad_base_url_is_a_config_error() {
        let err = HttpOwnershipClient::new("not a url", DEFAULT_LOOKUP_TIMEOUT).err().unwrap();
        assert_eq!(err.kind(), stats_api::ErrorKind::Config);
    }
}
