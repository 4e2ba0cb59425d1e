use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;

use stats_api::{
    EventStore, Metric, OwnershipLookup, PostCount, PostStats, RankedPost, StatsError, UserLikes,
};

pub const DEFAULT_TOP_POSTS_LIMIT: usize = 5;
pub const DEFAULT_TOP_USERS_LIMIT: usize = 3;
pub const DEFAULT_LOOKUP_CONCURRENCY: usize = 8;

/// `limit <= 0` → `default`.
fn effective_limit(limit: i32, default: usize) -> usize {
    usize::try_from(limit).ok().filter(|&n| n > 0).unwrap_or(default)
}

// ═══════════════════════════════════════════════════════════════
//  StatsService
// ═══════════════════════════════════════════════════════════════

/// Read-side агрегаты: счётчики поста, top-N постов, top-N авторов.
///
/// Ошибки хранилища пробрасываются вызывающему. Сбои сервиса владельцев
/// только уменьшают точность рейтинга авторов — посты без владельца
/// выпадают из подсчёта, запрос не падает.
pub struct StatsService {
    store: Arc<dyn EventStore>,
    owners: Option<Arc<dyn OwnershipLookup>>,
    lookup_concurrency: usize,
}

impl StatsService {
    pub fn new(store: Arc<dyn EventStore>, owners: Option<Arc<dyn OwnershipLookup>>) -> Self {
        Self {
            store,
            owners,
            lookup_concurrency: DEFAULT_LOOKUP_CONCURRENCY,
        }
    }

    pub fn with_lookup_concurrency(mut self, n: usize) -> Self {
        self.lookup_concurrency = n.max(1);
        self
    }

    /// Views and likes of one post. An empty id yields zeros without
    /// touching the store.
    pub async fn get_post_stats(&self, post_id: &str) -> Result<PostStats, StatsError> {
        if post_id.is_empty() {
            return Ok(PostStats::default());
        }
        let (views, likes) = self
            .store
            .post_stats(post_id)
            .await
            .map_err(|e| e.with_context(format!("post stats {post_id}")))?;
        Ok(PostStats {
            post_id: post_id.to_string(),
            views,
            likes,
        })
    }

    /// Top posts by `metric` (`"likes"`, anything else means views), in
    /// store order.
    pub async fn get_top_posts(&self, metric: &str, limit: i32) -> Result<Vec<PostCount>, StatsError> {
        let metric = Metric::parse_or_default(metric);
        let limit = effective_limit(limit, DEFAULT_TOP_POSTS_LIMIT);
        self.store
            .top_posts(metric.event_type(), limit)
            .await
            .map_err(|e| e.with_context(format!("top posts by {}", metric.as_str())))
    }

    /// Same list as [`get_top_posts`](Self::get_top_posts) with the author of
    /// each post. Unresolved owners stay `None`; no post is dropped.
    pub async fn get_top_posts_with_owners(
        &self,
        metric: &str,
        limit: i32,
    ) -> Result<Vec<RankedPost>, StatsError> {
        let posts = self.get_top_posts(metric, limit).await?;
        let mut owners = self.resolve_owners(&posts).await;
        Ok(posts
            .into_iter()
            .map(|p| RankedPost {
                owner_id: owners.remove(&p.post_id),
                post_id: p.post_id,
                value: p.value,
            })
            .collect())
    }

    /// Authors ranked by the likes of all their posts.
    ///
    /// Posts whose owner cannot be resolved are excluded. Ties are ordered
    /// by `user_id` ascending.
    pub async fn get_top_users_by_likes(&self, limit: i32) -> Result<Vec<UserLikes>, StatsError> {
        let limit = effective_limit(limit, DEFAULT_TOP_USERS_LIMIT);
        let likes = self
            .store
            .likes_per_post()
            .await
            .map_err(|e| e.with_context("likes per post"))?;
        let owners = self.resolve_owners(&likes).await;

        let mut per_user: HashMap<&str, i64> = HashMap::new();
        for entry in &likes {
            if let Some(owner) = owners.get(&entry.post_id) {
                *per_user.entry(owner.as_str()).or_default() += entry.value;
            }
        }

        let mut ranking: Vec<UserLikes> = per_user
            .into_iter()
            .filter(|&(_, likes)| likes > 0)
            .map(|(user_id, likes)| UserLikes {
                user_id: user_id.to_string(),
                likes,
            })
            .collect();
        ranking.sort_by(|a, b| b.likes.cmp(&a.likes).then_with(|| a.user_id.cmp(&b.user_id)));
        ranking.truncate(limit);
        Ok(ranking)
    }

    /// post_id → owner_id для уникальных постов из `posts`.
    ///
    /// Один вызов lookup на пост, не больше `lookup_concurrency` одновременно.
    /// Ошибки и пустые owner_id в результат не попадают.
    async fn resolve_owners(&self, posts: &[PostCount]) -> HashMap<String, String> {
        let Some(lookup) = self.owners.clone() else {
            return HashMap::new();
        };

        let unique: Vec<String> = {
            let mut seen = HashSet::new();
            posts
                .iter()
                .filter(|p| seen.insert(p.post_id.as_str()))
                .map(|p| p.post_id.clone())
                .collect()
        };

        let resolved: Vec<(String, Result<Option<String>, StatsError>)> = stream::iter(unique)
            .map(move |post_id: String| {
                let lookup = Arc::clone(&lookup);
                async move {
                    let result = lookup.post_owner(&post_id).await;
                    (post_id, result)
                }
            })
            .buffer_unordered(self.lookup_concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut owners = HashMap::with_capacity(resolved.len());
        for (post_id, result) in resolved {
            match result {
                Ok(Some(owner)) if !owner.is_empty() => {
                    owners.insert(post_id, owner);
                }
                Ok(_) => tracing::debug!(post_id = %post_id, "post has no owner"),
                Err(e) => tracing::warn!(post_id = %post_id, error = %e, "owner lookup failed"),
            }
        }
        owners
    }
}
