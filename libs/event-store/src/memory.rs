use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use stats_api::{Event, EventStore, EventType, PostCount, StatsError};

/// In-memory EventStore. Для тестов и локального запуска без ClickHouse
/// (`--store memory`); данные живут до конца процесса.
#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<Vec<Event>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    async fn grouped(&self, event_type: EventType) -> Vec<PostCount> {
        let events = self.events.read().await;
        let mut counts: HashMap<&str, i64> = HashMap::new();
        for e in events.iter().filter(|e| e.event_type == event_type) {
            *counts.entry(e.post_id.as_str()).or_default() += 1;
        }
        let mut result: Vec<PostCount> = counts
            .into_iter()
            .map(|(post_id, value)| PostCount::new(post_id, value))
            .collect();
        // Same tie-break as the ClickHouse query.
        result.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.post_id.cmp(&b.post_id)));
        result
    }
}

impl EventStore for MemoryEventStore {
    fn ensure_schema(&self) -> Pin<Box<dyn Future<Output = Result<(), StatsError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn save_event(
        &self,
        event: &Event,
    ) -> Pin<Box<dyn Future<Output = Result<(), StatsError>> + Send + '_>> {
        let event = event.clone();
        Box::pin(async move {
            self.events.write().await.push(event);
            Ok(())
        })
    }

    fn post_stats(
        &self,
        post_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(i64, i64), StatsError>> + Send + '_>> {
        let post_id = post_id.to_string();
        Box::pin(async move {
            let events = self.events.read().await;
            let (mut views, mut likes) = (0, 0);
            for e in events.iter().filter(|e| e.post_id == post_id) {
                match e.event_type {
                    EventType::View => views += 1,
                    EventType::Like => likes += 1,
                }
            }
            Ok((views, likes))
        })
    }

    fn top_posts(
        &self,
        event_type: EventType,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PostCount>, StatsError>> + Send + '_>> {
        Box::pin(async move {
            let mut result = self.grouped(event_type).await;
            result.truncate(limit);
            Ok(result)
        })
    }

    fn likes_per_post(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PostCount>, StatsError>> + Send + '_>> {
        Box::pin(async move { Ok(self.grouped(EventType::Like).await) })
    }
}
