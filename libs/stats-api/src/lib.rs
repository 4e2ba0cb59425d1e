pub mod error;
pub mod types;

use std::future::Future;
use std::pin::Pin;

pub use error::{ErrorKind, StatsError};
pub use types::{Event, EventType, Metric, PostCount, PostStats, RankedPost, UserLikes};

// ════════════════════════════════════════════════════════════════
//  EventStore
// ════════════════════════════════════════════════════════════════

/// Append-only хранилище событий и групповых агрегатов над ним.
///
/// Реализации: ClickHouse (HTTP) и in-memory. Записи независимы друг от
/// друга — конкурентные `save_event` не требуют координации.
pub trait EventStore: Send + Sync {
    /// Idempotent creation of the database and the events table.
    fn ensure_schema(&self) -> Pin<Box<dyn Future<Output = Result<(), StatsError>> + Send + '_>>;

    /// Insert one row. No deduplication.
    fn save_event(
        &self,
        event: &Event,
    ) -> Pin<Box<dyn Future<Output = Result<(), StatsError>> + Send + '_>>;

    /// `(views, likes)` for one post; `(0, 0)` when nothing is stored.
    fn post_stats(
        &self,
        post_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(i64, i64), StatsError>> + Send + '_>>;

    /// Posts grouped by count of `event_type`, descending, at most `limit`.
    fn top_posts(
        &self,
        event_type: EventType,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PostCount>, StatsError>> + Send + '_>>;

    /// Every post with at least one like, with its like count.
    fn likes_per_post(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PostCount>, StatsError>> + Send + '_>>;

    /// Release the underlying connection. Safe to call more than once.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), StatsError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

// ════════════════════════════════════════════════════════════════
//  OwnershipLookup
// ════════════════════════════════════════════════════════════════

/// Resolves the author of a post via the external posts service.
///
/// `Ok(None)`: post unknown or has no owner.
pub trait OwnershipLookup: Send + Sync {
    fn post_owner(
        &self,
        post_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, StatsError>> + Send + '_>>;
}

// ════════════════════════════════════════════════════════════════
//  MessageReader
// ════════════════════════════════════════════════════════════════

/// Источник сообщений одного topic'а лога.
///
/// `read` блокируется до следующего сообщения и возвращает его тело.
/// Ошибка чтения не означает конец потока — вызывающий повторяет попытку.
/// После обработки сообщения вызывающий подтверждает его через `commit`;
/// неподтверждённые сообщения после рестарта читаются снова.
pub trait MessageReader: Send {
    fn read(&mut self) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, StatsError>> + Send + '_>>;

    /// Mark the message last returned by `read` as handled. No-op when
    /// there is nothing to acknowledge.
    fn commit(&mut self) -> Pin<Box<dyn Future<Output = Result<(), StatsError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), StatsError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}
