use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use stats_api::{EventStore, EventType, MessageReader};

use crate::decode::{DecodeError, decode_event};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Topic name, for logs only.
    pub topic: String,
    /// Event type for records that do not carry their own.
    pub default_type: EventType,
    /// Pause after a failed pull.
    pub backoff: Duration,
}

impl ConsumerConfig {
    pub fn new(topic: impl Into<String>, default_type: EventType) -> Self {
        Self {
            topic: topic.into(),
            default_type,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Счётчики одного consumer'а за время жизни цикла.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub stored: u64,
    /// Undecodable records and records without post_id.
    pub skipped: u64,
    /// Records lost because the store rejected them.
    pub failed: u64,
    pub read_errors: u64,
    pub commit_errors: u64,
}

// ═══════════════════════════════════════════════════════════════
//  Consumer loop: reader → decode → normalize → store
// ═══════════════════════════════════════════════════════════════

/// Цикл чтения одного topic'а до отмены `token`.
///
/// Единственная точка ожидания — `reader.read()`. Ошибка чтения не
/// завершает цикл: лог, пауза `backoff`, повтор. Плохие записи и ошибки
/// сохранения логируются и теряются, повторов и dead-letter нет.
/// Каждое сообщение подтверждается `reader.commit()` только после того,
/// как `save_event` вернул результат.
pub async fn consume_topic(
    mut reader: Box<dyn MessageReader>,
    store: Arc<dyn EventStore>,
    cfg: ConsumerConfig,
    token: CancellationToken,
) -> ConsumerStats {
    let mut stats = ConsumerStats::default();
    tracing::info!(topic = %cfg.topic, default_type = %cfg.default_type, "consumer started");

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            msg = reader.read() => msg,
        };

        let body = match next {
            Ok(body) => body,
            Err(e) => {
                if token.is_cancelled() {
                    break;
                }
                stats.read_errors += 1;
                tracing::error!(topic = %cfg.topic, error = %e, "read message failed");
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(cfg.backoff) => {}
                }
                continue;
            }
        };

        match decode_event(&body, cfg.default_type, Utc::now()) {
            Ok(event) => match store.save_event(&event).await {
                Ok(()) => stats.stored += 1,
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!(
                        topic = %cfg.topic,
                        post_id = %event.post_id,
                        event_type = %event.event_type,
                        error = %e,
                        "save event failed"
                    );
                }
            },
            Err(DecodeError::MissingPostId) => {
                stats.skipped += 1;
                tracing::warn!(topic = %cfg.topic, "skip message without post_id");
            }
            Err(e) => {
                stats.skipped += 1;
                tracing::warn!(topic = %cfg.topic, error = %e, "decode message failed, skipping");
            }
        }

        // Сообщение обработано (сохранено, пропущено или потеряно).
        if let Err(e) = reader.commit().await {
            stats.commit_errors += 1;
            tracing::warn!(topic = %cfg.topic, error = %e, "commit offset failed");
        }
    }

    if let Err(e) = reader.close().await {
        tracing::warn!(topic = %cfg.topic, error = %e, "reader close failed");
    }
    tracing::info!(
        topic = %cfg.topic,
        stored = stats.stored,
        skipped = stats.skipped,
        failed = stats.failed,
        read_errors = stats.read_errors,
        commit_errors = stats.commit_errors,
        "consumer stopped"
    );
    stats
}
