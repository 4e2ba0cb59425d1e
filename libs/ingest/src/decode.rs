use chrono::{DateTime, Utc};
use serde::Deserialize;

use stats_api::{Event, EventType};

/// `0001-01-01T00:00:00Z` в секундах Unix: так producer'ы без часов
/// записывают «время не задано».
const ZERO_INSTANT_SECS: i64 = -62_135_596_800;

fn is_zero_instant(ts: &DateTime<Utc>) -> bool {
    ts.timestamp() == ZERO_INSTANT_SECS && ts.timestamp_subsec_nanos() == 0
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("record without post_id")]
    MissingPostId,
}

/// Входящая запись лога: `{post_id, event_type, timestamp}`, все поля
/// необязательны на уровне формата.
#[derive(Debug, Deserialize)]
struct InboundEvent {
    #[serde(default)]
    post_id: Option<String>,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

/// Decode a message body and normalize it into an [`Event`].
///
/// - missing, empty or unknown `event_type` → `default_type`
///   (a known explicit type wins over the topic's default);
/// - missing or empty `post_id` → [`DecodeError::MissingPostId`]
///   (a whitespace-only id is kept verbatim);
/// - missing `timestamp` or the zero instant `0001-01-01T00:00:00Z` → `now`.
pub fn decode_event(
    body: &[u8],
    default_type: EventType,
    now: DateTime<Utc>,
) -> Result<Event, DecodeError> {
    let inbound: InboundEvent = serde_json::from_slice(body)?;

    let post_id = match inbound.post_id {
        Some(id) if !id.is_empty() => id,
        _ => return Err(DecodeError::MissingPostId),
    };

    let event_type = inbound
        .event_type
        .as_deref()
        .and_then(|s| s.parse::<EventType>().ok())
        .unwrap_or(default_type);

    Ok(Event {
        event_type,
        post_id,
        timestamp: inbound.timestamp.filter(|ts| !is_zero_instant(ts)).unwrap_or(now),
    })
}
