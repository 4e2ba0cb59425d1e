use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StatsError;

// ════════════════════════════════════════════════════════════════
//  Event
// ════════════════════════════════════════════════════════════════

/// Вид пользовательского действия над постом.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    View,
    Like,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::View => "view",
            EventType::Like => "like",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(EventType::View),
            "like" => Ok(EventType::Like),
            other => Err(StatsError::format_err(format!("unknown event type '{other}'"))),
        }
    }
}

/// Неизменяемый факт: просмотр или лайк поста в момент `timestamp`.
///
/// Уникального идентификатора нет — повторная доставка того же события
/// сохраняется второй строкой и учитывается дважды.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub post_id: String,
    pub timestamp: DateTime<Utc>,
}

// ════════════════════════════════════════════════════════════════
//  Aggregates
// ════════════════════════════════════════════════════════════════

/// Number of events of one type for one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCount {
    pub post_id: String,
    pub value: i64,
}

impl PostCount {
    pub fn new(post_id: impl Into<String>, value: i64) -> Self {
        Self { post_id: post_id.into(), value }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostStats {
    pub post_id: String,
    pub views: i64,
    pub likes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLikes {
    pub user_id: String,
    pub likes: i64,
}

/// Top-posts entry enriched with the author resolved by the posts service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedPost {
    pub post_id: String,
    pub value: i64,
    pub owner_id: Option<String>,
}

// ════════════════════════════════════════════════════════════════
//  Metric
// ════════════════════════════════════════════════════════════════

/// Ranking metric of the top-posts query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Metric {
    #[default]
    Views,
    Likes,
}

impl Metric {
    /// `"likes"` → Likes, anything else (including empty) → Views.
    pub fn parse_or_default(s: &str) -> Self {
        match s {
            "likes" => Metric::Likes,
            _ => Metric::Views,
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Metric::Views => EventType::View,
            Metric::Likes => EventType::Like,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Views => "views",
            Metric::Likes => "likes",
        }
    }
}
