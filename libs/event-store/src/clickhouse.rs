use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::de::DeserializeOwned;

use stats_api::{Event, EventStore, EventType, PostCount, StatsError};

const TABLE: &str = "events";

// ════════════════════════════════════════════════════════════════
//  Identifier validation / escaping
// ════════════════════════════════════════════════════════════════

/// Validate a ClickHouse identifier (database name).
/// Allowed: `^[a-zA-Z_][a-zA-Z0-9_]*$`.
fn validate_identifier(name: &str, context: &str) -> Result<(), StatsError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(StatsError::config(format!("{context}: identifier is empty")));
    };
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(StatsError::config(format!(
            "{context}: invalid identifier '{name}', must start with a letter or underscore"
        )));
    }
    for ch in chars {
        if !ch.is_ascii_alphanumeric() && ch != '_' {
            return Err(StatsError::config(format!(
                "{context}: invalid character '{ch}' in identifier '{name}'"
            )));
        }
    }
    Ok(())
}

/// Escape a string value for use inside a ClickHouse single-quoted literal.
fn escape_ch_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

// ════════════════════════════════════════════════════════════════
//  ClickHouseConfig
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    /// HTTP interface, e.g. `http://stats-clickhouse:8123`.
    pub url: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub request_timeout: Duration,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://stats-clickhouse:8123".into(),
            database: "stats".into(),
            user: "default".into(),
            password: String::new(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  ClickHouseEventStore
// ════════════════════════════════════════════════════════════════

/// ClickHouse EventStore поверх HTTP-интерфейса.
///
/// Одна таблица `<db>.events` на движке MergeTree, отсортированная по
/// `(event_type, post_id, ts)` — групповые подсчёты по типу события
/// читают непрерывный диапазон. Первичного ключа нет, вставки только
/// дописывают строки.
pub struct ClickHouseEventStore {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    database: String,
}

impl ClickHouseEventStore {
    pub fn new(cfg: &ClickHouseConfig) -> Result<Self, StatsError> {
        validate_identifier(&cfg.database, "clickhouse database")?;
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|e| StatsError::config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            user: cfg.user.clone(),
            password: cfg.password.clone(),
            database: cfg.database.clone(),
        })
    }

    fn table(&self) -> String {
        format!("{}.{TABLE}", self.database)
    }

    /// Health check: `GET /ping` must answer `Ok.`.
    pub async fn ping(&self) -> Result<(), StatsError> {
        let resp = self
            .http
            .get(format!("{}/ping", self.base_url))
            .send()
            .await
            .map_err(|e| StatsError::io(format!("CH ping: {e}")))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| StatsError::io(format!("CH read: {e}")))?;
        if status.is_success() && body.trim() == "Ok." {
            Ok(())
        } else {
            Err(StatsError::io(format!("CH ping: unexpected answer {status}: {}", body.trim())))
        }
    }

    /// Execute a SQL statement (DDL / SELECT). Body = SQL text.
    async fn exec(&self, sql: &str) -> Result<String, StatsError> {
        let resp = self
            .http
            .post(&self.base_url)
            .query(&[
                ("user", self.user.as_str()),
                ("password", self.password.as_str()),
                ("output_format_json_quote_64bit_integers", "0"),
            ])
            .body(sql.to_owned())
            .send()
            .await
            .map_err(|e| StatsError::io(format!("CH request: {e}")))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| StatsError::io(format!("CH read: {e}")))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(StatsError::io(body.trim().to_string()))
        }
    }

    /// INSERT через FORMAT JSONEachRow: statement уходит в параметр
    /// `query`, NDJSON — телом POST.
    async fn exec_insert(&self, insert_sql: &str, ndjson_body: String) -> Result<(), StatsError> {
        let resp = self
            .http
            .post(&self.base_url)
            .query(&[
                ("user", self.user.as_str()),
                ("password", self.password.as_str()),
                ("query", insert_sql),
            ])
            .body(ndjson_body)
            .send()
            .await
            .map_err(|e| StatsError::io(format!("CH insert: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.map_err(|e| StatsError::io(format!("CH read: {e}")))?;
            Err(StatsError::io(body.trim().to_string()))
        }
    }

    async fn select_rows<T: DeserializeOwned>(&self, sql: &str) -> Result<Vec<T>, StatsError> {
        let body = self.exec(sql).await?;
        parse_rows(&body)
    }
}

fn parse_rows<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, StatsError> {
    let mut rows = Vec::new();
    for line in body.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let row: T = serde_json::from_str(line)
            .map_err(|e| StatsError::format_err(format!("parse CH row: {e}")))?;
        rows.push(row);
    }
    Ok(rows)
}

#[derive(serde::Serialize)]
struct ChEventRow<'a> {
    event_type: &'a str,
    post_id: &'a str,
    ts: String,
}

#[derive(Debug, serde::Deserialize)]
struct ChStatsRow {
    views: i64,
    likes: i64,
}

#[derive(Debug, serde::Deserialize)]
struct ChCountRow {
    post_id: String,
    value: i64,
}

impl From<ChCountRow> for PostCount {
    fn from(row: ChCountRow) -> Self {
        PostCount { post_id: row.post_id, value: row.value }
    }
}

fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    \
         event_type String,\n    \
         post_id String,\n    \
         ts DateTime('UTC')\n\
         ) ENGINE = MergeTree() ORDER BY (event_type, post_id, ts)"
    )
}

/// Ties in a ranking are ordered by ascending post_id.
fn grouped_count_sql(table: &str, event_type: EventType, limit: Option<usize>) -> String {
    let limit_clause = match limit {
        Some(n) => format!(" LIMIT {n}"),
        None => String::new(),
    };
    format!(
        "SELECT post_id, count() AS value \
         FROM {table} \
         WHERE event_type = '{}' \
         GROUP BY post_id \
         ORDER BY value DESC, post_id ASC{limit_clause} \
         FORMAT JSONEachRow",
        event_type.as_str(),
    )
}

impl EventStore for ClickHouseEventStore {
    fn ensure_schema(&self) -> Pin<Box<dyn Future<Output = Result<(), StatsError>> + Send + '_>> {
        Box::pin(async move {
            self.exec(&format!("CREATE DATABASE IF NOT EXISTS {}", self.database))
                .await
                .map_err(|e| e.with_context("create database"))?;
            self.exec(&create_table_sql(&self.table()))
                .await
                .map_err(|e| e.with_context("create table"))?;
            tracing::info!(database = %self.database, table = TABLE, "clickhouse schema ready");
            Ok(())
        })
    }

    fn save_event(
        &self,
        event: &Event,
    ) -> Pin<Box<dyn Future<Output = Result<(), StatsError>> + Send + '_>> {
        let event = event.clone();
        Box::pin(async move {
            let row = ChEventRow {
                event_type: event.event_type.as_str(),
                post_id: &event.post_id,
                ts: event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            };
            let body = serde_json::to_string(&row)?;
            let insert_sql = format!(
                "INSERT INTO {} (event_type, post_id, ts) FORMAT JSONEachRow",
                self.table(),
            );
            self.exec_insert(&insert_sql, body).await
        })
    }

    fn post_stats(
        &self,
        post_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(i64, i64), StatsError>> + Send + '_>> {
        let post_id = post_id.to_string();
        Box::pin(async move {
            let sql = format!(
                "SELECT countIf(event_type = 'view') AS views, \
                        countIf(event_type = 'like') AS likes \
                 FROM {} \
                 WHERE post_id = '{}' \
                 FORMAT JSONEachRow",
                self.table(),
                escape_ch_string(&post_id),
            );
            let rows: Vec<ChStatsRow> = self.select_rows(&sql).await?;
            Ok(rows
                .first()
                .map(|r| (r.views, r.likes))
                .unwrap_or((0, 0)))
        })
    }

    fn top_posts(
        &self,
        event_type: EventType,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PostCount>, StatsError>> + Send + '_>> {
        Box::pin(async move {
            if limit == 0 {
                return Ok(Vec::new());
            }
            let sql = grouped_count_sql(&self.table(), event_type, Some(limit));
            let rows: Vec<ChCountRow> = self.select_rows(&sql).await?;
            Ok(rows.into_iter().map(PostCount::from).collect())
        })
    }

    fn likes_per_post(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PostCount>, StatsError>> + Send + '_>> {
        Box::pin(async move {
            let sql = grouped_count_sql(&self.table(), EventType::Like, None);
            let rows: Vec<ChCountRow> = self.select_rows(&sql).await?;
            Ok(rows.into_iter().map(PostCount::from).collect())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), StatsError>> + Send + '_>> {
        // HTTP-интерфейс без сессии: закрывать нечего, пул reqwest уйдёт с Drop.
        Box::pin(async move {
            tracing::info!(database = %self.database, "clickhouse store closed");
            Ok(())
        })
    }
}
