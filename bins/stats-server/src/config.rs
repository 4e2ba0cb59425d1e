use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Parser};
use serde::Deserialize;

use event_store::{ClickHouseConfig, RetryPolicy};
use ingest::StartFrom;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "stats-server", about = "Сбор и агрегация статистики постов (views/likes)")]
pub struct Cli {
    #[command(flatten)]
    pub args: ServeArgs,
}

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub api_addr: Option<String>,
    pub store: Option<String>,
    pub clickhouse_url: Option<String>,
    pub clickhouse_db: Option<String>,
    pub clickhouse_user: Option<String>,
    pub clickhouse_password: Option<String>,
    /// Comma-separated or a TOML array.
    pub kafka_brokers: Option<Brokers>,
    pub kafka_group_id: Option<String>,
    pub views_topic: Option<String>,
    pub likes_topic: Option<String>,
    pub start_offset: Option<String>,
    pub posts_service_url: Option<String>,
    pub shutdown_grace_secs: Option<u64>,
    pub connect_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Brokers {
    List(Vec<String>),
    Csv(String),
}

impl Brokers {
    fn into_list(self) -> Vec<String> {
        match self {
            Brokers::List(list) => list.into_iter().flat_map(|s| split_brokers(&s)).collect(),
            Brokers::Csv(s) => split_brokers(&s),
        }
    }
}

pub fn load_config(path: &str) -> Result<FileConfig, ServerError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
    toml::from_str(&content)
        .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug, Default)]
pub struct ServeArgs {
    /// Путь к TOML конфигу (необязателен)
    #[arg(long, default_value = "stats.toml", env = "STATS_CONFIG")]
    pub config: String,

    /// Адрес HTTP API агрегатов
    #[arg(long, env = "STATS_API_ADDR")]
    pub api_addr: Option<String>,

    /// Хранилище событий: clickhouse | memory
    #[arg(long, env = "STATS_STORE")]
    pub store: Option<String>,

    #[arg(long, env = "CLICKHOUSE_URL")]
    pub clickhouse_url: Option<String>,

    #[arg(long, env = "CLICKHOUSE_DB")]
    pub clickhouse_db: Option<String>,

    #[arg(long, env = "CLICKHOUSE_USER")]
    pub clickhouse_user: Option<String>,

    #[arg(long, env = "CLICKHOUSE_PASSWORD", hide_env_values = true)]
    pub clickhouse_password: Option<String>,

    /// Брокеры Kafka через запятую
    #[arg(long, env = "KAFKA_BROKERS")]
    pub kafka_brokers: Option<String>,

    /// Consumer group: делит партиции между репликами, хранит offset'ы
    #[arg(long, env = "KAFKA_GROUP_ID")]
    pub kafka_group_id: Option<String>,

    #[arg(long, env = "KAFKA_VIEWS_TOPIC")]
    pub views_topic: Option<String>,

    #[arg(long, env = "KAFKA_LIKES_TOPIC")]
    pub likes_topic: Option<String>,

    /// Откуда читать группе без сохранённого offset'а: earliest | latest
    #[arg(long, env = "KAFKA_START_OFFSET")]
    pub start_offset: Option<String>,

    /// HTTP-фасад сервиса постов (`GET {url}/posts/{id}`), не gRPC-порт
    /// posts-service; пустая строка отключает поиск владельцев
    #[arg(long, env = "POSTS_SERVICE_URL")]
    pub posts_service_url: Option<String>,

    /// Сколько ждать завершения задач при остановке
    #[arg(long, env = "STATS_SHUTDOWN_GRACE_SECS")]
    pub shutdown_grace_secs: Option<u64>,

    /// Попыток подключения к хранилищу
    #[arg(long, env = "STATS_CONNECT_ATTEMPTS")]
    pub connect_attempts: Option<u32>,
}

// ═══════════════════════════════════════════════════════════════
//  Effective — merged config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    ClickHouse,
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clickhouse" => Ok(StoreKind::ClickHouse),
            "memory" => Ok(StoreKind::Memory),
            other => Err(format!("unknown store '{other}' (expected clickhouse|memory)")),
        }
    }
}

/// Comma list → trimmed, non-empty entries.
pub fn split_brokers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Итоговая конфигурация после мержа: defaults < stats.toml < env/CLI.
#[derive(Debug, Clone)]
pub struct Effective {
    pub api_addr: String,
    pub store: StoreKind,
    pub clickhouse: ClickHouseConfig,
    pub brokers: Vec<String>,
    pub group_id: String,
    pub views_topic: String,
    pub likes_topic: String,
    pub start_from: StartFrom,
    pub posts_service_url: Option<String>,
    pub shutdown_grace: Duration,
    pub retry: RetryPolicy,
}

impl Effective {
    pub fn new(args: &ServeArgs) -> Result<Self, ServerError> {
        let cfg = match load_config(&args.config) {
            Ok(c) => c,
            Err(e) => {
                if std::path::Path::new(&args.config).exists() {
                    return Err(e);
                }
                FileConfig::default()
            }
        };
        Self::merge(args, cfg)
    }

    pub fn merge(args: &ServeArgs, cfg: FileConfig) -> Result<Self, ServerError> {
        let store = args
            .store
            .clone()
            .or(cfg.store)
            .unwrap_or_else(|| "clickhouse".into())
            .parse::<StoreKind>()
            .map_err(|detail| ServerError::Config { context: "store", detail })?;

        let ch_default = ClickHouseConfig::default();
        let clickhouse = ClickHouseConfig {
            url: args.clickhouse_url.clone().or(cfg.clickhouse_url).unwrap_or(ch_default.url),
            database: args.clickhouse_db.clone().or(cfg.clickhouse_db).unwrap_or(ch_default.database),
            user: args.clickhouse_user.clone().or(cfg.clickhouse_user).unwrap_or(ch_default.user),
            password: args
                .clickhouse_password
                .clone()
                .or(cfg.clickhouse_password)
                .unwrap_or(ch_default.password),
            request_timeout: ch_default.request_timeout,
        };

        let brokers = match (&args.kafka_brokers, cfg.kafka_brokers) {
            (Some(raw), _) => split_brokers(raw),
            (None, Some(file)) => file.into_list(),
            (None, None) => vec!["kafka:9092".into()],
        };
        if brokers.is_empty() {
            return Err(ServerError::Config {
                context: "kafka",
                detail: "no brokers configured".into(),
            });
        }

        let start_from = args
            .start_offset
            .clone()
            .or(cfg.start_offset)
            .map(|s| s.parse::<StartFrom>())
            .transpose()
            .map_err(|detail| ServerError::Config { context: "kafka", detail })?
            .unwrap_or_default();

        let group_id = args
            .kafka_group_id
            .clone()
            .or(cfg.kafka_group_id)
            .unwrap_or_else(|| "stats-service".into());
        if group_id.trim().is_empty() {
            return Err(ServerError::Config {
                context: "kafka",
                detail: "consumer group id is empty".into(),
            });
        }

        let connect_attempts = args.connect_attempts.or(cfg.connect_attempts).unwrap_or(5);
        if connect_attempts == 0 {
            return Err(ServerError::Config {
                context: "store",
                detail: "connect attempts must be at least 1".into(),
            });
        }

        let posts_service_url = args
            .posts_service_url
            .clone()
            .or(cfg.posts_service_url)
            .unwrap_or_else(|| "http://posts-service:8080".into());

        Ok(Self {
            api_addr: args.api_addr.clone().or(cfg.api_addr).unwrap_or_else(|| "0.0.0.0:9090".into()),
            store,
            clickhouse,
            brokers,
            group_id,
            views_topic: args.views_topic.clone().or(cfg.views_topic).unwrap_or_else(|| "post_views".into()),
            likes_topic: args.likes_topic.clone().or(cfg.likes_topic).unwrap_or_else(|| "post_likes".into()),
            start_from,
            posts_service_url: Some(posts_service_url).filter(|u| !u.trim().is_empty()),
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs.or(cfg.shutdown_grace_secs).unwrap_or(5)),
            retry: RetryPolicy {
                max_attempts: connect_attempts,
                ..RetryPolicy::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(toml_src: &str) -> FileConfig {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn defaults_without_file_or_flags() {
        let eff = Effective::merge(&ServeArgs::default(), FileConfig::default()).unwrap();
        assert_eq!(eff.api_addr, "0.0.0.0:9090");
        assert_eq!(eff.store, StoreKind::ClickHouse);
        assert_eq!(eff.clickhouse.url, "http://stats-clickhouse:8123");
        assert_eq!(eff.clickhouse.database, "stats");
        assert_eq!(eff.clickhouse.user, "default");
        assert_eq!(eff.brokers, vec!["kafka:9092"]);
        assert_eq!(eff.group_id, "stats-service");
        assert_eq!((eff.views_topic.as_str(), eff.likes_topic.as_str()), ("post_views", "post_likes"));
        assert_eq!(eff.start_from, StartFrom::Earliest);
        assert_eq!(eff.posts_service_url.as_deref(), Some("http://posts-service:8080"));
        assert_eq!(eff.shutdown_grace, Duration::from_secs(5));
        assert_eq!(eff.retry.max_attempts, 5);
        assert_eq!(eff.retry.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn broker_list_is_cleaned() {
        assert_eq!(split_brokers(" a:9092, ,b:9092,"), vec!["a:9092", "b:9092"]);
        assert!(split_brokers(" , ").is_empty());
    }

    #[test]
    fn empty_broker_list_is_fatal() {
        let args = ServeArgs {
            kafka_brokers: Some(" , ".into()),
            ..Default::default()
        };
        let err = Effective::merge(&args, FileConfig::default()).unwrap_err();
        assert!(matches!(err, ServerError::Config { context: "kafka", .. }));
    }

    #[test]
    fn blank_group_id_is_fatal() {
        let args = ServeArgs { kafka_group_id: Some("  ".into()), ..Default::default() };
        let err = Effective::merge(&args, FileConfig::default()).unwrap_err();
        assert!(matches!(err, ServerError::Config { context: "kafka", .. }));

        let eff = Effective::merge(&ServeArgs::default(), file(r#"kafka_group_id = "stats-replica""#)).unwrap();
        assert_eq!(eff.group_id, "stats-replica");
    }

    #[test]
    fn flags_override_file() {
        let cfg = file(
            r#"
            api_addr = "127.0.0.1:7000"
            store = "memory"
            kafka_brokers = ["k1:9092", "k2:9092"]
            views_topic = "views_from_file"
            start_offset = "latest"
            shutdown_grace_secs = 1
            "#,
        );
        let args = ServeArgs {
            api_addr: Some("127.0.0.1:7001".into()),
            views_topic: Some("views_from_cli".into()),
            ..Default::default()
        };

        let eff = Effective::merge(&args, cfg).unwrap();
        assert_eq!(eff.api_addr, "127.0.0.1:7001");
        assert_eq!(eff.store, StoreKind::Memory);
        assert_eq!(eff.brokers, vec!["k1:9092", "k2:9092"]);
        assert_eq!(eff.views_topic, "views_from_cli");
        assert_eq!(eff.start_from, StartFrom::Latest);
        assert_eq!(eff.shutdown_grace, Duration::from_secs(1));
    }

    #[test]
    fn file_brokers_may_be_a_comma_string() {
        let eff = Effective::merge(&ServeArgs::default(), file(r#"kafka_brokers = "a:1,b:2""#)).unwrap();
        assert_eq!(eff.brokers, vec!["a:1", "b:2"]);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let bad_store = ServeArgs { store: Some("postgres".into()), ..Default::default() };
        assert!(matches!(
            Effective::merge(&bad_store, FileConfig::default()),
            Err(ServerError::Config { context: "store", .. })
        ));

        let bad_offset = ServeArgs { start_offset: Some("middle".into()), ..Default::default() };
        assert!(matches!(
            Effective::merge(&bad_offset, FileConfig::default()),
            Err(ServerError::Config { context: "kafka", .. })
        ));

        let no_attempts = ServeArgs { connect_attempts: Some(0), ..Default::default() };
        assert!(Effective::merge(&no_attempts, FileConfig::default()).is_err());

        assert!(toml::from_str::<FileConfig>("unknown_key = 1").is_err());
    }

    #[test]
    fn blank_posts_service_url_disables_lookup() {
        let args = ServeArgs { posts_service_url: Some(String::new()), ..Default::default() };
        let eff = Effective::merge(&args, FileConfig::default()).unwrap();
        assert!(eff.posts_service_url.is_none());
    }

    #[test]
    fn missing_config_file_is_fine() {
        let args = ServeArgs {
            config: "/nonexistent/stats.toml".into(),
            ..Default::default()
        };
        assert!(Effective::new(&args).is_ok());
    }
}
