use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};

use stats_api::{MessageReader, StatsError};

/// Where a consumer group without a committed offset starts reading.
/// Also applies when the committed offset is out of range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartFrom {
    #[default]
    Earliest,
    Latest,
}

impl StartFrom {
    fn as_reset(self) -> &'static str {
        match self {
            StartFrom::Earliest => "earliest",
            StartFrom::Latest => "latest",
        }
    }
}

impl FromStr for StartFrom {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earliest" => Ok(StartFrom::Earliest),
            "latest" => Ok(StartFrom::Latest),
            other => Err(format!("unknown start offset '{other}' (expected earliest|latest)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    /// Consumer group: partitions are shared between its members and
    /// committed offsets are kept per group.
    pub group_id: String,
    pub start_from: StartFrom,
    /// How often stored offsets are committed to the broker.
    pub commit_interval: Duration,
    pub session_timeout: Duration,
}

impl KafkaConfig {
    pub fn new(brokers: Vec<String>, topic: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            brokers,
            topic: topic.into(),
            group_id: group_id.into(),
            start_from: StartFrom::default(),
            commit_interval: Duration::from_secs(1),
            session_timeout: Duration::from_secs(10),
        }
    }

    /// librdkafka settings for one group member.
    ///
    /// Offsets are stored by hand after a message is handled and committed
    /// in the background every `commit_interval`.
    fn client_config(&self) -> ClientConfig {
        let mut cc = ClientConfig::new();
        cc.set("bootstrap.servers", self.brokers.join(","))
            .set("group.id", &self.group_id)
            .set("auto.offset.reset", self.start_from.as_reset())
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.commit.interval.ms", self.commit_interval.as_millis().to_string())
            .set("session.timeout.ms", self.session_timeout.as_millis().to_string())
            .set("enable.partition.eof", "false");
        cc
    }
}

/// Next offset to consume per partition, as a commit list for `topic`.
fn commit_list(topic: &str, next: &HashMap<i32, i64>) -> Result<TopicPartitionList, StatsError> {
    let mut tpl = TopicPartitionList::with_capacity(next.len());
    for (&partition, &offset) in next {
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset))
            .map_err(|e| StatsError::io(format!("kafka {topic}/{partition}: offset {offset}: {e}")))?;
    }
    Ok(tpl)
}

// ═══════════════════════════════════════════════════════════════
//  KafkaReader
// ═══════════════════════════════════════════════════════════════

/// MessageReader поверх Kafka consumer group (rdkafka).
///
/// Подключается лениво при первом `read`: ошибка подключения — обычная
/// ошибка чтения, consumer повторит её после паузы. Offset сообщения
/// сохраняется только в `commit`, то есть после обработки: при рестарте
/// группа продолжает с первого необработанного сообщения.
pub struct KafkaReader {
    cfg: KafkaConfig,
    consumer: Option<StreamConsumer>,
    /// `(partition, offset)` последнего прочитанного, ещё не подтверждённого.
    pending: Option<(i32, i64)>,
    /// Следующий offset по партициям после подтверждённых сообщений.
    acked: HashMap<i32, i64>,
}

impl KafkaReader {
    pub fn new(cfg: KafkaConfig) -> Self {
        Self {
            cfg,
            consumer: None,
            pending: None,
            acked: HashMap::new(),
        }
    }

    fn connect(&self) -> Result<StreamConsumer, StatsError> {
        let consumer: StreamConsumer = self
            .cfg
            .client_config()
            .create()
            .map_err(|e| StatsError::config(format!("kafka consumer for '{}': {e}", self.cfg.topic)))?;
        consumer
            .subscribe(&[self.cfg.topic.as_str()])
            .map_err(|e| StatsError::io(format!("kafka subscribe '{}': {e}", self.cfg.topic)))?;
        tracing::info!(
            topic = %self.cfg.topic,
            group_id = %self.cfg.group_id,
            start_from = self.cfg.start_from.as_reset(),
            "kafka reader subscribed"
        );
        Ok(consumer)
    }
}

impl MessageReader for KafkaReader {
    fn read(&mut self) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, StatsError>> + Send + '_>> {
        Box::pin(async move {
            if self.consumer.is_none() {
                self.consumer = Some(self.connect()?);
            }
            let Some(consumer) = self.consumer.as_ref() else {
                return Err(StatsError::io("kafka reader not connected"));
            };

            let (partition, offset, body) = {
                let msg = consumer
                    .recv()
                    .await
                    .map_err(|e| StatsError::io(format!("kafka '{}': {e}", self.cfg.topic)))?;
                let body = msg.payload().map(<[u8]>::to_vec).unwrap_or_default();
                (msg.partition(), msg.offset(), body)
            };
            self.pending = Some((partition, offset));
            Ok(body)
        })
    }

    fn commit(&mut self) -> Pin<Box<dyn Future<Output = Result<(), StatsError>> + Send + '_>> {
        Box::pin(async move {
            let Some((partition, offset)) = self.pending.take() else {
                return Ok(());
            };
            let Some(consumer) = self.consumer.as_ref() else {
                return Ok(());
            };
            let next = HashMap::from([(partition, offset + 1)]);
            consumer
                .store_offsets(&commit_list(&self.cfg.topic, &next)?)
                .map_err(|e| StatsError::io(format!("kafka store offset {}/{partition}: {e}", self.cfg.topic)))?;
            self.acked.insert(partition, offset + 1);
            Ok(())
        })
    }

    /// Синхронно коммитит подтверждённые offset'ы и выходит из группы.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), StatsError>> + Send + '_>> {
        Box::pin(async move {
            self.pending = None;
            let Some(consumer) = self.consumer.take() else {
                return Ok(());
            };
            let acked = std::mem::take(&mut self.acked);
            let tpl = commit_list(&self.cfg.topic, &acked)?;
            let topic = self.cfg.topic.clone();

            tokio::task::spawn_blocking(move || {
                let result = if tpl.count() == 0 {
                    Ok(())
                } else {
                    consumer
                        .commit(&tpl, CommitMode::Sync)
                        .map_err(|e| StatsError::io(format!("kafka commit '{topic}': {e}")))
                };
                drop(consumer);
                result
            })
            .await
            .map_err(|e| StatsError::io(format!("kafka close: {e}")))?
        })
    }
}
