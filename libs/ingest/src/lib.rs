pub mod consumer;
pub mod decode;
pub mod kafka;

pub use consumer::{ConsumerConfig, ConsumerStats, consume_topic};
pub use decode::{DecodeError, decode_event};
pub use kafka::{KafkaConfig, KafkaReader, StartFrom};
