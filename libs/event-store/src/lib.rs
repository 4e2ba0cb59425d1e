pub mod clickhouse;
pub mod connect;
pub mod error;
pub mod memory;

pub use clickhouse::{ClickHouseConfig, ClickHouseEventStore};
pub use connect::{RetryPolicy, connect_clickhouse, connect_with_retry};
pub use error::ConnectError;
pub use memory::MemoryEventStore;
