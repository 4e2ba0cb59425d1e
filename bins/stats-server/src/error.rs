use stats_api::StatsError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Connect(#[from] event_store::ConnectError),

    #[error("store: {0}")]
    Store(#[from] StatsError),

    #[error("{task} exited: {detail}")]
    Task { task: &'static str, detail: String },

    #[error("task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}
