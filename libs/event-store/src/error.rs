use stats_api::StatsError;

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("{target} connect failed after {attempts} attempts: {last}")]
    Exhausted {
        target: String,
        attempts: u32,
        last: StatsError,
    },

    #[error("{target} connect aborted")]
    Aborted { target: String },

    #[error("{target} misconfigured: {source}")]
    Config { target: String, source: StatsError },
}
