use std::fmt;

/// Category of an error. Lets callers decide between skip, retry and fail fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration: permanent, fail at startup.
    Config,
    /// I/O or network error: transient, may retry/reconnect.
    Io,
    /// Data format/parse error: bad input, skip record.
    Format,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Format => f.write_str("format"),
        }
    }
}

/// Unified error for store, reader and ownership-lookup operations.
#[derive(Clone, PartialEq, Eq)]
pub struct StatsError {
    kind: ErrorKind,
    message: String,
}

impl StatsError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn format_err(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Produces `"context: original message"`, kind preserved.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Debug for StatsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl fmt::Display for StatsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StatsError {}

impl From<std::io::Error> for StatsError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<serde_json::Error> for StatsError {
    fn from(e: serde_json::Error) -> Self {
        Self::format_err(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind() {
        let err = StatsError::io("connection refused").with_context("clickhouse");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.to_string(), "clickhouse: connection refused");
    }

    #[test]
    fn debug_shows_kind() {
        assert_eq!(format!("{:?}", StatsError::config("bad url")), "[config] bad url");
        assert_eq!(format!("{:?}", StatsError::format_err("bad row")), "[format] bad row");
    }

    #[test]
    fn json_errors_are_format_kind() {
        let err: StatsError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Format);
    }
}
