//! Top-level error types for replybot.

use std::sync::Arc;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether the agent loop must stop instead of backing off and retrying.
    ///
    /// Configuration mistakes and registry misuse never heal on their own, so
    /// retrying them would only spin the loop.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Config(_) => true,
            Error::Connection(error) => error.is_fatal(),
            Error::Generation(GenerationError::NoModelProvider) => true,
            _ => false,
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("failed to parse config from {path}: {message}")]
    Parse { path: String, message: String },

    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Connection registry and action dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("unknown connection: {0}")]
    UnknownConnection(String),

    #[error("connection {connection} has no action {action}")]
    UnknownAction { connection: String, action: String },

    #[error("invalid arguments for {connection}.{action}: {reason}")]
    InvalidArguments {
        connection: String,
        action: String,
        reason: String,
    },

    #[error("connection {0} is not configured")]
    NotConfigured(String),

    #[error("failed to fetch messages from {connection}: {message}")]
    FeedFetch { connection: String, message: String },

    #[error("{connection}.{action} failed: {message}")]
    ActionFailed {
        connection: String,
        action: String,
        message: String,
    },
}

impl ConnectionError {
    /// Registry errors that indicate a programming or configuration mistake.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectionError::UnknownConnection(_)
                | ConnectionError::UnknownAction { .. }
                | ConnectionError::InvalidArguments { .. }
                | ConnectionError::NotConfigured(_)
        )
    }
}

/// Database connection and operation errors.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("failed to connect to SQLite: {0}")]
    SqliteConnect(#[from] sqlx::Error),

    #[error("failed to connect to LanceDB: {0}")]
    LanceConnect(String),

    #[error("LanceDB error: {0}")]
    LanceDb(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Reply generation errors raised before the provider is called.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("no configured model provider found")]
    NoModelProvider,

    #[error("failed to render prompt template: {0}")]
    Template(String),

    #[error("model provider returned an empty reply")]
    EmptyReply,
}

/// Context storage and retrieval errors.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("failed to generate embedding: {0}")]
    EmbeddingFailed(String),

    #[error("failed to search context: {0}")]
    SearchFailed(String),

    #[error("failed to save context: {0}")]
    SaveFailed(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_misuse_is_fatal() {
        let error: Error = ConnectionError::InvalidArguments {
            connection: "feed".into(),
            action: "reply-to-message".into(),
            reason: "missing field `text`".into(),
        }
        .into();
        assert!(error.is_fatal());
    }

    #[test]
    fn action_failures_are_retried() {
        let error: Error = ConnectionError::ActionFailed {
            connection: "feed".into(),
            action: "reply-to-message".into(),
            message: "HTTP 502".into(),
        }
        .into();
        assert!(!error.is_fatal());
        assert!(!Error::from(DbError::Persistence("disk full".into())).is_fatal());
    }

    #[test]
    fn missing_fields_are_listed_together() {
        let error = ConfigError::MissingFields(vec!["bio".into(), "loop_delay".into()]);
        assert_eq!(error.to_string(), "missing required fields: bio, loop_delay");
    }
}
