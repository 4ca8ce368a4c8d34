//! Configuration error types.

/// Errors from loading, saving, or parsing `config.ron`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    ReadError(#[source] std::io::Error),

    #[error("failed to write config: {0}")]
    WriteError(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    ParseError(#[source] ron::error::SpannedError),

    #[error("failed to serialize config: {0}")]
    SerializeError(#[source] ron::Error),
}
