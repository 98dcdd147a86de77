use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] plansync_core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid operation id: {0}")]
    InvalidOperationId(String),
    #[error("Pass a queue entry id or --all")]
    MissingRetryTarget,
    #[error("Refusing to clear the queue without --force")]
    ClearNotConfirmed,
    #[error("Could not determine a data directory; pass --db-path")]
    NoDataDir,
}
