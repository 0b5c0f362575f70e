use thiserror::Error;

use crate::RejectionReason;

#[derive(Debug, Error)]
pub enum Error {
    /// An indicator or derived input lacks enough history.
    #[error("Not formed: {0}")]
    NotFormed(String),

    #[error("Invalid sizing: {0}")]
    InvalidSizing(String),

    /// A cross-instrument read found no published value.
    #[error("No published snapshot value for '{0}'")]
    StaleSnapshot(String),

    #[error("Order rejected: {reason}")]
    OrderRejected { reason: RejectionReason },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
