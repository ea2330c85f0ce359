use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("sentiment model unavailable: {0}")]
    Unavailable(String),

    #[error("sentiment model did not answer within {0:?}")]
    Timeout(Duration),

    #[error("sentiment model returned unrecognized label {0:?}")]
    UnrecognizedLabel(String),

    #[error("sentiment model returned score {0} outside [0, 1]")]
    ScoreOutOfRange(f64),

    #[error("sentiment model returned no prediction")]
    EmptyPrediction,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt {column} in row {row}: {message}")]
    Corrupt {
        column: &'static str,
        row: String,
        message: String,
    },
}

impl StorageError {
    pub(crate) fn corrupt(
        column: &'static str,
        row: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        StorageError::Corrupt {
            column,
            row: row.into(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("no message with id {0}")]
    NotFound(Uuid),

    #[error("{0:?} is not a sentiment label; use positive or negative")]
    InvalidLabel(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("chat transport failed: {0}")]
    Transport(String),

    #[error("chat platform rejected the request: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Transport(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("chart rendering did not finish within {0:?}")]
    Timeout(Duration),

    #[error("chart rendering failed: {0}")]
    Failed(String),
}
