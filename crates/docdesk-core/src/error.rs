//! Error types for docdesk-core

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Backend hiccup that survived the single retry.
    #[error("Store temporarily unavailable: {0}")]
    TransientStore(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Another caller opened a session for the same participant first.
    #[error("Open session already exists for participant '{0}'")]
    DuplicateSessionRace(String),

    #[error("Subscription fault: {0}")]
    SubscriptionFault(String),

    #[error("Reply generation failed: {0}")]
    Reply(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the failure is worth a single retry at the store boundary.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientStore(_) => true,
            Error::Database(err) => is_transient_sqlx(err),
            _ => false,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Protocol(_) => true,
        // SQLITE_BUSY / SQLITE_LOCKED and their extended codes
        sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| matches!(code.as_ref(), "5" | "6" | "261" | "262" | "517")),
        _ => false,
    }
}

/// Result type alias using Error.
pub type Result<T> = std::result::Result<T, Error>;
