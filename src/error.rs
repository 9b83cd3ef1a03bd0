//! Error types for questline
//!
//! `BackendError` covers transport and storage failures of a backend.
//! `AppError` is the taxonomy the controller converts into notifications.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not signed in")]
    Unauthenticated,

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            BackendError::Status { status: status.as_u16(), message: err.to_string() }
        } else {
            BackendError::Network(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    /// Loading data for a view region failed
    #[error("Failed to load {what}: {source}")]
    Fetch {
        what: &'static str,
        #[source]
        source: BackendError,
    },

    /// Persisting a change failed; the local change was rolled back
    #[error("Failed to save {what}: {source}")]
    Mutation {
        what: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Authentication failed: {0}")]
    Auth(#[source] BackendError),

    #[error("{0}")]
    Validation(String),

    #[error("Locked: {0}")]
    Locked(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not permitted: {0}")]
    Forbidden(String),

    #[error(transparent)]
    View(#[from] crate::app::view::ViewError),
}

impl AppError {
    pub fn fetch(what: &'static str, source: BackendError) -> Self {
        AppError::Fetch { what, source }
    }

    pub fn mutation(what: &'static str, source: BackendError) -> Self {
        AppError::Mutation { what, source }
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;
pub type AppResult<T> = std::result::Result<T, AppError>;
