use sofa_api::{ConsumerState, CouchError};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database not found: {db}")]
    DatabaseNotFound { db: String },

    #[error("Failed to parse change feed payload: {0}")]
    Parse(#[source] serde_json::Error),

    /// The feed connection was torn down by `stop`. Never surfaced to callers.
    #[error("Connection aborted")]
    ConnectionAborted,

    #[error("Cannot {operation} while consumer is {state}")]
    InvalidState {
        operation: &'static str,
        state: ConsumerState,
    },

    #[error("Server error ({status}): {source}")]
    Server {
        status: u16,
        #[source]
        source: CouchError,
    },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Error::Transport(err.into())
    }

    /// Build the error for a non-2xx response, preferring CouchDB's `{"error","reason"}` body
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<CouchError>(body) {
            Ok(source) => Error::Server { status, source },
            Err(_) => Error::Http {
                status,
                body: String::from_utf8_lossy(body).into_owned(),
            },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Server { status, .. } | Error::Http { status, .. } => Some(*status),
            Error::DatabaseNotFound { .. } => Some(404),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(Box::new(err))
    }
}
