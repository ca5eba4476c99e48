use std::time::Duration;
use thiserror::Error;

/// Errors produced by structures, the stream bridge, and provider drivers.
#[derive(Error, Debug)]
pub enum Error {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A base64 payload from a provider could not be decoded.
    #[error("base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Invalid configuration detected at build time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The run was cancelled via the cancellation flag.
    #[error("Run was cancelled")]
    Cancelled,

    /// HTTP error with status code, response body, and optional Retry-After hint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 429, 500, 503).
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// A vendor client call failed.
    #[error("{driver} call failed: {message}")]
    Upstream { driver: &'static str, message: String },

    /// A vendor returned a payload that does not have the expected shape.
    #[error("{driver} returned a malformed response: {message}")]
    MalformedResponse { driver: &'static str, message: String },

    /// The image model rejected or failed to produce an image.
    #[error("Image generation failed: {0}")]
    ImageGeneration(String),

    /// The driver does not implement the requested operation.
    #[error("{driver} does not support {operation}")]
    Unsupported {
        driver: &'static str,
        operation: &'static str,
    },

    /// An asynchronous vendor operation did not reach a terminal state in time.
    #[error("statement {statement_id} did not complete within {elapsed:?}")]
    PollTimeout {
        statement_id: String,
        elapsed: Duration,
    },

    /// A task inside a structure failed.
    #[error("Task '{task}' failed: {message}")]
    TaskFailed { task: String, message: String },

    /// The thread driving a streamed run panicked.
    #[error("stream producer panicked: {0}")]
    ProducerPanicked(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
