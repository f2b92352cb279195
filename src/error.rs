//! Error types for the writing assistant.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) that is
//! included in the Display output and accessible via [`AssistError::code()`].
//!
//! Two variants are non-fatal: [`AssistError::LineDecodeSkip`] is swallowed
//! per NDJSON line by the stream decoder, and [`AssistError::MarkerIncomplete`]
//! makes the action extractor fall back to plain text. Every other variant
//! aborts the current generation and surfaces one system message.

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// The inference server refused the connection or is unreachable.
    pub const CONNECTION_UNAVAILABLE: &str = "CONNECTION_UNAVAILABLE";

    /// Connecting to or reading from the inference server timed out.
    pub const TIMEOUT: &str = "TIMEOUT";

    /// The requested model is not installed on the server.
    pub const MODEL_NOT_FOUND: &str = "MODEL_NOT_FOUND";

    /// The server answered with a non-success status.
    pub const API_ERROR: &str = "API_ERROR";

    /// Any other transport failure.
    pub const TRANSPORT_FAILED: &str = "TRANSPORT_FAILED";

    /// A single stream line could not be decoded (non-fatal).
    pub const LINE_DECODE_SKIP: &str = "LINE_DECODE_SKIP";

    /// An action marker was opened but never closed (non-fatal).
    pub const MARKER_INCOMPLETE: &str = "MARKER_INCOMPLETE";

    /// Invalid or unreadable configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// Filesystem I/O failure.
    pub const IO_ERROR: &str = "IO_ERROR";
}

/// Errors produced by the assistant core.
#[derive(Debug, thiserror::Error)]
pub enum AssistError {
    /// The inference server could not be reached.
    #[error("[{}] {}", error_codes::CONNECTION_UNAVAILABLE, .0)]
    ConnectionUnavailable(String),

    /// The connect or read deadline elapsed.
    #[error("[{}] {}", error_codes::TIMEOUT, .0)]
    Timeout(String),

    /// The server does not know the requested model.
    #[error("[{}] model '{model}' not found", error_codes::MODEL_NOT_FOUND)]
    ModelNotFound {
        /// Model identifier that was requested (or named by the server).
        model: String,
    },

    /// Non-success HTTP status with the decoded error message.
    #[error("[{}] HTTP {status}: {message}", error_codes::API_ERROR)]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Message from the `{"error": ...}` body, or the raw body.
        message: String,
    },

    /// Transport failure that is neither a refused connection nor a timeout.
    #[error("[{}] {}", error_codes::TRANSPORT_FAILED, .0)]
    Transport(String),

    /// One stream line failed to parse and was skipped.
    #[error("[{}] {}", error_codes::LINE_DECODE_SKIP, .0)]
    LineDecodeSkip(String),

    /// The action open token was found without a usable close.
    #[error("[{}] action marker is incomplete", error_codes::MARKER_INCOMPLETE)]
    MarkerIncomplete,

    /// Invalid or unreadable configuration.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),

    /// Filesystem I/O failure.
    #[error("[{}] {}", error_codes::IO_ERROR, .0)]
    Io(#[from] std::io::Error),
}

impl AssistError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionUnavailable(_) => error_codes::CONNECTION_UNAVAILABLE,
            Self::Timeout(_) => error_codes::TIMEOUT,
            Self::ModelNotFound { .. } => error_codes::MODEL_NOT_FOUND,
            Self::ApiError { .. } => error_codes::API_ERROR,
            Self::Transport(_) => error_codes::TRANSPORT_FAILED,
            Self::LineDecodeSkip(_) => error_codes::LINE_DECODE_SKIP,
            Self::MarkerIncomplete => error_codes::MARKER_INCOMPLETE,
            Self::Config(_) => error_codes::CONFIG_INVALID,
            Self::Io(_) => error_codes::IO_ERROR,
        }
    }

    /// Whether this error aborts the generation it occurred in.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::LineDecodeSkip(_) | Self::MarkerIncomplete)
    }

    /// Whether the original prompt should be put back into the input field.
    pub fn restores_prompt(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// The single system message shown to the user for a failed generation.
    pub fn user_message(&self) -> String {
        match self {
            Self::ConnectionUnavailable(_) => {
                "Could not reach the model server. Check that it is running at the configured URL."
                    .to_owned()
            }
            Self::Timeout(_) => "The model is taking too long to respond.".to_owned(),
            Self::ModelNotFound { model } => {
                format!("Model '{model}' was not found. Check that it is available on the server.")
            }
            Self::ApiError { status, message } => format!("API error ({status}): {message}"),
            other => format!("Error: {other}"),
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AssistError>;
