//! Core error types for the plinth framework.
//!
//! [`PlinthError`] covers the error categories the rendering core can surface:
//! configuration mistakes made by dependent modules, template resolution and
//! execution failures, serialization problems, and IO errors. Each variant maps
//! to an HTTP status code via [`PlinthError::status_code`].

use thiserror::Error;

/// The primary error type for the plinth framework.
///
/// Configuration errors are raised eagerly at registration time because they
/// indicate a programming error in a dependent module; template errors are
/// surfaced at render time and converted into the page-assembly error path.
#[derive(Error, Debug)]
pub enum PlinthError {
    // ── HTTP errors ──────────────────────────────────────────────────

    /// HTTP 400 Bad Request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// HTTP 404 Not Found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// HTTP 500 Internal Server Error.
    #[error("Internal server error: {0}")]
    InternalServerError(String),

    // ── Configuration ────────────────────────────────────────────────

    /// An invalid registration call (unknown module, missing method, bad shape).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The framework is improperly configured.
    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),

    // ── Templates ────────────────────────────────────────────────────

    /// The requested template could not be resolved by any loader.
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// The template engine failed while compiling or executing a template.
    #[error("Template render error: {0}")]
    TemplateRender(String),

    // ── Serialization ────────────────────────────────────────────────

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PlinthError {
    /// Returns the HTTP status code associated with this error.
    ///
    /// - `BadRequest` -> 400
    /// - `NotFound` -> 404
    /// - Everything else -> 500
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::NotFound(_) => 404,
            Self::InternalServerError(_)
            | Self::ConfigurationError(_)
            | Self::ImproperlyConfigured(_)
            | Self::TemplateNotFound(_)
            | Self::TemplateRender(_)
            | Self::SerializationError(_)
            | Self::IoError(_) => 500,
        }
    }
}

/// A convenience type alias for `Result<T, PlinthError>`.
pub type PlinthResult<T> = Result<T, PlinthError>;
