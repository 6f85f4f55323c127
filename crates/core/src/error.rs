//! Error types for the Amaryllis domain.
//!
//! Uses `thiserror` for ergonomic error definitions. [`Error`] is the one
//! domain error every public entry point returns; each variant carries a
//! machine-readable code (see [`Error::code`]). Failures coming out of the
//! native inference engine are reported as [`NativeError`] and normalized by
//! the engine handle before they reach a caller.

use thiserror::Error;

pub const INIT_ERROR: &str = "INIT_ERROR";
pub const GENERATION_ERROR: &str = "GENERATION_ERROR";
pub const SESSION_ERROR: &str = "SESSION_ERROR";
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const RESOURCE_ERROR: &str = "RESOURCE_ERROR";
pub const STORE_ERROR: &str = "STORE_ERROR";
pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";

/// The top-level error type for all Amaryllis operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The engine failed to load or configure.
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// A generation attempt failed.
    #[error("Generation error: {0}")]
    Generation(String),

    /// Session creation or configuration was invalid.
    #[error("Session error: {0}")]
    Session(String),

    /// A context item, query, policy or media reference failed a structural check.
    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    /// Native-side resource exhaustion (memory, handles).
    #[error("Resource error: {0}")]
    Resource(String),

    /// A context store backend failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Any other domain error, tagged with a caller-chosen code.
    #[error("{message}")]
    Other { code: String, message: String },
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a generic domain error with an explicit code.
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Other {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a generic domain error with the `UNKNOWN_ERROR` code.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(message, UNKNOWN_ERROR)
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Machine-readable code for this error.
    pub fn code(&self) -> &str {
        match self {
            Self::Initialization(_) => INIT_ERROR,
            Self::Generation(_) => GENERATION_ERROR,
            Self::Session(_) => SESSION_ERROR,
            Self::Validation { .. } => VALIDATION_ERROR,
            Self::Resource(_) => RESOURCE_ERROR,
            Self::Store(_) => STORE_ERROR,
            Self::Other { code, .. } => code,
        }
    }

    /// The offending field for validation errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

/// Returns `true` when `error` is an Amaryllis domain error rather than some
/// arbitrary error value.
pub fn is_amaryllis_error(error: &(dyn std::error::Error + 'static)) -> bool {
    error.downcast_ref::<Error>().is_some()
}

/// Errors reported by the native inference engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NativeError {
    #[error("invalid model path: {0}")]
    InvalidModelPath(String),

    #[error("engine not initialized")]
    NotInitialized,

    #[error("a session is required for this request")]
    SessionRequired,

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("{0}")]
    Failed(String),
}

/// The call stage a native failure happened in. Decides which domain error
/// kind the failure is reported as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeStage {
    Init,
    Session,
    Generate,
}

impl Error {
    /// Normalize a native failure into the domain taxonomy.
    pub fn from_native(stage: NativeStage, error: NativeError) -> Self {
        match (stage, error) {
            (_, NativeError::OutOfMemory(reason)) => Self::Resource(reason),
            (_, NativeError::SessionRequired) => {
                Self::Session(NativeError::SessionRequired.to_string())
            }
            (NativeStage::Init, e) => Self::Initialization(e.to_string()),
            (NativeStage::Session, e) => Self::Session(e.to_string()),
            (NativeStage::Generate, e) => Self::Generation(e.to_string()),
        }
    }
}
