//! Error taxonomy shared by every registry operation.
//!
//! Leaf clients (document store, snapshot store, VCS host) report failures as a boxed
//! [`ClientError`]. Core operations translate those into a [`RegistryError`], which carries an
//! [`ErrorKind`] and a message. Only the boundary layer (CLI, HTTP front end) maps a kind to a
//! transport status through [`ErrorKind::status_code`].

/// Error type returned by the external store, blob and VCS clients.
pub type ClientError = Box<dyn std::error::Error + Send + Sync>;

/// Message shown to callers for every internal failure.
pub const GENERIC_INTERNAL_MESSAGE: &str = "Oops, something went wrong";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Internal,
}

impl ErrorKind {
    /// HTTP-equivalent status for this kind of failure.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::NotFound => 404,
            ErrorKind::Internal => 500,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Validation(_) => ErrorKind::Validation,
            RegistryError::Conflict(_) => ErrorKind::Conflict,
            RegistryError::NotFound(_) => ErrorKind::NotFound,
            RegistryError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to return to a caller. Internal details never leave the process.
    pub fn public_message(&self) -> &str {
        match self {
            RegistryError::Validation(m) | RegistryError::Conflict(m) | RegistryError::NotFound(m) => m,
            RegistryError::Internal(_) => GENERIC_INTERNAL_MESSAGE,
        }
    }

    /// Logs the underlying client error with its context and wraps it as an internal error.
    pub fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        tracing::error!(context = context, error = %err, "Internal failure");
        RegistryError::Internal(format!("{context}: {err}"))
    }
}
