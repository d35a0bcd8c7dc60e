//! Crate-wide error type.
//!
//! Every fallible operation in this crate returns [`Error`], tagged with an
//! [`ErrorKind`] describing *why* it failed rather than *where*. The HTTP
//! dispatcher (`api::responses`) is the only place that knows how a kind maps
//! to a status code; everything below it only ever produces or matches on
//! kinds.

use std::fmt;

/// The reason an operation failed, independent of the transport that will
/// eventually report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-supplied input failed validation (bad URL, malformed short code).
    InvalidInput,
    /// No record exists for the given key.
    NotFound,
    /// A uniqueness constraint was violated. Callers that can recover
    /// (idempotent create) handle this themselves; it otherwise propagates.
    Conflict,
    /// A rate limiter denied the request.
    RateLimited,
    /// The caller's deadline elapsed or its cancellation token fired.
    Cancelled,
    /// A dependency (store, cache) is unreachable after internal retries.
    Unavailable,
    /// An invariant was violated; always a bug, always logged loudly.
    Internal,
}

/// The crate's error type: a kind plus a human-readable message and an
/// optional source for `tracing`/`anyhow` chains.
#[derive(Debug, thiserror::Error)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Construct an error of the given kind with a message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach a source error for logging/debugging.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == ErrorKind::Conflict
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db_err) = e.as_database_error() {
            // Postgres 23505 and SQLite 1555/2067 both signal a UNIQUE violation.
            let is_unique = db_err.code().map_or(false, |c| {
                c == "23505" || c == "1555" || c == "2067"
            });
            if is_unique {
                return Error::conflict(db_err.message().to_string());
            }
        }
        if matches!(e, sqlx::Error::RowNotFound) {
            return Error::not_found("row not found");
        }
        Error::new(ErrorKind::Unavailable, e.to_string()).with_source(e)
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::new(ErrorKind::Unavailable, e.to_string()).with_source(e)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let e = Error::not_found("short code 9Q2 unknown");
        assert_eq!(e.kind(), ErrorKind::NotFound);
        assert!(format!("{e}").contains("NotFound"));
    }

    #[test]
    fn is_conflict_helper() {
        assert!(Error::conflict("dup").is_conflict());
        assert!(!Error::not_found("x").is_conflict());
    }
}
