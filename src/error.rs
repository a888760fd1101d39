//! Error taxonomy for the catalogue engine.
//!
//! Errors fall into four groups: caller errors (rejected before any state
//! change), invariant violations (the enclosing transaction is rolled back),
//! fatal storage errors (the job stream stops) and the shutdown signal.
//! Unreadable files during import are not errors at all; they come back as a
//! failed [`ImportStatus`](crate::import::ImportStatus).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// No action with this name exists for the job kind.
    #[error("unknown {kind} action: {name}")]
    UnknownAction { kind: &'static str, name: String },

    /// The action exists but was handed the wrong argument payload.
    #[error("invalid arguments for action {action}: expected {expected}")]
    InvalidArguments {
        action: &'static str,
        expected: &'static str,
    },

    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    #[error("unknown service: {0}")]
    UnknownService(String),

    /// A service record whose extra fields do not fit its type, or an edit
    /// that touches a protected service.
    #[error("invalid service: {0}")]
    InvalidService(String),

    /// A content update aimed at a service that cannot take it.
    #[error("invalid content update: {0}")]
    InvalidUpdate(String),

    #[error("invalid rating: {0}")]
    InvalidRating(String),

    #[error("service key already in use: {0}")]
    DuplicateService(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The job stream has stopped, or stopped before this job ran.
    #[error("job scheduler is shut down")]
    ShutDown,
}

impl Error {
    /// Fatal errors mean the persisted state can no longer be trusted and the
    /// scheduler must stop rather than run further jobs.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Io(_) | Error::Serialization(_))
    }

    /// Caller errors are rejected without touching state.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownAction { .. }
                | Error::InvalidArguments { .. }
                | Error::InvalidPredicate(_)
                | Error::UnknownService(_)
                | Error::InvalidService(_)
                | Error::InvalidUpdate(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(io.is_fatal());
        assert!(!io.is_caller_error());

        let unknown = Error::UnknownAction { kind: "read", name: "nope".to_string() };
        assert!(unknown.is_caller_error());
        assert!(!unknown.is_fatal());

        assert!(!Error::InvalidRating("6 > 5".to_string()).is_fatal());
        assert!(!Error::ShutDown.is_caller_error());
    }

    #[test]
    fn test_display() {
        let err = Error::UnknownAction { kind: "write", name: "frobnicate".to_string() };
        assert_eq!(err.to_string(), "unknown write action: frobnicate");
    }
}
