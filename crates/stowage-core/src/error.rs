// ── Core error types ──
//
// Store-level errors. Transport failures arrive as `stowage_api::Error`
// and are translated into domain variants by the `From` impl below, so
// callers never match on HTTP plumbing directly.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Caller errors (raised before any side effect) ────────────────
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Record not found: {identifier}")]
    NotFound { identifier: String },

    #[error("More than one record matches {field} = {value} ({count} matches)")]
    MoreThanOne {
        field: String,
        value: String,
        count: usize,
    },

    #[error("Revision mismatch for {key}: expected {expected}, found {actual}")]
    RevisionMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    // ── Remote errors ────────────────────────────────────────────────
    #[error("Cannot connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Remote error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Persistence errors ───────────────────────────────────────────
    #[error("Storage error ({backend}): {message}")]
    Storage { backend: String, message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            identifier: identifier.into(),
        }
    }

    /// Returns `true` when the error was raised by argument or
    /// configuration validation rather than by an operation in flight.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. } | Self::Config { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<stowage_api::Error> for CoreError {
    fn from(err: stowage_api::Error) -> Self {
        match err {
            stowage_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            stowage_api::Error::Http { status: 404, message } => CoreError::NotFound {
                identifier: message,
            },
            stowage_api::Error::Http { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            stowage_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            stowage_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            stowage_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            stowage_api::Error::Deserialization { message, body: _ } => CoreError::InvalidData {
                message: format!("Deserialization error: {message}"),
            },
            stowage_api::Error::Jsonp { message } => CoreError::InvalidData { message },
        }
    }
}

impl From<redb::Error> for CoreError {
    fn from(err: redb::Error) -> Self {
        CoreError::Storage {
            backend: "database".into(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_404_becomes_not_found() {
        let err = CoreError::from(stowage_api::Error::Http {
            status: 404,
            message: "gone".into(),
        });
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn http_500_keeps_status() {
        let err = CoreError::from(stowage_api::Error::Http {
            status: 500,
            message: "boom".into(),
        });
        assert!(matches!(err, CoreError::Api { status: Some(500), .. }));
    }

    #[test]
    fn more_than_one_message_names_field() {
        let err = CoreError::MoreThanOne {
            field: "id".into(),
            value: "\"a\"".into(),
            count: 2,
        };
        assert_eq!(
            err.to_string(),
            "More than one record matches id = \"a\" (2 matches)"
        );
    }

    #[test]
    fn caller_errors_are_flagged() {
        assert!(CoreError::invalid("x").is_caller_error());
        assert!(!CoreError::not_found("k").is_caller_error());
    }
}
