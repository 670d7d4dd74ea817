//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use stowage_config::ConfigError;
use stowage_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to {url}")]
    #[diagnostic(
        code(stowage::connection_failed),
        help(
            "Check that the endpoint is reachable.\n\
             Reason: {reason}\n\
             For self-signed certificates try --insecure (-k)."
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(stowage::timeout),
        help("Increase the limit with --timeout or in the profile.")
    )]
    Timeout { seconds: u64 },

    #[error("Remote error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    #[diagnostic(code(stowage::remote))]
    Remote { message: String, status: Option<u16> },

    // ── Data ─────────────────────────────────────────────────────────
    #[error("'{identifier}' not found")]
    #[diagnostic(code(stowage::not_found))]
    NotFound { identifier: String },

    #[error("{message}")]
    #[diagnostic(
        code(stowage::conflict),
        help("Join fields must identify at most one record on the opposite side.")
    )]
    Conflict { message: String },

    #[error("Invalid data: {message}")]
    #[diagnostic(code(stowage::invalid_data))]
    InvalidData { message: String },

    #[error("Storage error: {message}")]
    #[diagnostic(
        code(stowage::storage),
        help("Check the [storage] paths in your config: stowage config show")
    )]
    Storage { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(stowage::validation))]
    Validation { field: String, reason: String },

    #[error("No collection URI given")]
    #[diagnostic(
        code(stowage::no_uri),
        help(
            "Pass one as an argument, or set `uri` in profile '{profile}'.\n\
             Create a profile with: stowage config init --uri <URI>"
        )
    )]
    NoUri { profile: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(stowage::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: stowage config init --name {name}"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(code(stowage::config_exists), help("Use --force to overwrite it."))]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(stowage::config))]
    Config(ConfigError),

    #[error("Internal error: {0}")]
    #[diagnostic(code(stowage::internal))]
    Internal(String),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render config: {0}")]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } | Self::ConfigExists { .. } => exit_code::CONFLICT,
            Self::Validation { .. } | Self::NoUri { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => {
                CliError::ConnectionFailed { url, reason }
            }
            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },
            CoreError::Api { message, status } => CliError::Remote { message, status },
            CoreError::NotFound { identifier } => CliError::NotFound { identifier },
            err @ (CoreError::MoreThanOne { .. } | CoreError::RevisionMismatch { .. }) => {
                CliError::Conflict {
                    message: err.to_string(),
                }
            }
            CoreError::InvalidArgument { message } => CliError::Validation {
                field: "argument".into(),
                reason: message,
            },
            CoreError::Config { message } => CliError::Validation {
                field: "configuration".into(),
                reason: message,
            },
            CoreError::InvalidData { message } => CliError::InvalidData { message },
            CoreError::Storage { backend, message } => CliError::Storage {
                message: format!("{backend}: {message}"),
            },
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound {
                name: profile,
                available: String::new(),
            },
            other => CliError::Config(other),
        }
    }
}

impl From<stowage_api::Error> for CliError {
    fn from(err: stowage_api::Error) -> Self {
        CoreError::from(err).into()
    }
}
