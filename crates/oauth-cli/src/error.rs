//! CLI-specific error types.

use thiserror::Error;

/// CLI-level errors, separate from [`oauth_core::OAuthError`] so
/// argument/IO problems surface with their own exit-code mapping.
#[derive(Error, Debug)]
pub enum CliError {
    /// The OAuth subsystem itself returned an error.
    #[error("{0}")]
    Core(#[from] oauth_core::OAuthError),

    /// A required argument was missing or malformed.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The server-config store file could not be read or written.
    #[error("config store error: {0}")]
    Io(#[from] std::io::Error),

    /// The server-config store file was not valid JSON.
    #[error("config store is corrupt: {0}")]
    Json(#[from] serde_json::Error),

    /// No server is registered under that name.
    #[error("no server registered as '{0}'")]
    UnknownServer(String),

    /// A proxied request completed but the upstream returned a non-2xx
    /// status; the response body was already printed, this only carries
    /// the status through to the process exit code.
    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),
}

impl CliError {
    /// Process exit code for this error (spec §6: "0 success, 1 generic
    /// failure, HTTP status mirrored on proxied requests"; validation
    /// failures are exit code 1, not a separate code, per that wording).
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UpstreamStatus(code) => i32::from(*code) % 256,
            Self::UnknownServer(_) => 3,
            _ => 1,
        }
    }
}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_exit_1() {
        assert_eq!(CliError::InvalidArguments("missing --code".into()).exit_code(), 1);
    }

    #[test]
    fn upstream_status_mirrors_http_code() {
        assert_eq!(CliError::UpstreamStatus(404).exit_code(), 404);
        assert_eq!(CliError::UpstreamStatus(500).exit_code(), 500 % 256);
    }
}
