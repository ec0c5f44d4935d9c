//! Unified error taxonomy for the OAuth interception subsystem.
//!
//! One `thiserror`-derived enum per the behavioral categories named by the
//! design: configuration, storage, provider, interceptor, and flag errors
//! all live here so callers can match on category without string-sniffing.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type OAuthResult<T> = Result<T, OAuthError>;

/// A single structured validation failure (field, code, severity).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidationError {
    /// Field the error applies to.
    pub field: String,
    /// Offending value, rendered for diagnostics.
    pub value: String,
    /// Human-readable message.
    pub message: String,
    /// Machine-readable code, e.g. `"required"`, `"not_https"`.
    pub code: String,
    /// Severity of the finding.
    pub severity: ValidationSeverity,
}

/// Severity of a [`ValidationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ValidationSeverity {
    /// Rejects the operation.
    Error,
    /// Accepted, but surfaced to the caller.
    Warning,
}

impl ValidationError {
    /// Build an `Error`-severity validation failure.
    pub fn error(field: impl Into<String>, value: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            message: message.into(),
            code: code.into(),
            severity: ValidationSeverity::Error,
        }
    }
}

/// Top-level error type for OAuth interception, storage, providers, and
/// flag evaluation.
#[derive(Debug, Error)]
pub enum OAuthError {
    // --- Configuration ---
    /// No server config registered under this name.
    #[error("server config not found: {0}")]
    ConfigNotFound(String),

    /// Server config failed validation.
    #[error("server config invalid: {0:?}")]
    ConfigInvalid(Vec<ValidationError>),

    /// `provider_type` has no registered provider.
    #[error("provider not registered: {0}")]
    ProviderNotRegistered(String),

    /// Config exists but `is_active = false`.
    #[error("server config disabled: {0}")]
    DisabledConfig(String),

    // --- Storage ---
    /// Every configured tier failed the operation.
    #[error("no storage tier available")]
    NoTierAvailable,

    /// A tier failed but the caller should retry / fall forward.
    #[error("storage tier transient failure ({tier}): {message}")]
    TierTransient {
        /// Tier name.
        tier: String,
        /// Underlying message.
        message: String,
    },

    /// A write/delete was attempted against a read-only tier.
    #[error("storage tier is read-only: {0}")]
    ReadOnlyTier(String),

    /// Decryption of at-rest secret material failed.
    #[error("failed to decrypt stored token: {0}")]
    DecryptFailed(String),

    // --- Provider ---
    /// Network/transport failure talking to a provider endpoint.
    #[error("provider transport error ({provider}): {source}")]
    ProviderTransport {
        /// Provider name.
        provider: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Provider responded with a non-2xx status.
    #[error("provider returned status {code} from {url}")]
    ProviderStatus {
        /// HTTP status code.
        code: u16,
        /// URL that was called.
        url: String,
        /// Response body, if any, for diagnostics.
        body: Option<String>,
    },

    /// Provider response could not be parsed into the expected shape.
    #[error("provider payload error ({provider}): {message}")]
    ProviderPayload {
        /// Provider name.
        provider: String,
        /// Parse failure detail.
        message: String,
    },

    /// Provider does not support refresh (e.g. GitHub).
    #[error("provider {0} does not support token refresh")]
    UnsupportedRefresh(String),

    /// Provider does not support revocation (e.g. Microsoft).
    #[error("provider {0} does not support token revocation")]
    UnsupportedRevocation(String),

    // --- Interceptor ---
    /// Retries against the upstream server were exhausted on transport errors.
    #[error("transport retries exhausted after {attempts} attempts")]
    TransportExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Final classification was 401 and no further refresh was possible.
    #[error("unauthorized: upstream rejected the token")]
    Unauthorized,

    /// Retries against a retriable status code were exhausted.
    #[error("retry budget exhausted after {attempts} attempts, last status {last_status}")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last observed HTTP status.
        last_status: u16,
    },

    /// Operation was cancelled via its cancellation handle.
    #[error("operation cancelled")]
    Cancelled,

    /// Operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    // --- Flags ---
    /// Referenced flag does not exist in the active configuration.
    #[error("flag not found: {0}")]
    FlagNotFound(String),

    /// Flag definition failed validation.
    #[error("invalid flag definition: {0:?}")]
    InvalidFlag(Vec<ValidationError>),

    /// Evaluation exceeded its deadline.
    #[error("flag evaluation timed out")]
    EvaluationTimeout,

    /// Circuit breaker is open; evaluation short-circuited to failsafe.
    #[error("circuit breaker open for flag manager")]
    CircuitOpen,

    /// A remote config source was rejected before fetching (SSRF guard).
    #[error("config source blocked: {0}")]
    ConfigSourceBlocked(String),

    /// A remote config source (HTTP or database) failed to produce a
    /// configuration.
    #[error("config source unavailable: {0}")]
    ConfigSourceUnavailable(String),

    // --- Generic passthroughs ---
    /// Structured validation failure not tied to config/flag specifically.
    #[error("validation failed: {0:?}")]
    Validation(Vec<ValidationError>),

    /// I/O failure (local secrets tier, config file loading).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization failure (config file loader).
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Global configuration failed to load or deserialize.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Categorize an error into the buckets used by the metrics collector.
///
/// Mirrors the "substring match against a fixed bucket list" heuristic
/// from the design rather than a 1:1 mapping from variants, since
/// provider-originated messages (propagated from `ProviderPayload`, etc.)
/// need the same bucketing as locally-raised errors.
pub fn categorize_error(err: &OAuthError) -> &'static str {
    let haystack = err.to_string().to_lowercase();
    const BUCKETS: &[&str] = &[
        "timeout",
        "not_found",
        "validation",
        "permission",
        "circuit_breaker",
        "cache",
        "database",
        "network",
    ];
    for bucket in BUCKETS {
        let needle = bucket.replace('_', " ");
        if haystack.contains(bucket) || haystack.contains(&needle) {
            return bucket;
        }
    }
    if haystack.contains("not found") {
        return "not_found";
    }
    if haystack.contains("circuit breaker") {
        return "circuit_breaker";
    }
    if haystack.contains("transport") || haystack.contains("connection") {
        return "network";
    }
    "unknown"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_known_buckets() {
        assert_eq!(categorize_error(&OAuthError::Timeout), "timeout");
        assert_eq!(
            categorize_error(&OAuthError::ConfigNotFound("svc".into())),
            "not_found"
        );
        assert_eq!(categorize_error(&OAuthError::CircuitOpen), "circuit_breaker");
    }

    #[test]
    fn unknown_falls_through() {
        assert_eq!(categorize_error(&OAuthError::Cancelled), "unknown");
    }
}
