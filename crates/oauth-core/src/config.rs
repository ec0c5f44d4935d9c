//! Global crate configuration (spec §6): storage, interceptor, and flag
//! settings loaded from a layered file/environment source.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;

use crate::error::OAuthResult;
use crate::interceptor::backoff::BackoffPolicy;
use crate::interceptor::InterceptorSettings;

/// Storage-tier configuration: where the local secrets directory lives,
/// the at-rest encryption key, and whether the KeyVault tier is wired up.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Root directory for the filesystem (Tier 2) store.
    pub local_secrets_dir: PathBuf,
    /// 32-byte key for [`crate::store::EncryptionService`], if encryption
    /// at rest is enabled.
    pub encryption_key: Option<SecretString>,
    /// Whether a KeyVault (Tier 1) backend should be wired in.
    pub keyvault_enabled: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            local_secrets_dir: default_secrets_dir(),
            encryption_key: None,
            keyvault_enabled: false,
        }
    }
}

fn default_secrets_dir() -> PathBuf {
    dirs_secrets_dir().unwrap_or_else(|| PathBuf::from(".oauth-secrets"))
}

fn dirs_secrets_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/oauth-portal/secrets"))
}

/// Top-level, deserializable application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Storage-tier settings.
    pub storage: StorageSettings,
    /// Interceptor behavior (refresh skew, backoff, retry policy).
    pub interceptor: InterceptorSettings,
    /// Path to the flag configuration file, if loaded from disk.
    pub flags_config_path: Option<PathBuf>,
    /// `tracing` filter directive, e.g. `"oauth_core=info"`.
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageSettings::default(),
            interceptor: InterceptorSettings::default(),
            flags_config_path: None,
            log_filter: "oauth_core=info".to_string(),
        }
    }
}

/// Wire shape deserialized directly from the layered `config` sources;
/// converted into [`AppConfig`] afterward so durations/paths/secrets get
/// their proper types.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct RawAppConfig {
    local_secrets_dir: Option<String>,
    encryption_key: Option<String>,
    keyvault_enabled: Option<bool>,
    refresh_threshold_secs: Option<i64>,
    backoff_initial_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
    backoff_max_secs: Option<u64>,
    retry_on_401: Option<bool>,
    request_timeout_secs: Option<u64>,
    flags_config_path: Option<String>,
    log_filter: Option<String>,
}

/// Loads [`AppConfig`] by layering, in increasing priority: built-in
/// defaults, an optional config file, then `OAUTH_*` environment
/// variables.
pub struct AppConfigLoader {
    file_path: Option<PathBuf>,
}

impl AppConfigLoader {
    /// A loader with no file source; only defaults and environment.
    pub fn new() -> Self {
        Self { file_path: None }
    }

    /// A loader that also reads `path` if it exists (missing files are
    /// silently skipped, matching the `config` crate's `File::required(false)`).
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self { file_path: Some(path.into()) }
    }

    /// Build the layered configuration and materialize an [`AppConfig`].
    pub fn load(&self) -> OAuthResult<AppConfig> {
        let mut builder = Config::builder();
        if let Some(path) = &self.file_path {
            builder = builder.add_source(File::from(path.as_path()).required(false));
        }
        builder = builder.add_source(Environment::with_prefix("OAUTH").separator("__"));

        let raw: RawAppConfig = builder.build()?.try_deserialize().unwrap_or_default();
        Ok(materialize(raw))
    }
}

impl Default for AppConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn materialize(raw: RawAppConfig) -> AppConfig {
    let defaults = AppConfig::default();
    let default_backoff = BackoffPolicy::default();
    let default_interceptor = InterceptorSettings::default();

    AppConfig {
        storage: StorageSettings {
            local_secrets_dir: raw
                .local_secrets_dir
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.local_secrets_dir),
            encryption_key: raw.encryption_key.map(SecretString::from),
            keyvault_enabled: raw.keyvault_enabled.unwrap_or(defaults.storage.keyvault_enabled),
        },
        interceptor: InterceptorSettings {
            refresh_threshold: raw
                .refresh_threshold_secs
                .map(chrono::Duration::seconds)
                .unwrap_or(default_interceptor.refresh_threshold),
            backoff: BackoffPolicy {
                initial_interval: raw
                    .backoff_initial_ms
                    .map(Duration::from_millis)
                    .unwrap_or(default_backoff.initial_interval),
                multiplier: raw.backoff_multiplier.unwrap_or(default_backoff.multiplier),
                max_interval: raw
                    .backoff_max_secs
                    .map(Duration::from_secs)
                    .unwrap_or(default_backoff.max_interval),
                jitter: default_backoff.jitter,
            },
            retriable_statuses: default_interceptor.retriable_statuses,
            retry_on_401: raw.retry_on_401.unwrap_or(default_interceptor.retry_on_401),
            request_timeout: raw
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_interceptor.request_timeout),
        },
        flags_config_path: raw.flags_config_path.map(PathBuf::from).or(defaults.flags_config_path),
        log_filter: raw.log_filter.unwrap_or(defaults.log_filter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_any_source() {
        let config = AppConfigLoader::new().load().unwrap();
        assert_eq!(config.log_filter, "oauth_core=info");
        assert!(!config.storage.keyvault_enabled);
    }

    #[test]
    fn environment_overrides_defaults() {
        std::env::set_var("OAUTH__LOG_FILTER", "oauth_core=debug");
        std::env::set_var("OAUTH__KEYVAULT_ENABLED", "true");
        let config = AppConfigLoader::new().load().unwrap();
        std::env::remove_var("OAUTH__LOG_FILTER");
        std::env::remove_var("OAUTH__KEYVAULT_ENABLED");
        assert_eq!(config.log_filter, "oauth_core=debug");
        assert!(config.storage.keyvault_enabled);
    }
}
