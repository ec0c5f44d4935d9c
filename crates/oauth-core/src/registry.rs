//! Server-config registry (spec §4.4 / C4): an in-memory map of
//! `server_name → ServerConfig`, guarded by a single-writer/many-reader
//! lock, validated against the provider registry on every write.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{OAuthError, OAuthResult, ValidationError};
use crate::providers::ProviderRegistry;
use crate::types::ServerConfig;

/// Registry of per-server OAuth configuration.
pub struct ServerConfigRegistry {
    configs: RwLock<HashMap<String, ServerConfig>>,
}

impl ServerConfigRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self { configs: RwLock::new(HashMap::new()) }
    }

    /// Validate `config` against `providers`. Every field-level problem is
    /// collected rather than short-circuiting on the first one.
    pub fn validate(config: &ServerConfig, providers: &ProviderRegistry) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if config.server_name.trim().is_empty() {
            errors.push(ValidationError::error("server_name", &config.server_name, "required", "server_name must not be empty"));
        }
        if config.client_id.trim().is_empty() {
            errors.push(ValidationError::error("client_id", &config.client_id, "required", "client_id must not be empty"));
        }
        if providers.get(config.provider_type.key()).is_none() {
            errors.push(ValidationError::error(
                "provider_type",
                config.provider_type.key(),
                "not_registered",
                "no provider registered for this provider_type",
            ));
        }
        if !config.has_valid_redirect_scheme() {
            errors.push(ValidationError::error(
                "redirect_uri",
                &config.redirect_uri,
                "not_https",
                "redirect_uri must be https unless host is localhost/127.0.0.1",
            ));
        }
        errors
    }

    /// Register a new server config. Requires the provider to already be
    /// registered and the config to pass validation; stamps
    /// `created_at`/`updated_at`.
    pub async fn register(&self, mut config: ServerConfig, providers: &ProviderRegistry) -> OAuthResult<()> {
        let errors = Self::validate(&config, providers);
        if !errors.is_empty() {
            return Err(OAuthError::ConfigInvalid(errors));
        }
        let now = Utc::now();
        config.created_at = now;
        config.updated_at = now;
        self.configs.write().await.insert(config.server_name.clone(), config);
        Ok(())
    }

    /// Update an existing config, preserving `created_at` and bumping
    /// `updated_at`. Re-validates the merged result.
    pub async fn update(&self, mut config: ServerConfig, providers: &ProviderRegistry) -> OAuthResult<()> {
        let errors = Self::validate(&config, providers);
        if !errors.is_empty() {
            return Err(OAuthError::ConfigInvalid(errors));
        }
        let mut guard = self.configs.write().await;
        let created_at = guard
            .get(&config.server_name)
            .map(|existing| existing.created_at)
            .ok_or_else(|| OAuthError::ConfigNotFound(config.server_name.clone()))?;
        config.created_at = created_at;
        config.updated_at = Utc::now();
        guard.insert(config.server_name.clone(), config);
        Ok(())
    }

    /// Fetch an active config by name.
    pub async fn get(&self, server_name: &str) -> OAuthResult<ServerConfig> {
        let guard = self.configs.read().await;
        let config = guard
            .get(server_name)
            .ok_or_else(|| OAuthError::ConfigNotFound(server_name.to_string()))?;
        if !config.is_active {
            return Err(OAuthError::DisabledConfig(server_name.to_string()));
        }
        Ok(config.clone())
    }

    /// Remove a config, regardless of `is_active`.
    pub async fn remove(&self, server_name: &str) -> OAuthResult<()> {
        let mut guard = self.configs.write().await;
        guard
            .remove(server_name)
            .map(|_| ())
            .ok_or_else(|| OAuthError::ConfigNotFound(server_name.to_string()))
    }

    /// Snapshot of every registered config, active or not.
    pub async fn list(&self) -> Vec<ServerConfig> {
        self.configs.read().await.values().cloned().collect()
    }

    /// Insert `config` verbatim, skipping validation and timestamp
    /// stamping. For admin-surface processes rehydrating a registry from
    /// a config already validated when it was first `register`ed.
    pub async fn insert_trusted(&self, config: ServerConfig) {
        self.configs.write().await.insert(config.server_name.clone(), config);
    }
}

impl Default for ServerConfigRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderRegistry;
    use crate::types::ProviderType;
    use std::collections::HashMap as Map;

    fn sample(name: &str) -> ServerConfig {
        let now = Utc::now();
        ServerConfig {
            server_name: name.into(),
            provider_type: ProviderType::Github,
            tenant_id: None,
            client_id: "client".into(),
            client_secret: None,
            scopes: vec![],
            redirect_uri: "https://example.com/callback".into(),
            auth_url: None,
            token_url: None,
            jwks_url: None,
            extra: Map::new(),
            created_at: now,
            updated_at: now,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn register_then_get_roundtrips() {
        let registry = ServerConfigRegistry::new();
        let providers = ProviderRegistry::with_defaults();
        registry.register(sample("svc-a"), &providers).await.unwrap();
        let fetched = registry.get("svc-a").await.unwrap();
        assert_eq!(fetched.server_name, "svc-a");
    }

    #[tokio::test]
    async fn disabled_config_fails_get() {
        let registry = ServerConfigRegistry::new();
        let providers = ProviderRegistry::with_defaults();
        let mut cfg = sample("svc-b");
        cfg.is_active = false;
        registry.register(cfg, &providers).await.unwrap();
        assert!(matches!(registry.get("svc-b").await, Err(OAuthError::DisabledConfig(_))));
    }

    #[tokio::test]
    async fn unregistered_provider_rejected() {
        let registry = ServerConfigRegistry::new();
        let providers = ProviderRegistry::new();
        let err = registry.register(sample("svc-c"), &providers).await.unwrap_err();
        assert!(matches!(err, OAuthError::ConfigInvalid(_)));
    }
}
