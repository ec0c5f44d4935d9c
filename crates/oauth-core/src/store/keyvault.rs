//! Tier 1: remote key-vault backed token storage (spec §4.2).
//!
//! The wire protocol to an actual vault (Azure Key Vault, Vault, etc.) is
//! deployment-specific, so this tier is expressed over a small
//! [`KeyVaultBackend`] trait; production code supplies an HTTP-backed
//! implementation, tests use [`InMemoryBackend`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::call::CallContext;
use crate::error::{OAuthError, OAuthResult};
use crate::types::{StorageTier, TokenData, TokenKey};

use super::Tier;

/// Minimal secret-storage contract a real key vault client implements.
#[async_trait]
pub trait KeyVaultBackend: Send + Sync {
    /// Write `value` under `name`.
    async fn put_secret(&self, name: &str, value: &str) -> OAuthResult<()>;
    /// Read the secret under `name`, if present.
    async fn get_secret(&self, name: &str) -> OAuthResult<Option<String>>;
    /// Delete the secret under `name`.
    async fn delete_secret(&self, name: &str) -> OAuthResult<bool>;
    /// List all secret names under this vault's token namespace.
    async fn list_secrets(&self) -> OAuthResult<Vec<String>>;
    /// Whether the backend is currently reachable.
    async fn ping(&self) -> bool;
}

/// `KeyVaultBackend` over a process-local map, for tests and for
/// single-node deployments without a real vault.
#[derive(Default)]
pub struct InMemoryBackend {
    data: RwLock<HashMap<String, String>>,
}

impl InMemoryBackend {
    /// An empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyVaultBackend for InMemoryBackend {
    async fn put_secret(&self, name: &str, value: &str) -> OAuthResult<()> {
        self.data.write().await.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn get_secret(&self, name: &str) -> OAuthResult<Option<String>> {
        Ok(self.data.read().await.get(name).cloned())
    }

    async fn delete_secret(&self, name: &str) -> OAuthResult<bool> {
        Ok(self.data.write().await.remove(name).is_some())
    }

    async fn list_secrets(&self) -> OAuthResult<Vec<String>> {
        Ok(self.data.read().await.keys().cloned().collect())
    }

    async fn ping(&self) -> bool {
        true
    }
}

fn secret_name(server_name: &str, user_id: &str) -> String {
    TokenKey::new(server_name, user_id).env_var_name().to_lowercase()
}

/// Tier 1, delegating persistence to a [`KeyVaultBackend`].
pub struct KeyVaultTier {
    backend: Arc<dyn KeyVaultBackend>,
}

impl KeyVaultTier {
    /// Build the tier over `backend`.
    pub fn new(backend: Arc<dyn KeyVaultBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tier for KeyVaultTier {
    fn tier(&self) -> StorageTier {
        StorageTier::KeyVault
    }

    async fn store(&self, token: &TokenData, ctx: &CallContext) -> OAuthResult<()> {
        ctx.check_cancelled()?;
        let name = secret_name(&token.server_name, &token.user_id);
        let body = serde_json::to_string(token)?;
        self.backend
            .put_secret(&name, &body)
            .await
            .map_err(|e| OAuthError::TierTransient { tier: "keyvault".into(), message: e.to_string() })
    }

    async fn get(&self, server_name: &str, user_id: &str, ctx: &CallContext) -> OAuthResult<Option<TokenData>> {
        ctx.check_cancelled()?;
        let name = secret_name(server_name, user_id);
        match self.backend.get_secret(&name).await {
            Ok(Some(raw)) => Ok(Some(serde_json::from_str(&raw)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(OAuthError::TierTransient { tier: "keyvault".into(), message: e.to_string() }),
        }
    }

    async fn delete(&self, server_name: &str, user_id: &str, ctx: &CallContext) -> OAuthResult<bool> {
        ctx.check_cancelled()?;
        let name = secret_name(server_name, user_id);
        self.backend
            .delete_secret(&name)
            .await
            .map_err(|e| OAuthError::TierTransient { tier: "keyvault".into(), message: e.to_string() })
    }

    /// A stub per spec §9 open question: the source's `list`/`migrate`
    /// contract is a stub here too; a real deployment realizes this via a
    /// secondary index if the backend has no native prefix listing.
    async fn list(&self, user_id: &str, ctx: &CallContext) -> OAuthResult<Vec<TokenData>> {
        ctx.check_cancelled()?;
        let suffix = format!("_{}", user_id.to_lowercase().replace(|c: char| !c.is_ascii_alphanumeric(), "_"));
        let names = self.backend.list_secrets().await.unwrap_or_default();
        let mut out = Vec::new();
        for name in names {
            if !name.ends_with(&suffix) {
                continue;
            }
            if let Ok(Some(raw)) = self.backend.get_secret(&name).await {
                if let Ok(token) = serde_json::from_str::<TokenData>(&raw) {
                    out.push(token);
                }
            }
        }
        Ok(out)
    }

    async fn health(&self, _ctx: &CallContext) -> bool {
        self.backend.ping().await
    }

    async fn sweep_expired(&self, now: chrono::DateTime<chrono::Utc>, ctx: &CallContext) -> OAuthResult<u64> {
        ctx.check_cancelled()?;
        let names = self.backend.list_secrets().await.unwrap_or_default();
        let mut removed = 0u64;
        for name in names {
            if let Ok(Some(raw)) = self.backend.get_secret(&name).await {
                if let Ok(token) = serde_json::from_str::<TokenData>(&raw) {
                    if token.expires_at < now && self.backend.delete_secret(&name).await.unwrap_or(false) {
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }
}
