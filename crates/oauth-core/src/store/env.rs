//! Tier 3: read-only environment-variable-backed tokens (spec §4.2,
//! §6: `OAUTH_TOKEN_<SERVER>_<USER>` holding a JSON-encoded token).

use async_trait::async_trait;

use crate::call::CallContext;
use crate::error::{OAuthError, OAuthResult};
use crate::types::{StorageTier, TokenData, TokenKey};

use super::Tier;

/// Reads tokens from process environment variables. Never writes.
pub struct EnvTier;

impl EnvTier {
    /// Construct the tier. Stateless; reads `std::env` directly.
    pub fn new() -> Self {
        Self
    }
}

impl Default for EnvTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tier for EnvTier {
    fn tier(&self) -> StorageTier {
        StorageTier::Env
    }

    async fn store(&self, _token: &TokenData, _ctx: &CallContext) -> OAuthResult<()> {
        Err(OAuthError::ReadOnlyTier("env".into()))
    }

    async fn get(&self, server_name: &str, user_id: &str, ctx: &CallContext) -> OAuthResult<Option<TokenData>> {
        ctx.check_cancelled()?;
        let var = TokenKey::new(server_name, user_id).env_var_name();
        match std::env::var(&var) {
            Ok(raw) => {
                let mut token: TokenData = serde_json::from_str(&raw)?;
                token.storage_tier = StorageTier::Env;
                Ok(Some(token))
            }
            Err(_) => Ok(None),
        }
    }

    async fn delete(&self, _server_name: &str, _user_id: &str, _ctx: &CallContext) -> OAuthResult<bool> {
        Err(OAuthError::ReadOnlyTier("env".into()))
    }

    async fn list(&self, user_id: &str, ctx: &CallContext) -> OAuthResult<Vec<TokenData>> {
        ctx.check_cancelled()?;
        let suffix = format!("_{}", user_id.to_uppercase().replace(|c: char| !c.is_ascii_alphanumeric(), "_"));
        let mut out = Vec::new();
        for (key, value) in std::env::vars() {
            if !key.starts_with("OAUTH_TOKEN_") || !key.ends_with(&suffix) {
                continue;
            }
            if let Ok(mut token) = serde_json::from_str::<TokenData>(&value) {
                token.storage_tier = StorageTier::Env;
                out.push(token);
            }
        }
        Ok(out)
    }

    async fn health(&self, _ctx: &CallContext) -> bool {
        true
    }

    async fn sweep_expired(&self, _now: chrono::DateTime<chrono::Utc>, _ctx: &CallContext) -> OAuthResult<u64> {
        Ok(0)
    }
}
