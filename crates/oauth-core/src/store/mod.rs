//! Hierarchical token store (spec §4.2 / C2).
//!
//! Three tiers are consulted in priority order — remote key vault, an
//! on-disk secrets directory, and read-only environment variables — with
//! fall-forward on write and first-hit-wins on read. Encryption at rest is
//! applied by the store itself, not by individual tiers, so every tier
//! sees the same encrypted-or-plain bytes.

pub mod encryption;
pub mod env;
pub mod keyvault;
pub mod local;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::call::CallContext;
use crate::error::{OAuthError, OAuthResult};
use crate::types::{StorageTier, TokenData};

pub use encryption::EncryptionService;

/// One backend in the hierarchy. Implementations are intentionally dumb:
/// they store and retrieve whatever bytes the [`TokenStore`] hands them,
/// encryption and tier-selection policy live one level up.
#[async_trait]
pub trait Tier: Send + Sync {
    /// Which tier this is.
    fn tier(&self) -> StorageTier;

    /// Persist `token` under `(server_name, user_id)`.
    async fn store(&self, token: &TokenData, ctx: &CallContext) -> OAuthResult<()>;

    /// Fetch a token, if present in this tier.
    async fn get(&self, server_name: &str, user_id: &str, ctx: &CallContext) -> OAuthResult<Option<TokenData>>;

    /// Delete a token from this tier.
    async fn delete(&self, server_name: &str, user_id: &str, ctx: &CallContext) -> OAuthResult<bool>;

    /// List every token this tier holds for `user_id`.
    async fn list(&self, user_id: &str, ctx: &CallContext) -> OAuthResult<Vec<TokenData>>;

    /// Whether this tier is currently reachable.
    async fn health(&self, ctx: &CallContext) -> bool;

    /// Remove every token in this tier with `expires_at < now`; return the
    /// count removed. Read-only tiers implement this as a no-op returning 0.
    async fn sweep_expired(&self, now: chrono::DateTime<chrono::Utc>, ctx: &CallContext) -> OAuthResult<u64>;
}

/// The hierarchical store facade used by the interceptor and admin surface.
pub struct TokenStore {
    tiers: Vec<Arc<dyn Tier>>,
    encryption: Option<Arc<EncryptionService>>,
    /// Guards tier-availability bookkeeping; per-key operations otherwise
    /// proceed independently (spec §4.2 concurrency note).
    availability: RwLock<()>,
}

impl TokenStore {
    /// Build a store over `tiers`, already ordered by priority
    /// (`StorageTier::PRIORITY_ORDER`). Pass `encryption` to enable
    /// at-rest encryption of `access_token`/`refresh_token`/`id_token`.
    pub fn new(tiers: Vec<Arc<dyn Tier>>, encryption: Option<Arc<EncryptionService>>) -> Self {
        Self { tiers, encryption, availability: RwLock::new(()) }
    }

    fn find(&self, tier: StorageTier) -> Option<&Arc<dyn Tier>> {
        self.tiers.iter().find(|t| t.tier() == tier)
    }

    /// Store `token`, attempting `requested_tier` first and falling forward
    /// through the remaining tiers (in priority order) on failure.
    pub async fn store(
        &self,
        mut token: TokenData,
        requested_tier: StorageTier,
        ctx: &CallContext,
    ) -> OAuthResult<TokenData> {
        let _guard = self.availability.read().await;
        if let Some(enc) = &self.encryption {
            enc.encrypt_in_place(&mut token)?;
        }

        let mut order: Vec<StorageTier> = vec![requested_tier];
        order.extend(StorageTier::PRIORITY_ORDER.iter().copied().filter(|t| *t != requested_tier));

        for tier_kind in order {
            let Some(tier) = self.find(tier_kind) else { continue };
            if !tier_kind.is_mutable() {
                continue;
            }
            match tier.store(&token, ctx).await {
                Ok(()) => {
                    token.storage_tier = tier_kind;
                    return Ok(token);
                }
                Err(err) => {
                    tracing::warn!(tier = ?tier_kind, error = %err, "tier store failed, falling forward");
                }
            }
        }
        Err(OAuthError::NoTierAvailable)
    }

    /// Fetch a token, trying tiers in priority order; first hit wins.
    pub async fn get(&self, server_name: &str, user_id: &str, ctx: &CallContext) -> OAuthResult<Option<TokenData>> {
        let _guard = self.availability.read().await;
        for tier_kind in StorageTier::PRIORITY_ORDER {
            let Some(tier) = self.find(tier_kind) else { continue };
            match tier.get(server_name, user_id, ctx).await {
                Ok(Some(mut token)) => {
                    if tier_kind == StorageTier::Env {
                        token.storage_tier = StorageTier::Env;
                    }
                    if let Some(enc) = &self.encryption {
                        enc.decrypt_in_place(&mut token)?;
                    }
                    return Ok(Some(token));
                }
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(tier = ?tier_kind, error = %err, "tier get failed, trying next");
                }
            }
        }
        Ok(None)
    }

    /// Delete from every tier; succeeds if any tier actually deleted
    /// something. A read-only tier reports [`OAuthError::ReadOnlyTier`]
    /// internally but does not fail the overall call.
    pub async fn delete(&self, server_name: &str, user_id: &str, ctx: &CallContext) -> OAuthResult<bool> {
        let _guard = self.availability.read().await;
        let mut any_deleted = false;
        for tier_kind in StorageTier::PRIORITY_ORDER {
            let Some(tier) = self.find(tier_kind) else { continue };
            if !tier_kind.is_mutable() {
                continue;
            }
            match tier.delete(server_name, user_id, ctx).await {
                Ok(true) => any_deleted = true,
                Ok(false) => {}
                Err(err) => tracing::warn!(tier = ?tier_kind, error = %err, "tier delete failed"),
            }
        }
        Ok(any_deleted)
    }

    /// Union tokens across all tiers for `user_id`; higher-priority tiers
    /// mask lower-priority entries on `server_name` collision.
    pub async fn list(&self, user_id: &str, ctx: &CallContext) -> OAuthResult<Vec<TokenData>> {
        let _guard = self.availability.read().await;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for tier_kind in StorageTier::PRIORITY_ORDER {
            let Some(tier) = self.find(tier_kind) else { continue };
            let tokens = tier.list(user_id, ctx).await.unwrap_or_default();
            for mut token in tokens {
                if seen.insert(token.server_name.clone()) {
                    if let Some(enc) = &self.encryption {
                        let _ = enc.decrypt_in_place(&mut token);
                    }
                    out.push(token);
                }
            }
        }
        Ok(out)
    }

    /// Remove any token with `expires_at < now` from every mutable tier;
    /// returns the total number removed.
    pub async fn cleanup_expired(&self, now: chrono::DateTime<chrono::Utc>, ctx: &CallContext) -> OAuthResult<u64> {
        let _guard = self.availability.write().await;
        let mut removed = 0u64;
        for tier_kind in StorageTier::PRIORITY_ORDER {
            if !tier_kind.is_mutable() {
                continue;
            }
            let Some(tier) = self.find(tier_kind) else { continue };
            removed += tier.sweep_expired(now, ctx).await.unwrap_or(0);
        }
        Ok(removed)
    }

    /// Copy a token from one tier to another, then delete the original.
    /// Best-effort: if the delete fails the copy still stands.
    pub async fn migrate(
        &self,
        server_name: &str,
        user_id: &str,
        from: StorageTier,
        to: StorageTier,
        ctx: &CallContext,
    ) -> OAuthResult<()> {
        let Some(from_tier) = self.find(from) else { return Err(OAuthError::NoTierAvailable) };
        let Some(token) = from_tier.get(server_name, user_id, ctx).await? else {
            return Err(OAuthError::ConfigNotFound(format!("{server_name}/{user_id}")));
        };
        let Some(to_tier) = self.find(to) else { return Err(OAuthError::NoTierAvailable) };
        to_tier.store(&token, ctx).await?;
        if from.is_mutable() {
            let _ = from_tier.delete(server_name, user_id, ctx).await;
        }
        Ok(())
    }

    /// Healthy iff at least one configured tier reports healthy.
    pub async fn health(&self, ctx: &CallContext) -> bool {
        for tier in &self.tiers {
            if tier.health(ctx).await {
                return true;
            }
        }
        false
    }
}
