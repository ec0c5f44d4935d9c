//! Provider abstraction and registry (spec §4.1 / C1).
//!
//! Each provider owns the HTTP specifics of one OAuth implementation
//! (endpoint URLs, request shapes, quirky status codes) behind a common
//! trait so the interceptor never branches on `ProviderType` itself.

pub mod github;
pub mod google;
pub mod microsoft;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::call::CallContext;
use crate::error::OAuthResult;
use crate::types::ServerConfig;

/// Tokens and metadata returned by a successful code exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Bearer access token.
    pub access_token: String,
    /// Refresh token, if the provider issued one.
    pub refresh_token: Option<String>,
    /// OIDC id_token, if present.
    pub id_token: Option<String>,
    /// Token type, usually `"Bearer"`.
    pub token_type: String,
    /// Seconds until expiry, if the provider reported one.
    pub expires_in: Option<i64>,
    /// Scopes actually granted (may narrow the request).
    pub scopes: Vec<String>,
}

/// Normalized userinfo/profile claims, provider-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    /// Stable subject/account identifier.
    pub subject: String,
    /// Display name, if available.
    pub name: Option<String>,
    /// Email address, if available.
    pub email: Option<String>,
    /// Raw claims, for anything callers need beyond the normalized fields.
    pub raw: serde_json::Value,
}

/// One OAuth provider's HTTP integration.
///
/// Implementors own endpoint construction, request encoding, and response
/// parsing; the interceptor and token store only ever see the normalized
/// types above.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry key, e.g. `"github"`.
    fn name(&self) -> &'static str;

    /// Scopes requested when a server config doesn't specify its own.
    fn default_scopes(&self) -> &[&'static str];

    /// Whether `refresh` is implemented for this provider.
    fn supports_refresh(&self) -> bool;

    /// Whether `revoke` is implemented for this provider.
    fn supports_revocation(&self) -> bool;

    /// Derive `(expires_at, refresh_at)` from `now` and a provider-reported
    /// `expires_in` (seconds). The default assumes a 1 hour expiry and a 5
    /// minute refresh skew when `expires_in` is absent; providers whose
    /// tokens don't expire at all (GitHub) override this with a longer
    /// window instead of being treated as stale every hour.
    fn default_expiry(&self, now: DateTime<Utc>, expires_in: Option<i64>) -> (DateTime<Utc>, DateTime<Utc>) {
        let expires_at =
            expires_in.map(|secs| now + chrono::Duration::seconds(secs)).unwrap_or_else(|| now + chrono::Duration::hours(1));
        (expires_at, expires_at - chrono::Duration::minutes(5))
    }

    /// Build the authorize-redirect URL for a login flow.
    fn auth_url(
        &self,
        config: &ServerConfig,
        state: &str,
        code_challenge: Option<&str>,
    ) -> OAuthResult<String>;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(
        &self,
        config: &ServerConfig,
        code: &str,
        code_verifier: Option<&str>,
        ctx: &CallContext,
    ) -> OAuthResult<TokenResponse>;

    /// Exchange a refresh token for a new access token.
    async fn refresh(
        &self,
        config: &ServerConfig,
        refresh_token: &str,
        ctx: &CallContext,
    ) -> OAuthResult<TokenResponse>;

    /// Revoke a token at the provider.
    async fn revoke(
        &self,
        config: &ServerConfig,
        token: &str,
        ctx: &CallContext,
    ) -> OAuthResult<()>;

    /// Validate a token, returning normalized userinfo on success.
    async fn validate(
        &self,
        config: &ServerConfig,
        access_token: &str,
        ctx: &CallContext,
    ) -> OAuthResult<UserInfo>;
}

/// Marker trait for providers that support RFC 7591 dynamic client
/// registration. Implemented separately from [`Provider`] since most
/// providers in this registry pre-register clients out of band.
#[async_trait]
pub trait DynamicClientRegistration: Provider {
    /// Register a new OAuth client and return its issued client id/secret.
    async fn register_dynamic_client(
        &self,
        registration_endpoint: &str,
        redirect_uris: &[String],
        ctx: &CallContext,
    ) -> OAuthResult<(String, Option<SecretString>)>;
}

/// Lookup table of provider implementations keyed by [`ProviderType::key`].
///
/// [`ProviderType::key`]: crate::types::ProviderType::key
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn Provider>>,
    dcr: HashMap<&'static str, Arc<dyn DynamicClientRegistration>>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in registry with GitHub, Google, and Microsoft registered.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(github::GithubProvider::new()));
        reg.register(Arc::new(google::GoogleProvider::new()));
        reg.register(Arc::new(microsoft::MicrosoftProvider::new()));
        reg
    }

    /// Register a provider under its own [`Provider::name`].
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name(), provider);
    }

    /// Additionally register a provider's DCR capability under the same key.
    pub fn register_dcr(&mut self, provider: Arc<dyn DynamicClientRegistration>) {
        self.dcr.insert(provider.name(), Arc::clone(&provider) as Arc<dyn DynamicClientRegistration>);
        self.providers.insert(provider.name(), provider as Arc<dyn Provider>);
    }

    /// Look up a provider by key (e.g. `"github"`).
    pub fn get(&self, key: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(key).cloned()
    }

    /// List all registered provider keys.
    pub fn list(&self) -> Vec<&'static str> {
        self.providers.keys().copied().collect()
    }

    /// Whether `key` supports dynamic client registration.
    pub fn supports_dcr(&self, key: &str) -> bool {
        self.dcr.contains_key(key)
    }

    /// Look up a provider's DCR capability, if registered.
    pub fn get_dcr(&self, key: &str) -> Option<Arc<dyn DynamicClientRegistration>> {
        self.dcr.get(key).cloned()
    }
}

/// Shared helper: append query parameters to an endpoint, building an
/// authorize URL the way all three built-in providers do.
pub(crate) fn build_authorize_url(
    base: &str,
    pairs: &[(&str, &str)],
) -> OAuthResult<String> {
    let mut url = url::Url::parse(base)
        .map_err(|e| crate::error::OAuthError::ProviderPayload {
            provider: "unknown".into(),
            message: format!("invalid auth_url {base}: {e}"),
        })?;
    {
        let mut qp = url.query_pairs_mut();
        for (k, v) in pairs {
            qp.append_pair(k, v);
        }
    }
    Ok(url.into())
}
