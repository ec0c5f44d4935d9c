//! Core data types shared across providers, storage, the interceptor, and
//! the server-config registry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Which OAuth provider a server config talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// GitHub OAuth apps (non-expiring tokens, no refresh).
    Github,
    /// Google OAuth2 / OIDC.
    Google,
    /// Microsoft identity platform (Azure AD / Entra ID).
    Microsoft,
    /// Any other provider registered at runtime.
    Custom,
}

impl ProviderType {
    /// The registry key used to look this provider up.
    pub fn key(self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Google => "google",
            Self::Microsoft => "microsoft",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Which tier a token is currently (or was last) persisted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageTier {
    /// Remote secret manager (Tier 1).
    KeyVault,
    /// Filesystem under the user's secrets directory (Tier 2).
    LocalSecretsDir,
    /// Environment variables, read-only (Tier 3).
    Env,
}

impl StorageTier {
    /// Tiers in descending priority order, as consulted by the store.
    pub const PRIORITY_ORDER: [StorageTier; 3] =
        [StorageTier::KeyVault, StorageTier::LocalSecretsDir, StorageTier::Env];

    /// Whether this tier accepts writes/deletes.
    pub fn is_mutable(self) -> bool {
        !matches!(self, StorageTier::Env)
    }
}

/// Configuration for a single upstream server's OAuth integration.
///
/// See spec §3: `server_name` is the registry key, `provider_type` must be
/// registered in the provider registry, and `redirect_uri` must be HTTPS
/// unless the host is `localhost`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique server identifier; the registry's map key.
    pub server_name: String,
    /// Which provider implementation handles this server's OAuth flows.
    pub provider_type: ProviderType,
    /// Tenant identifier, used by Microsoft (defaults to "common").
    pub tenant_id: Option<String>,
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret, held behind `SecretString` so it never prints.
    #[serde(
        serialize_with = "serialize_optional_secret",
        deserialize_with = "deserialize_optional_secret",
        default
    )]
    pub client_secret: Option<SecretString>,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Redirect URI registered with the provider.
    pub redirect_uri: String,
    /// Override for the provider's authorize endpoint.
    pub auth_url: Option<String>,
    /// Override for the provider's token endpoint.
    pub token_url: Option<String>,
    /// Override for the provider's JWKS endpoint.
    pub jwks_url: Option<String>,
    /// Free-form provider-specific extras.
    #[serde(default)]
    pub extra: HashMap<String, String>,
    /// Creation timestamp, preserved across updates.
    pub created_at: DateTime<Utc>,
    /// Bumped on every successful update.
    pub updated_at: DateTime<Utc>,
    /// Whether this config is usable by the interceptor.
    pub is_active: bool,
}

fn serialize_optional_secret<S>(
    value: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}

fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(SecretString::from))
}

impl ServerConfig {
    /// True if `redirect_uri` satisfies the HTTPS-unless-localhost invariant.
    ///
    /// `https` is always allowed; `http` only for a loopback/bind-all host
    /// (`localhost`, `127.0.0.1`, `0.0.0.0`, any port); and a handful of
    /// custom URI schemes used by native app redirect targets (`msauth`,
    /// `com.example.app`-style reverse-DNS schemes, or anything starting
    /// with `app.` / ending in `.app`). Fragments are rejected outright —
    /// OAuth redirect URIs never carry one — and any `..` path segment that
    /// survives `url::Url`'s own normalization is rejected as traversal.
    pub fn has_valid_redirect_scheme(&self) -> bool {
        let Ok(parsed) = url::Url::parse(&self.redirect_uri) else {
            return false;
        };

        if parsed.fragment().is_some() {
            return false;
        }
        if parsed.path_segments().is_some_and(|mut segs| segs.any(|s| s == "..")) {
            return false;
        }

        match parsed.scheme() {
            "https" => true,
            "http" => parsed.host_str().is_some_and(is_loopback_host),
            "com.example.app" | "msauth" => true,
            scheme => scheme.starts_with("app.") || scheme.ends_with(".app"),
        }
    }

    /// Tenant id to substitute into provider endpoint templates.
    pub fn effective_tenant_id(&self) -> &str {
        self.tenant_id.as_deref().unwrap_or("common")
    }
}

/// A persisted OAuth token for a single `(server_name, user_id)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenData {
    /// Server this token authorizes calls to.
    pub server_name: String,
    /// Opaque user identifier the token belongs to.
    pub user_id: String,
    /// Provider that issued the token.
    pub provider_type: ProviderType,
    /// Tenant id, if the provider is tenant-scoped.
    pub tenant_id: Option<String>,
    /// Bearer (or provider-specific) access token.
    pub access_token: String,
    /// Refresh token, if the provider issues one.
    pub refresh_token: Option<String>,
    /// OIDC id_token, if present.
    pub id_token: Option<String>,
    /// Token type to send in the `Authorization` header (default `"Bearer"`).
    pub token_type: String,
    /// When the access token was issued.
    pub issued_at: DateTime<Utc>,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
    /// When the token should be proactively refreshed (`expires_at - skew`).
    pub refresh_at: DateTime<Utc>,
    /// Last time this token was used to authorize a request.
    pub last_used: Option<DateTime<Utc>>,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Tier this token is currently stored in.
    pub storage_tier: StorageTier,
    /// Monotonically increasing use counter.
    pub usage_count: u64,
}

impl TokenData {
    /// Key used by the store and the refresh-coalescing table.
    pub fn key(&self) -> TokenKey {
        TokenKey {
            server_name: self.server_name.clone(),
            user_id: self.user_id.clone(),
        }
    }

    /// Staleness per spec §4.3: expired, past refresh time, or inside the
    /// skew window.
    pub fn is_stale(&self, now: DateTime<Utc>, refresh_threshold: chrono::Duration) -> bool {
        now >= self.expires_at || now >= self.refresh_at || (self.expires_at - now) < refresh_threshold
    }

    /// Record a use: bump `usage_count` and stamp `last_used`.
    pub fn mark_used(&mut self, now: DateTime<Utc>) {
        self.last_used = Some(now);
        self.usage_count += 1;
    }
}

/// Composite key identifying a token: `(server_name, user_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenKey {
    /// Server identifier.
    pub server_name: String,
    /// User identifier.
    pub user_id: String,
}

impl TokenKey {
    /// Construct a key.
    pub fn new(server_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            user_id: user_id.into(),
        }
    }

    /// Canonical env-var name for this key (`OAUTH_TOKEN_<SERVER>_<USER>`),
    /// per spec §6's fixed canonical form.
    pub fn env_var_name(&self) -> String {
        format!(
            "OAUTH_TOKEN_{}_{}",
            to_upper_snake(&self.server_name),
            to_upper_snake(&self.user_id)
        )
    }

    /// Filename for the local-secrets-dir tier (`<server>-<user>.json`).
    pub fn file_name(&self) -> String {
        format!("{}-{}.json", self.server_name, self.user_id)
    }
}

/// Whether `host` (without its port) refers to this machine.
fn is_loopback_host(host: &str) -> bool {
    host == "localhost" || host == "127.0.0.1" || host == "0.0.0.0" || host == "::1"
}

fn to_upper_snake(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_uri_localhost_allowed() {
        let mut cfg = sample_config();
        cfg.redirect_uri = "http://localhost:8080/callback".into();
        assert!(cfg.has_valid_redirect_scheme());
    }

    #[test]
    fn redirect_uri_http_remote_rejected() {
        let mut cfg = sample_config();
        cfg.redirect_uri = "http://example.com/callback".into();
        assert!(!cfg.has_valid_redirect_scheme());
    }

    #[test]
    fn redirect_uri_bind_all_interface_allowed() {
        let mut cfg = sample_config();
        cfg.redirect_uri = "http://0.0.0.0:9000/callback".into();
        assert!(cfg.has_valid_redirect_scheme());
    }

    #[test]
    fn redirect_uri_custom_app_scheme_allowed() {
        let mut cfg = sample_config();
        cfg.redirect_uri = "msauth://com.example.app/callback".into();
        assert!(cfg.has_valid_redirect_scheme());

        cfg.redirect_uri = "app.example://callback".into();
        assert!(cfg.has_valid_redirect_scheme());
    }

    #[test]
    fn redirect_uri_unsupported_scheme_rejected() {
        let mut cfg = sample_config();
        cfg.redirect_uri = "ftp://example.com/callback".into();
        assert!(!cfg.has_valid_redirect_scheme());
    }

    #[test]
    fn redirect_uri_fragment_rejected() {
        let mut cfg = sample_config();
        cfg.redirect_uri = "https://example.com/callback#token".into();
        assert!(!cfg.has_valid_redirect_scheme());
    }

    #[test]
    fn redirect_uri_with_normalized_traversal_segment_allowed() {
        // `url::Url::parse` removes `..` segments during normalization, so this
        // resolves to `https://example.com/admin` with nothing left to reject.
        let mut cfg = sample_config();
        cfg.redirect_uri = "https://example.com/callback/../admin".into();
        assert!(cfg.has_valid_redirect_scheme());
    }

    #[test]
    fn env_var_name_is_canonical() {
        let key = TokenKey::new("svc-a", "user 1");
        assert_eq!(key.env_var_name(), "OAUTH_TOKEN_SVC_A_USER_1");
    }

    fn sample_config() -> ServerConfig {
        let now = Utc::now();
        ServerConfig {
            server_name: "svc-a".into(),
            provider_type: ProviderType::Github,
            tenant_id: None,
            client_id: "client".into(),
            client_secret: None,
            scopes: vec![],
            redirect_uri: "https://example.com/callback".into(),
            auth_url: None,
            token_url: None,
            jwks_url: None,
            extra: HashMap::new(),
            created_at: now,
            updated_at: now,
            is_active: true,
        }
    }
}
