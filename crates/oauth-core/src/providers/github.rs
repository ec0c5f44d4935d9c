//! GitHub OAuth app support.
//!
//! GitHub's user-to-server tokens do not expire and the platform has no
//! refresh endpoint, so `refresh` is unimplemented and callers that rely on
//! proactive refresh should expect `TokenData::refresh_at` to sit far in the
//! future (spec §4.1, provider quirks table).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::call::CallContext;
use crate::error::{OAuthError, OAuthResult};
use crate::types::ServerConfig;

use super::{build_authorize_url, Provider, TokenResponse, UserInfo};

const AUTH_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_URL: &str = "https://api.github.com/user";

/// GitHub's OAuth app flow.
pub struct GithubProvider {
    client: Client,
}

impl GithubProvider {
    /// Build a provider using a fresh `reqwest::Client`.
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for GithubProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct GithubTokenResponse {
    access_token: String,
    token_type: Option<String>,
    scope: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: u64,
    login: String,
    name: Option<String>,
    email: Option<String>,
}

#[async_trait]
impl Provider for GithubProvider {
    fn name(&self) -> &'static str {
        "github"
    }

    fn default_scopes(&self) -> &[&'static str] {
        &["read:user"]
    }

    fn supports_refresh(&self) -> bool {
        false
    }

    fn supports_revocation(&self) -> bool {
        true
    }

    fn default_expiry(&self, now: DateTime<Utc>, expires_in: Option<i64>) -> (DateTime<Utc>, DateTime<Utc>) {
        if let Some(secs) = expires_in {
            let expires_at = now + chrono::Duration::seconds(secs);
            return (expires_at, expires_at - chrono::Duration::minutes(5));
        }
        (now + chrono::Duration::days(365), now + chrono::Duration::days(30))
    }

    fn auth_url(
        &self,
        config: &ServerConfig,
        state: &str,
        _code_challenge: Option<&str>,
    ) -> OAuthResult<String> {
        let scopes = if config.scopes.is_empty() {
            self.default_scopes().join(" ")
        } else {
            config.scopes.join(" ")
        };
        build_authorize_url(
            config.auth_url.as_deref().unwrap_or(AUTH_URL),
            &[
                ("client_id", &config.client_id),
                ("redirect_uri", &config.redirect_uri),
                ("scope", &scopes),
                ("state", state),
            ],
        )
    }

    async fn exchange_code(
        &self,
        config: &ServerConfig,
        code: &str,
        _code_verifier: Option<&str>,
        ctx: &CallContext,
    ) -> OAuthResult<TokenResponse> {
        ctx.check_cancelled()?;
        let url = config.token_url.as_deref().unwrap_or(TOKEN_URL);
        let secret = config
            .client_secret
            .as_ref()
            .map(|s| secrecy::ExposeSecret::expose_secret(s).to_string())
            .unwrap_or_default();
        let resp = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", config.client_id.as_str()),
                ("client_secret", secret.as_str()),
                ("code", code),
                ("redirect_uri", config.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|source| OAuthError::ProviderTransport { provider: self.name().into(), source })?;

        let status = resp.status();
        let body: GithubTokenResponse = resp
            .json()
            .await
            .map_err(|e| OAuthError::ProviderPayload { provider: self.name().into(), message: e.to_string() })?;

        if let Some(err) = body.error {
            return Err(OAuthError::ProviderPayload {
                provider: self.name().into(),
                message: body.error_description.unwrap_or(err),
            });
        }
        if !status.is_success() {
            return Err(OAuthError::ProviderStatus { code: status.as_u16(), url: url.into(), body: None });
        }

        Ok(TokenResponse {
            access_token: body.access_token,
            refresh_token: None,
            id_token: None,
            token_type: body.token_type.unwrap_or_else(|| "Bearer".into()),
            // GitHub tokens are non-expiring; `default_expiry` below turns
            // the absent `expires_in` into a 1 year/30 day window instead
            // of the 1 hour default (spec §4.1).
            expires_in: None,
            scopes: body
                .scope
                .map(|s| s.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }

    async fn refresh(
        &self,
        _config: &ServerConfig,
        _refresh_token: &str,
        _ctx: &CallContext,
    ) -> OAuthResult<TokenResponse> {
        Err(OAuthError::UnsupportedRefresh(self.name().into()))
    }

    async fn revoke(
        &self,
        config: &ServerConfig,
        token: &str,
        ctx: &CallContext,
    ) -> OAuthResult<()> {
        ctx.check_cancelled()?;
        let url = format!("https://api.github.com/applications/{}/token", config.client_id);
        let secret = config
            .client_secret
            .as_ref()
            .map(|s| secrecy::ExposeSecret::expose_secret(s).to_string())
            .unwrap_or_default();
        let resp = self
            .client
            .delete(&url)
            .basic_auth(&config.client_id, Some(secret))
            .json(&serde_json::json!({ "access_token": token }))
            .send()
            .await
            .map_err(|source| OAuthError::ProviderTransport { provider: self.name().into(), source })?;

        if resp.status().is_success() || resp.status().as_u16() == 404 {
            Ok(())
        } else {
            Err(OAuthError::ProviderStatus { code: resp.status().as_u16(), url, body: None })
        }
    }

    async fn validate(
        &self,
        _config: &ServerConfig,
        access_token: &str,
        ctx: &CallContext,
    ) -> OAuthResult<UserInfo> {
        ctx.check_cancelled()?;
        let resp = self
            .client
            .get(USER_URL)
            .header("Authorization", format!("Bearer {access_token}"))
            .header("User-Agent", "oauth-core")
            .send()
            .await
            .map_err(|source| OAuthError::ProviderTransport { provider: self.name().into(), source })?;

        if resp.status().as_u16() == 401 {
            return Err(OAuthError::Unauthorized);
        }
        if !resp.status().is_success() {
            return Err(OAuthError::ProviderStatus { code: resp.status().as_u16(), url: USER_URL.into(), body: None });
        }
        let user: GithubUser = resp
            .json()
            .await
            .map_err(|e| OAuthError::ProviderPayload { provider: self.name().into(), message: e.to_string() })?;

        Ok(UserInfo {
            subject: user.id.to_string(),
            name: user.name.or(Some(user.login)),
            email: user.email,
            raw: serde_json::json!({}),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_expires_in_gets_a_year_long_window() {
        let provider = GithubProvider::new();
        let now = Utc::now();
        let (expires_at, refresh_at) = provider.default_expiry(now, None);
        assert_eq!(expires_at, now + chrono::Duration::days(365));
        assert_eq!(refresh_at, now + chrono::Duration::days(30));
    }

    #[test]
    fn present_expires_in_uses_the_standard_skew() {
        let provider = GithubProvider::new();
        let now = Utc::now();
        let (expires_at, refresh_at) = provider.default_expiry(now, Some(3600));
        assert_eq!(expires_at, now + chrono::Duration::seconds(3600));
        assert_eq!(refresh_at, expires_at - chrono::Duration::minutes(5));
    }
}
