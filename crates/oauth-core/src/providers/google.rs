//! Google OAuth2 / OIDC support.
//!
//! Requests `access_type=offline` so Google issues a refresh token on first
//! consent, and revokes via the dedicated `/revoke` endpoint rather than
//! DELETE-ing the token resource (spec §4.1, provider quirks table).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::call::CallContext;
use crate::error::{OAuthError, OAuthResult};
use crate::types::ServerConfig;

use super::{build_authorize_url, Provider, TokenResponse, UserInfo};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Google's OAuth2/OIDC flow.
pub struct GoogleProvider {
    client: Client,
}

impl GoogleProvider {
    /// Build a provider using a fresh `reqwest::Client`.
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for GoogleProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    name: Option<String>,
    email: Option<String>,
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    fn default_scopes(&self) -> &[&'static str] {
        &["openid", "email", "profile"]
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    fn supports_revocation(&self) -> bool {
        true
    }

    fn auth_url(
        &self,
        config: &ServerConfig,
        state: &str,
        code_challenge: Option<&str>,
    ) -> OAuthResult<String> {
        let scopes = if config.scopes.is_empty() {
            self.default_scopes().join(" ")
        } else {
            config.scopes.join(" ")
        };
        let mut pairs = vec![
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", scopes.as_str()),
            ("state", state),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ];
        if let Some(challenge) = code_challenge {
            pairs.push(("code_challenge", challenge));
            pairs.push(("code_challenge_method", "S256"));
        }
        build_authorize_url(config.auth_url.as_deref().unwrap_or(AUTH_URL), &pairs)
    }

    async fn exchange_code(
        &self,
        config: &ServerConfig,
        code: &str,
        code_verifier: Option<&str>,
        ctx: &CallContext,
    ) -> OAuthResult<TokenResponse> {
        ctx.check_cancelled()?;
        let url = config.token_url.as_deref().unwrap_or(TOKEN_URL);
        let secret = config
            .client_secret
            .as_ref()
            .map(|s| secrecy::ExposeSecret::expose_secret(s).to_string())
            .unwrap_or_default();
        let mut form = vec![
            ("client_id", config.client_id.as_str()),
            ("client_secret", secret.as_str()),
            ("code", code),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }
        let resp = self
            .client
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(|source| OAuthError::ProviderTransport { provider: self.name().into(), source })?;

        parse_token_response(self.name(), url, resp).await
    }

    async fn refresh(
        &self,
        config: &ServerConfig,
        refresh_token: &str,
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
            .form(&[
                ("client_id", config.client_id.as_str()),
                ("client_secret", secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|source| OAuthError::ProviderTransport { provider: self.name().into(), source })?;

        parse_token_response(self.name(), url, resp).await
    }

    async fn revoke(
        &self,
        _config: &ServerConfig,
        token: &str,
        ctx: &CallContext,
    ) -> OAuthResult<()> {
        ctx.check_cancelled()?;
        let resp = self
            .client
            .post(REVOKE_URL)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|source| OAuthError::ProviderTransport { provider: self.name().into(), source })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(OAuthError::ProviderStatus { code: resp.status().as_u16(), url: REVOKE_URL.into(), body: None })
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
            .get(USERINFO_URL)
            .header("Authorization", format!("Bearer {access_token}"))
            .send()
            .await
            .map_err(|source| OAuthError::ProviderTransport { provider: self.name().into(), source })?;

        if resp.status().as_u16() == 401 {
            return Err(OAuthError::Unauthorized);
        }
        if !resp.status().is_success() {
            return Err(OAuthError::ProviderStatus { code: resp.status().as_u16(), url: USERINFO_URL.into(), body: None });
        }
        let info: GoogleUserInfo = resp
            .json()
            .await
            .map_err(|e| OAuthError::ProviderPayload { provider: self.name().into(), message: e.to_string() })?;

        Ok(UserInfo {
            subject: info.sub,
            name: info.name,
            email: info.email,
            raw: serde_json::json!({}),
        })
    }
}

async fn parse_token_response(
    provider: &str,
    url: &str,
    resp: reqwest::Response,
) -> OAuthResult<TokenResponse> {
    let status = resp.status();
    let body: GoogleTokenResponse = resp
        .json()
        .await
        .map_err(|e| OAuthError::ProviderPayload { provider: provider.into(), message: e.to_string() })?;

    if let Some(err) = body.error {
        return Err(OAuthError::ProviderPayload {
            provider: provider.into(),
            message: body.error_description.unwrap_or(err),
        });
    }
    if !status.is_success() {
        return Err(OAuthError::ProviderStatus { code: status.as_u16(), url: url.into(), body: None });
    }

    Ok(TokenResponse {
        access_token: body.access_token,
        refresh_token: body.refresh_token,
        id_token: body.id_token,
        token_type: body.token_type.unwrap_or_else(|| "Bearer".into()),
        expires_in: body.expires_in,
        scopes: body
            .scope
            .map(|s| s.split(' ').map(str::to_string).collect())
            .unwrap_or_default(),
    })
}
