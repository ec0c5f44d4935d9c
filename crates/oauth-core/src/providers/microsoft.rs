//! Microsoft identity platform (Azure AD / Entra ID) support.
//!
//! Endpoints are templated on tenant id, defaulting to `"common"` when a
//! server config doesn't pin one (spec §4.1). The platform has no
//! self-service revoke endpoint for authorization-code grants, so `revoke`
//! always returns [`OAuthError::UnsupportedRevocation`].

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::call::CallContext;
use crate::error::{OAuthError, OAuthResult};
use crate::types::ServerConfig;

use super::{build_authorize_url, Provider, TokenResponse, UserInfo};

const GRAPH_ME_URL: &str = "https://graph.microsoft.com/v1.0/me";

fn auth_url_for(tenant: &str) -> String {
    format!("https://login.microsoftonline.com/{tenant}/oauth2/v2.0/authorize")
}

fn token_url_for(tenant: &str) -> String {
    format!("https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token")
}

/// Microsoft's v2.0 identity platform flow.
pub struct MicrosoftProvider {
    client: Client,
}

impl MicrosoftProvider {
    /// Build a provider using a fresh `reqwest::Client`.
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for MicrosoftProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct MsTokenResponse {
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
struct GraphUser {
    id: String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    mail: Option<String>,
    #[serde(rename = "userPrincipalName")]
    user_principal_name: Option<String>,
}

#[async_trait]
impl Provider for MicrosoftProvider {
    fn name(&self) -> &'static str {
        "microsoft"
    }

    fn default_scopes(&self) -> &[&'static str] {
        &["openid", "profile", "email", "offline_access", "User.Read"]
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    fn supports_revocation(&self) -> bool {
        false
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
        let tenant = config.effective_tenant_id().to_string();
        let base = config
            .auth_url
            .clone()
            .unwrap_or_else(|| auth_url_for(&tenant));
        let mut pairs = vec![
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("response_mode", "query"),
            ("scope", scopes.as_str()),
            ("state", state),
        ];
        if let Some(challenge) = code_challenge {
            pairs.push(("code_challenge", challenge));
            pairs.push(("code_challenge_method", "S256"));
        }
        build_authorize_url(&base, &pairs)
    }

    async fn exchange_code(
        &self,
        config: &ServerConfig,
        code: &str,
        code_verifier: Option<&str>,
        ctx: &CallContext,
    ) -> OAuthResult<TokenResponse> {
        ctx.check_cancelled()?;
        let tenant = config.effective_tenant_id().to_string();
        let url = config.token_url.clone().unwrap_or_else(|| token_url_for(&tenant));
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
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|source| OAuthError::ProviderTransport { provider: self.name().into(), source })?;

        parse_token_response(self.name(), &url, resp).await
    }

    async fn refresh(
        &self,
        config: &ServerConfig,
        refresh_token: &str,
        ctx: &CallContext,
    ) -> OAuthResult<TokenResponse> {
        ctx.check_cancelled()?;
        let tenant = config.effective_tenant_id().to_string();
        let url = config.token_url.clone().unwrap_or_else(|| token_url_for(&tenant));
        let secret = config
            .client_secret
            .as_ref()
            .map(|s| secrecy::ExposeSecret::expose_secret(s).to_string())
            .unwrap_or_default();
        let resp = self
            .client
            .post(&url)
            .form(&[
                ("client_id", config.client_id.as_str()),
                ("client_secret", secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|source| OAuthError::ProviderTransport { provider: self.name().into(), source })?;

        parse_token_response(self.name(), &url, resp).await
    }

    async fn revoke(
        &self,
        _config: &ServerConfig,
        _token: &str,
        _ctx: &CallContext,
    ) -> OAuthResult<()> {
        Err(OAuthError::UnsupportedRevocation(self.name().into()))
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
            .get(GRAPH_ME_URL)
            .header("Authorization", format!("Bearer {access_token}"))
            .send()
            .await
            .map_err(|source| OAuthError::ProviderTransport { provider: self.name().into(), source })?;

        if resp.status().as_u16() == 401 {
            return Err(OAuthError::Unauthorized);
        }
        if !resp.status().is_success() {
            return Err(OAuthError::ProviderStatus { code: resp.status().as_u16(), url: GRAPH_ME_URL.into(), body: None });
        }
        let user: GraphUser = resp
            .json()
            .await
            .map_err(|e| OAuthError::ProviderPayload { provider: self.name().into(), message: e.to_string() })?;

        Ok(UserInfo {
            subject: user.id,
            name: user.display_name,
            email: user.mail.or(user.user_principal_name),
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
    let body: MsTokenResponse = resp
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
