//! Command implementations for the OAuth administrative surface (spec §6).
//!
//! Each invocation is a fresh process: registered server configs persist in
//! a small JSON file (the `--config` path) that is loaded into a
//! [`ServerConfigRegistry`] on startup and rewritten after any mutation.
//! Tokens persist independently through the usual tiered [`TokenStore`].

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use oauth_core::store::env::EnvTier;
use oauth_core::store::local::LocalSecretsDir;
use oauth_core::store::Tier;
use oauth_core::types::{ServerConfig, StorageTier, TokenData};
use oauth_core::{CallContext, OAuthError, ProviderRegistry, ServerConfigRegistry, TokenStore};

use crate::cli::RegisterArgs;
use crate::error::{CliError, CliResult};

fn default_config_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".config/oauth-portal/servers.json"))
        .unwrap_or_else(|| PathBuf::from("servers.json"))
}

fn default_secrets_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".config/oauth-portal/secrets"))
        .unwrap_or_else(|| PathBuf::from(".oauth-secrets"))
}

/// Everything a single CLI invocation needs, assembled from the config
/// store plus the built-in provider registry and tiered token store.
pub struct App {
    config_path: PathBuf,
    pub providers: Arc<ProviderRegistry>,
    pub servers: Arc<ServerConfigRegistry>,
    pub store: Arc<TokenStore>,
    pub ctx: CallContext,
}

impl App {
    /// Load the server-config store at `config_path` (or the default
    /// `~/.config/oauth-portal/servers.json`) and assemble collaborators.
    pub async fn load(config_path: Option<String>) -> CliResult<Self> {
        let config_path = config_path.map(PathBuf::from).unwrap_or_else(default_config_path);
        let providers = Arc::new(ProviderRegistry::with_defaults());
        let servers = Arc::new(ServerConfigRegistry::new());

        if config_path.exists() {
            let bytes = std::fs::read(&config_path)?;
            let saved: Vec<ServerConfig> = serde_json::from_slice(&bytes)?;
            for config in saved {
                servers.insert_trusted(config).await;
            }
        }

        let local_tier: Arc<dyn Tier> = Arc::new(LocalSecretsDir::new(default_secrets_dir()));
        let env_tier: Arc<dyn Tier> = Arc::new(EnvTier::new());
        let store = Arc::new(TokenStore::new(vec![local_tier, env_tier], None));

        Ok(Self {
            config_path,
            providers,
            servers,
            store,
            ctx: CallContext::new(uuid::Uuid::new_v4().to_string()),
        })
    }

    async fn persist(&self) -> CliResult<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let configs = self.servers.list().await;
        let bytes = serde_json::to_vec_pretty(&configs)?;
        std::fs::write(&self.config_path, bytes)?;
        Ok(())
    }

    async fn require_config(&self, server: &str) -> CliResult<ServerConfig> {
        self.servers.get(server).await.map_err(|err| match err {
            OAuthError::ConfigNotFound(name) => CliError::UnknownServer(name),
            other => CliError::Core(other),
        })
    }

    fn require_provider(&self, config: &ServerConfig) -> CliResult<Arc<dyn oauth_core::Provider>> {
        self.providers
            .get(config.provider_type.key())
            .ok_or_else(|| CliError::Core(OAuthError::ProviderNotRegistered(config.provider_type.key().into())))
    }
}

fn register_args_to_config(args: RegisterArgs) -> ServerConfig {
    let now = Utc::now();
    ServerConfig {
        server_name: args.server,
        provider_type: args.provider.into(),
        tenant_id: args.tenant_id,
        client_id: args.client_id,
        client_secret: args.client_secret.map(secrecy::SecretString::from),
        scopes: args.scopes,
        redirect_uri: args.redirect_uri,
        auth_url: args.auth_url,
        token_url: args.token_url,
        jwks_url: None,
        extra: std::collections::HashMap::new(),
        created_at: now,
        updated_at: now,
        is_active: true,
    }
}

/// `oauth.register`
pub async fn register(app: &App, args: RegisterArgs) -> CliResult<ServerConfig> {
    let config = register_args_to_config(args);
    app.servers.register(config.clone(), &app.providers).await?;
    app.persist().await?;
    app.servers.get(&config.server_name).await.map_err(CliError::from)
}

/// `oauth.update`
pub async fn update(app: &App, args: RegisterArgs) -> CliResult<ServerConfig> {
    let config = register_args_to_config(args);
    app.servers.update(config.clone(), &app.providers).await?;
    app.persist().await?;
    app.servers.get(&config.server_name).await.map_err(CliError::from)
}

/// `oauth.remove`
pub async fn remove(app: &App, server: &str) -> CliResult<()> {
    app.servers.remove(server).await.map_err(|err| match err {
        OAuthError::ConfigNotFound(name) => CliError::UnknownServer(name),
        other => CliError::Core(other),
    })?;
    app.persist().await
}

/// `oauth.list`
pub async fn list(app: &App) -> Vec<ServerConfig> {
    app.servers.list().await
}

/// `oauth.status`
pub async fn status(app: &App, server: Option<&str>) -> CliResult<serde_json::Value> {
    let store_healthy = app.store.health(&app.ctx).await;
    let providers = app.providers.list();
    let mut report = serde_json::json!({
        "store_healthy": store_healthy,
        "providers": providers,
    });
    if let Some(server) = server {
        let config = app.require_config(server).await?;
        report["server"] = serde_json::json!({
            "server_name": config.server_name,
            "provider_type": config.provider_type.to_string(),
            "is_active": config.is_active,
        });
    }
    Ok(report)
}

/// `oauth.authorize`
pub async fn authorize(app: &App, server: &str, state: Option<String>) -> CliResult<String> {
    let config = app.require_config(server).await?;
    let provider = app.require_provider(&config)?;
    let state = state.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    provider.auth_url(&config, &state, None).map_err(CliError::from)
}

/// `oauth.token`
pub async fn token(app: &App, server: &str, user: &str, code: &str, code_verifier: Option<&str>) -> CliResult<TokenData> {
    let config = app.require_config(server).await?;
    let provider = app.require_provider(&config)?;
    let response = provider.exchange_code(&config, code, code_verifier, &app.ctx).await?;
    let now = Utc::now();
    let (expires_at, refresh_at) = provider.default_expiry(now, response.expires_in);
    let token = TokenData {
        server_name: server.to_string(),
        user_id: user.to_string(),
        provider_type: config.provider_type,
        tenant_id: config.tenant_id.clone(),
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        id_token: response.id_token,
        token_type: response.token_type,
        issued_at: now,
        expires_at,
        refresh_at,
        last_used: None,
        scopes: response.scopes,
        storage_tier: StorageTier::LocalSecretsDir,
        usage_count: 0,
    };
    app.store.store(token, StorageTier::LocalSecretsDir, &app.ctx).await.map_err(CliError::from)
}

/// `oauth.refresh`
pub async fn refresh(app: &App, server: &str, user: &str) -> CliResult<TokenData> {
    let config = app.require_config(server).await?;
    let provider = app.require_provider(&config)?;
    let current = app
        .store
        .get(server, user, &app.ctx)
        .await?
        .ok_or_else(|| CliError::Core(OAuthError::ConfigNotFound(format!("no token for {server}/{user}"))))?;
    let refresh_token = current
        .refresh_token
        .clone()
        .ok_or_else(|| CliError::InvalidArguments("stored token has no refresh_token".into()))?;

    let response = provider.refresh(&config, &refresh_token, &app.ctx).await?;
    let now = Utc::now();
    let (expires_at, refresh_at) = provider.default_expiry(now, response.expires_in);
    let token = TokenData {
        access_token: response.access_token,
        refresh_token: response.refresh_token.or(Some(refresh_token)),
        id_token: response.id_token,
        token_type: response.token_type,
        issued_at: now,
        expires_at,
        refresh_at,
        scopes: response.scopes,
        ..current
    };
    app.store.store(token, StorageTier::LocalSecretsDir, &app.ctx).await.map_err(CliError::from)
}

/// `oauth.revoke`
pub async fn revoke(app: &App, server: &str, user: &str) -> CliResult<()> {
    let config = app.require_config(server).await?;
    let provider = app.require_provider(&config)?;
    if let Some(current) = app.store.get(server, user, &app.ctx).await? {
        if provider.supports_revocation() {
            provider.revoke(&config, &current.access_token, &app.ctx).await?;
        }
    }
    app.store.delete(server, user, &app.ctx).await?;
    Ok(())
}

/// `server.oauth.request`
pub async fn proxy_request(
    app: &App,
    server: &str,
    user: &str,
    method: http::Method,
    url: &str,
    body: Option<Vec<u8>>,
) -> oauth_core::AuthResponse {
    let metrics = Arc::new(oauth_core::MetricsCollector::new());
    let audit = Arc::new(oauth_core::AuditLogger::new());
    let interceptor = oauth_core::OAuthInterceptor::new(
        Arc::clone(&app.providers),
        Arc::clone(&app.servers),
        Arc::clone(&app.store),
        metrics,
        audit,
        oauth_core::InterceptorSettings::default(),
    );
    let mut req = oauth_core::AuthRequest::new(server, user, method, url);
    req.body = body;
    interceptor.intercept(req, &app.ctx).await
}
