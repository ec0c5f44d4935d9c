//! OAuth interceptor (spec §4.3 / C3): the per-request state machine that
//! resolves a server's token, refreshes it proactively or reactively, and
//! executes the outbound HTTP call with retry and backoff.

pub mod backoff;
pub mod coalesce;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::Client;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLogger};
use crate::call::CallContext;
use crate::error::{OAuthError, OAuthResult};
use crate::metrics::MetricsCollector;
use crate::providers::ProviderRegistry;
use crate::registry::ServerConfigRegistry;
use crate::store::TokenStore;
use crate::types::{StorageTier, TokenData, TokenKey};

use backoff::BackoffPolicy;
use coalesce::RefreshCoalescer;

/// An inbound request to be authorized and proxied to an upstream server.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// Correlates logs, metrics, and the audit trail for this call.
    pub request_id: String,
    /// Registry key of the upstream server.
    pub server_name: String,
    /// User on whose behalf the request executes.
    pub user_id: String,
    /// Tenant override, if the provider is tenant-scoped.
    pub tenant_id: Option<String>,
    /// HTTP method to use against the upstream.
    pub method: http::Method,
    /// Upstream URL.
    pub url: String,
    /// Additional headers to overlay on top of the injected `Authorization`.
    pub headers: HashMap<String, String>,
    /// Optional request body.
    pub body: Option<Vec<u8>>,
    /// Attempts made so far; callers start at 0.
    pub attempt_count: u32,
    /// Retry budget for this request.
    pub max_retries: u32,
    /// Caller-supplied user agent, if any.
    pub user_agent: Option<String>,
    /// Remote address of the original caller, for the audit trail.
    pub remote_addr: Option<String>,
}

impl AuthRequest {
    /// Construct a request with a fresh request id and default retry
    /// budget (3).
    pub fn new(server_name: impl Into<String>, user_id: impl Into<String>, method: http::Method, url: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            server_name: server_name.into(),
            user_id: user_id.into(),
            tenant_id: None,
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            attempt_count: 0,
            max_retries: 3,
            user_agent: None,
            remote_addr: None,
        }
    }
}

/// Result of routing an [`AuthRequest`] through the interceptor.
#[derive(Debug, Clone)]
pub struct AuthResponse {
    /// HTTP status code from the upstream (or a synthetic code on
    /// interceptor-level failure).
    pub status_code: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: Vec<u8>,
    /// Wall-clock time spent in the interceptor for this request.
    pub duration: Duration,
    /// Whether a refresh occurred while handling this request.
    pub token_refreshed: bool,
    /// Populated when the upstream or interceptor signaled an error.
    pub error: Option<String>,
}

/// Policy knobs governing retry, refresh, and timeout behavior.
#[derive(Debug, Clone)]
pub struct InterceptorSettings {
    /// Window before `expires_at` in which a token is treated as stale.
    pub refresh_threshold: chrono::Duration,
    /// Backoff applied between retries.
    pub backoff: BackoffPolicy,
    /// Status codes, besides 401, eligible for retry.
    pub retriable_statuses: Vec<u16>,
    /// Whether a 401 triggers an unconditional refresh-and-retry-once.
    pub retry_on_401: bool,
    /// Per-call deadline for the outer interceptor operation.
    pub request_timeout: Duration,
}

impl Default for InterceptorSettings {
    fn default() -> Self {
        Self {
            refresh_threshold: chrono::Duration::minutes(5),
            backoff: BackoffPolicy::default(),
            retriable_statuses: vec![403, 429, 500, 502, 503, 504],
            retry_on_401: true,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// The OAuth interception engine: ties together the provider registry,
/// server-config registry, hierarchical token store, and refresh
/// coalescing into the request state machine from spec §4.3.
pub struct OAuthInterceptor {
    providers: Arc<ProviderRegistry>,
    servers: Arc<ServerConfigRegistry>,
    store: Arc<TokenStore>,
    coalescer: RefreshCoalescer,
    settings: InterceptorSettings,
    http: Client,
    metrics: Arc<MetricsCollector>,
    audit: Arc<AuditLogger>,
}

impl OAuthInterceptor {
    /// Assemble the interceptor from its collaborators.
    pub fn new(
        providers: Arc<ProviderRegistry>,
        servers: Arc<ServerConfigRegistry>,
        store: Arc<TokenStore>,
        metrics: Arc<MetricsCollector>,
        audit: Arc<AuditLogger>,
        settings: InterceptorSettings,
    ) -> Self {
        Self {
            providers,
            servers,
            store,
            coalescer: RefreshCoalescer::new(),
            settings,
            http: Client::new(),
            metrics,
            audit,
        }
    }

    /// Route `req` through Resolve → CheckFreshness → (MaybeRefresh) →
    /// Send → Classify → (RefreshOn401) → (Retry|Return).
    pub async fn intercept(&self, mut req: AuthRequest, ctx: &CallContext) -> AuthResponse {
        let started = Instant::now();
        let result = self.intercept_inner(&mut req, ctx).await;
        let duration = started.elapsed();

        let (response, error_string) = match result {
            Ok(mut resp) => {
                resp.duration = duration;
                let err = resp.error.clone();
                (resp, err)
            }
            Err(err) => (
                AuthResponse {
                    status_code: synthetic_status(&err),
                    headers: HashMap::new(),
                    body: Vec::new(),
                    duration,
                    token_refreshed: false,
                    error: Some(err.to_string()),
                },
                Some(err.to_string()),
            ),
        };

        self.metrics.record_request(
            &req.server_name,
            error_string.is_none(),
            response.token_refreshed,
            error_string.as_deref(),
        );
        self.audit.record(AuditEvent {
            request_id: req.request_id.clone(),
            user_id: req.user_id.clone(),
            tenant_id: req.tenant_id.clone(),
            server_name: req.server_name.clone(),
            provider: None,
            duration,
            success: error_string.is_none(),
            token_refreshed: response.token_refreshed,
            attempt_count: req.attempt_count,
            remote_addr: req.remote_addr.clone(),
            user_agent: req.user_agent.clone(),
            error: error_string,
            timestamp: Utc::now(),
        });

        response
    }

    async fn intercept_inner(&self, req: &mut AuthRequest, ctx: &CallContext) -> OAuthResult<AuthResponse> {
        // 1. Resolve.
        let config = self.servers.get(&req.server_name).await?;
        let provider = self
            .providers
            .get(config.provider_type.key())
            .ok_or_else(|| OAuthError::ProviderNotRegistered(config.provider_type.key().into()))?;

        // 2. CheckFreshness / MaybeRefresh.
        let mut token = self
            .store
            .get(&req.server_name, &req.user_id, ctx)
            .await?
            .ok_or_else(|| OAuthError::ConfigNotFound(format!("no token for {}/{}", req.server_name, req.user_id)))?;
        let mut token_refreshed = false;

        if token.is_stale(Utc::now(), self.settings.refresh_threshold) {
            if let Some(refresh_token) = token.refresh_token.clone() {
                if provider.supports_refresh() {
                    match self.do_refresh(&config, &token, &refresh_token, provider.as_ref(), ctx).await {
                        Ok(refreshed) => {
                            token = refreshed;
                            token_refreshed = true;
                            self.metrics.record_refresh(&req.server_name, true);
                        }
                        Err(err) => {
                            tracing::warn!(server = %req.server_name, error = %err, "proactive refresh failed, continuing with existing token");
                            self.metrics.record_refresh(&req.server_name, false);
                        }
                    }
                }
            }
        }

        // 3/4. Send + Classify, with retry loop.
        let mut last_response: Option<AuthResponse> = None;
        loop {
            ctx.check_cancelled()?;
            let send_result = self.send(req, &token).await;
            let resp = match send_result {
                Ok(resp) => resp,
                Err(_transport_err) => {
                    req.attempt_count += 1;
                    if req.attempt_count > req.max_retries {
                        return Err(OAuthError::TransportExhausted { attempts: req.attempt_count });
                    }
                    ctx.cancellable_sleep(self.settings.backoff.delay_for(req.attempt_count - 1)).await?;
                    continue;
                }
            };

            if resp.status_code < 400 {
                last_response = Some(resp);
                break;
            }

            if resp.status_code == 401
                && self.settings.retry_on_401
                && provider.supports_refresh()
                && token.refresh_token.is_some()
                && !token_refreshed
            {
                let refresh_token = token.refresh_token.clone().unwrap();
                match self.do_refresh(&config, &token, &refresh_token, provider.as_ref(), ctx).await {
                    Ok(refreshed) => {
                        token = refreshed;
                        token_refreshed = true;
                        self.metrics.record_refresh(&req.server_name, true);
                        let retried = self.send(req, &token).await?;
                        last_response = Some(AuthResponse { token_refreshed: true, ..retried });
                        break;
                    }
                    Err(err) => {
                        self.metrics.record_refresh(&req.server_name, false);
                        return Err(err);
                    }
                }
            }

            if self.settings.retriable_statuses.contains(&resp.status_code) && req.attempt_count < req.max_retries {
                req.attempt_count += 1;
                ctx.cancellable_sleep(self.settings.backoff.delay_for(req.attempt_count - 1)).await?;
                continue;
            }

            last_response = Some(resp);
            break;
        }

        let mut resp = last_response.expect("loop always assigns a response before breaking");
        resp.token_refreshed = resp.token_refreshed || token_refreshed;

        // 5. Update usage stats and persist asynchronously (must not block
        // the critical return path).
        token.mark_used(Utc::now());
        let store = Arc::clone(&self.store);
        let persist_ctx = ctx.clone();
        let tier = token.storage_tier;
        tokio::spawn(async move {
            if let Err(err) = store.store(token, tier, &persist_ctx).await {
                tracing::warn!(error = %err, "failed to persist token usage stats");
            }
        });

        Ok(resp)
    }

    async fn do_refresh(
        &self,
        config: &crate::types::ServerConfig,
        current: &TokenData,
        refresh_token: &str,
        provider: &dyn crate::providers::Provider,
        ctx: &CallContext,
    ) -> OAuthResult<TokenData> {
        let key = TokenKey::new(&current.server_name, &current.user_id);
        let server_name = current.server_name.clone();
        let user_id = current.user_id.clone();
        let tenant_id = current.tenant_id.clone();
        let storage_tier = current.storage_tier;
        let provider_type = current.provider_type;
        let refresh_token = refresh_token.to_string();
        let config = config.clone();
        let ctx = ctx.clone();

        self.coalescer
            .run(key, move || {
                let provider_name = provider.name();
                async move {
                    let response = provider.refresh(&config, &refresh_token, &ctx).await?;
                    let now = Utc::now();
                    let (expires_at, refresh_at) = provider.default_expiry(now, response.expires_in);
                    let _ = provider_name;
                    Ok(TokenData {
                        server_name,
                        user_id,
                        provider_type,
                        tenant_id,
                        access_token: response.access_token,
                        refresh_token: response.refresh_token.or(Some(refresh_token)),
                        id_token: response.id_token,
                        token_type: response.token_type,
                        issued_at: now,
                        expires_at,
                        refresh_at,
                        last_used: None,
                        scopes: response.scopes,
                        storage_tier,
                        usage_count: 0,
                    })
                }
            })
            .await
    }

    async fn send(&self, req: &AuthRequest, token: &TokenData) -> OAuthResult<AuthResponse> {
        let mut builder = self.http.request(req.method.clone(), &req.url);
        builder = builder.header("Authorization", format!("{} {}", token.token_type, token.access_token));
        for (k, v) in &req.headers {
            builder = builder.header(k, v);
        }
        if let Some(ua) = &req.user_agent {
            builder = builder.header("User-Agent", ua);
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }
        builder = builder.timeout(self.settings.request_timeout);

        let resp = builder
            .send()
            .await
            .map_err(|source| OAuthError::ProviderTransport { provider: "upstream".into(), source })?;

        let status_code = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = resp.bytes().await.map(|b| b.to_vec()).unwrap_or_default();

        Ok(AuthResponse {
            status_code,
            headers,
            body,
            duration: Duration::ZERO,
            token_refreshed: false,
            error: None,
        })
    }

    /// Healthy iff the token store reports healthy and at least one
    /// provider is registered.
    pub async fn health(&self, ctx: &CallContext) -> bool {
        self.store.health(ctx).await && !self.providers.list().is_empty()
    }
}

fn synthetic_status(err: &OAuthError) -> u16 {
    match err {
        OAuthError::ConfigNotFound(_) | OAuthError::ProviderNotRegistered(_) => 404,
        OAuthError::DisabledConfig(_) => 403,
        OAuthError::Unauthorized => 401,
        OAuthError::Cancelled | OAuthError::Timeout => 499,
        _ => 502,
    }
}
