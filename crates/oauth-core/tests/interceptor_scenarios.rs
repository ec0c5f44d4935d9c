//! End-to-end interceptor scenarios against mocked upstream/provider
//! endpoints (spec §8).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use oauth_core::interceptor::{AuthRequest, InterceptorSettings};
use oauth_core::{
    AuditLogger, CallContext, MetricsCollector, OAuthInterceptor, ProviderRegistry, ProviderType,
    ServerConfig, ServerConfigRegistry, StorageTier, TokenData, TokenStore,
};
use oauth_core::interceptor::backoff::BackoffPolicy;
use oauth_core::store::local::LocalSecretsDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn server_config(name: &str, provider: ProviderType, token_url: Option<String>) -> ServerConfig {
    let now = Utc::now();
    ServerConfig {
        server_name: name.into(),
        provider_type: provider,
        tenant_id: None,
        client_id: "client-id".into(),
        client_secret: Some(secrecy::SecretString::from("client-secret".to_string())),
        scopes: vec![],
        redirect_uri: "https://example.com/callback".into(),
        auth_url: None,
        token_url,
        jwks_url: None,
        extra: HashMap::new(),
        created_at: now,
        updated_at: now,
        is_active: true,
    }
}

fn token_for(server_name: &str, expires_in: chrono::Duration, refresh_token: Option<&str>) -> TokenData {
    let now = Utc::now();
    TokenData {
        server_name: server_name.into(),
        user_id: "user-1".into(),
        provider_type: ProviderType::Google,
        tenant_id: None,
        access_token: "initial-access-token".into(),
        refresh_token: refresh_token.map(str::to_string),
        id_token: None,
        token_type: "Bearer".into(),
        issued_at: now,
        expires_at: now + expires_in,
        refresh_at: now + expires_in - chrono::Duration::minutes(5),
        last_used: None,
        scopes: vec!["read".into()],
        storage_tier: StorageTier::LocalSecretsDir,
        usage_count: 0,
    }
}

async fn build_interceptor(
    tmp: &tempfile::TempDir,
    settings: InterceptorSettings,
) -> (Arc<ServerConfigRegistry>, Arc<TokenStore>, OAuthInterceptor) {
    let providers = Arc::new(ProviderRegistry::with_defaults());
    let servers = Arc::new(ServerConfigRegistry::new());
    let tier: Arc<dyn oauth_core::store::Tier> = Arc::new(LocalSecretsDir::new(tmp.path()));
    let store = Arc::new(TokenStore::new(vec![tier], None));
    let metrics = Arc::new(MetricsCollector::new());
    let audit = Arc::new(AuditLogger::new());
    let interceptor = OAuthInterceptor::new(
        Arc::clone(&providers),
        Arc::clone(&servers),
        Arc::clone(&store),
        metrics,
        audit,
        settings,
    );
    (servers, store, interceptor)
}

fn fast_settings() -> InterceptorSettings {
    InterceptorSettings {
        backoff: BackoffPolicy {
            initial_interval: std::time::Duration::from_millis(5),
            multiplier: 2.0,
            max_interval: std::time::Duration::from_millis(50),
            jitter: false,
        },
        ..InterceptorSettings::default()
    }
}

#[tokio::test]
async fn fresh_token_passes_through_with_200() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&upstream)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let (servers, store, interceptor) = build_interceptor(&tmp, fast_settings()).await;
    let providers = ProviderRegistry::with_defaults();
    servers.register(server_config("svc", ProviderType::Google, None), &providers).await.unwrap();
    let ctx = CallContext::new("req-1");
    store.store(token_for("svc", chrono::Duration::hours(1), Some("rt")), StorageTier::LocalSecretsDir, &ctx).await.unwrap();

    let req = AuthRequest::new("svc", "user-1", http::Method::GET, format!("{}/resource", upstream.uri()));
    let resp = interceptor.intercept(req, &ctx).await;

    assert_eq!(resp.status_code, 200);
    assert!(!resp.token_refreshed);
    assert!(resp.error.is_none());
}

#[tokio::test]
async fn expired_token_refreshes_before_sending() {
    let provider_mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "refreshed-access-token",
            "refresh_token": "new-refresh-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(&provider_mock)
        .await;

    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&upstream)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let (servers, store, interceptor) = build_interceptor(&tmp, fast_settings()).await;
    let providers = ProviderRegistry::with_defaults();
    let token_url = format!("{}/token", provider_mock.uri());
    servers.register(server_config("svc", ProviderType::Google, Some(token_url)), &providers).await.unwrap();
    let ctx = CallContext::new("req-2");
    store
        .store(token_for("svc", chrono::Duration::seconds(1), Some("rt")), StorageTier::LocalSecretsDir, &ctx)
        .await
        .unwrap();

    let req = AuthRequest::new("svc", "user-1", http::Method::GET, format!("{}/resource", upstream.uri()));
    let resp = interceptor.intercept(req, &ctx).await;

    assert_eq!(resp.status_code, 200);
    assert!(resp.token_refreshed);
}

#[tokio::test]
async fn reactive_refresh_on_401_then_success() {
    let provider_mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "refreshed-access-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(&provider_mock)
        .await;

    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&upstream)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let (servers, store, interceptor) = build_interceptor(&tmp, fast_settings()).await;
    let providers = ProviderRegistry::with_defaults();
    let token_url = format!("{}/token", provider_mock.uri());
    servers.register(server_config("svc", ProviderType::Google, Some(token_url)), &providers).await.unwrap();
    let ctx = CallContext::new("req-3");
    store
        .store(token_for("svc", chrono::Duration::hours(1), Some("rt")), StorageTier::LocalSecretsDir, &ctx)
        .await
        .unwrap();

    let req = AuthRequest::new("svc", "user-1", http::Method::GET, format!("{}/resource", upstream.uri()));
    let resp = interceptor.intercept(req, &ctx).await;

    assert_eq!(resp.status_code, 200);
    assert!(resp.token_refreshed);
}

#[tokio::test]
async fn provider_without_refresh_surfaces_401() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&upstream)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let (servers, store, interceptor) = build_interceptor(&tmp, fast_settings()).await;
    let providers = ProviderRegistry::with_defaults();
    servers.register(server_config("svc", ProviderType::Github, None), &providers).await.unwrap();
    let ctx = CallContext::new("req-4");
    let mut token = token_for("svc", chrono::Duration::hours(1), None);
    token.provider_type = ProviderType::Github;
    store.store(token, StorageTier::LocalSecretsDir, &ctx).await.unwrap();

    let req = AuthRequest::new("svc", "user-1", http::Method::GET, format!("{}/resource", upstream.uri()));
    let resp = interceptor.intercept(req, &ctx).await;

    assert_eq!(resp.status_code, 401);
    assert!(!resp.token_refreshed);
}

#[tokio::test]
async fn retries_with_backoff_on_503_until_budget_exhausted() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&upstream)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let (servers, store, interceptor) = build_interceptor(&tmp, fast_settings()).await;
    let providers = ProviderRegistry::with_defaults();
    servers.register(server_config("svc", ProviderType::Google, None), &providers).await.unwrap();
    let ctx = CallContext::new("req-5");
    store
        .store(token_for("svc", chrono::Duration::hours(1), Some("rt")), StorageTier::LocalSecretsDir, &ctx)
        .await
        .unwrap();

    let req = AuthRequest::new("svc", "user-1", http::Method::GET, format!("{}/resource", upstream.uri()));
    let resp = interceptor.intercept(req, &ctx).await;

    assert_eq!(resp.status_code, 503);
    let requests = upstream.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4); // initial attempt + 3 retries (max_retries default)
}
