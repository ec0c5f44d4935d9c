//! Flag manager (spec §4.6 / C6): caching, circuit-breaking facade around
//! the pure evaluator, plus configuration loading/reload and flag CRUD.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::error::{OAuthError, OAuthResult, ValidationError};
use crate::metrics::MetricsCollector;

use super::engine;
use super::{EvaluationContext, FailureMode, FlagConfiguration, FlagDefinition, FlagValue};

/// A configuration source the manager can (re)load from.
#[async_trait]
pub trait ConfigLoader: Send + Sync {
    /// Load (or re-load) the full flag configuration.
    async fn load(&self) -> OAuthResult<FlagConfiguration>;
}

/// Events the manager emits so external subscribers can react without
/// blocking evaluation.
#[derive(Debug, Clone)]
pub enum FlagEvent {
    /// A flag was evaluated.
    FlagEvaluated(FlagValue),
    /// A flag definition changed (created, updated, or deleted).
    FlagChanged { name: String },
    /// The whole configuration was swapped.
    ConfigurationChanged { version: u64 },
    /// An experiment transitioned to running.
    ExperimentStarted { id: String },
    /// An experiment transitioned to completed.
    ExperimentEnded { id: String },
}

/// Receives [`FlagEvent`]s. Must not block; the manager calls handlers
/// without holding its internal lock.
#[async_trait]
pub trait FlagEventHandler: Send + Sync {
    /// Handle one event.
    async fn handle(&self, event: FlagEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct CircuitBreaker {
    state: std::sync::Mutex<BreakerState>,
    failure_count: AtomicU32,
    failure_threshold: u32,
    reset_timeout: Duration,
    opened_at: std::sync::Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            state: std::sync::Mutex::new(BreakerState::Closed),
            failure_count: AtomicU32::new(0),
            failure_threshold,
            reset_timeout,
            opened_at: std::sync::Mutex::new(None),
        }
    }

    /// Whether a call should proceed to the evaluator right now. Open
    /// breakers past their reset timeout transition to half-open and
    /// permit exactly one probe.
    fn should_proceed(&self) -> bool {
        let mut state = self.state.lock().expect("breaker state lock poisoned");
        match *state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let elapsed = self
                    .opened_at
                    .lock()
                    .expect("breaker opened_at lock poisoned")
                    .map(|at| at.elapsed())
                    .unwrap_or_default();
                if elapsed >= self.reset_timeout {
                    *state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        *self.state.lock().expect("breaker state lock poisoned") = BreakerState::Closed;
    }

    fn record_failure(&self) {
        let mut state = self.state.lock().expect("breaker state lock poisoned");
        if *state == BreakerState::HalfOpen {
            *state = BreakerState::Open;
            *self.opened_at.lock().expect("breaker opened_at lock poisoned") = Some(Instant::now());
            return;
        }
        let count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= self.failure_threshold {
            *state = BreakerState::Open;
            *self.opened_at.lock().expect("breaker opened_at lock poisoned") = Some(Instant::now());
        }
    }

    fn is_open(&self) -> bool {
        *self.state.lock().expect("breaker state lock poisoned") == BreakerState::Open
    }
}

#[derive(Clone)]
struct CacheEntry {
    value: FlagValue,
    inserted_at: Instant,
}

fn cache_key(flag: &str, ctx: &EvaluationContext) -> String {
    format!(
        "{}|{}|{}|{}",
        flag,
        ctx.user_id,
        ctx.server_name.as_deref().unwrap_or(""),
        ctx.tenant_id.as_deref().unwrap_or("")
    )
}

/// Facade around [`engine::evaluate`] providing caching, a circuit
/// breaker, failsafe behavior, configuration reload, and flag CRUD.
pub struct FlagManager {
    config: RwLock<Arc<FlagConfiguration>>,
    cache: DashMap<String, CacheEntry>,
    breaker: CircuitBreaker,
    handlers: RwLock<Vec<Arc<dyn FlagEventHandler>>>,
    metrics: Arc<MetricsCollector>,
    version_counter: AtomicU64,
}

impl FlagManager {
    /// Build a manager over `config`, with circuit-breaker parameters
    /// defaulting to failure_threshold=10, reset_timeout=2min.
    pub fn new(config: FlagConfiguration, metrics: Arc<MetricsCollector>) -> Self {
        let version_counter = AtomicU64::new(config.version);
        Self {
            config: RwLock::new(Arc::new(config)),
            cache: DashMap::new(),
            breaker: CircuitBreaker::new(10, Duration::from_secs(120)),
            handlers: RwLock::new(Vec::new()),
            metrics,
            version_counter,
        }
    }

    /// Register an event handler. Called for every subsequent event;
    /// never while holding the manager's config lock.
    pub async fn add_handler(&self, handler: Arc<dyn FlagEventHandler>) {
        self.handlers.write().await.push(handler);
    }

    async fn emit(&self, event: FlagEvent) {
        let handlers = self.handlers.read().await.clone();
        for handler in handlers {
            handler.handle(event.clone()).await;
        }
    }

    /// Evaluate `flag_name` for `ctx`, consulting the cache and circuit
    /// breaker first.
    pub async fn evaluate(&self, flag_name: &str, ctx: &EvaluationContext) -> OAuthResult<FlagValue> {
        let config = Arc::clone(&*self.config.read().await);
        let key = cache_key(flag_name, ctx);
        let ttl = config.global_settings.default_cache_ttl;

        if let Some(entry) = self.cache.get(&key) {
            if entry.inserted_at.elapsed() < ttl {
                self.metrics.record_cache(true);
                return Ok(entry.value.clone());
            }
        }
        self.metrics.record_cache(false);

        if config.global_settings.circuit_breaker_enabled && !self.breaker.should_proceed() {
            return Ok(self.failsafe_value(flag_name, &config));
        }

        let Some(flag) = config.flags.get(flag_name) else {
            return Err(OAuthError::FlagNotFound(flag_name.to_string()));
        };

        let started = Instant::now();
        let result = engine::evaluate(flag, ctx, config.global_settings.evaluation_timeout);
        let eval_time = started.elapsed();

        match result {
            Ok(value) => {
                if config.global_settings.circuit_breaker_enabled {
                    self.breaker.record_success();
                }
                self.cache.insert(key, CacheEntry { value: value.clone(), inserted_at: Instant::now() });
                self.metrics.record_flag_evaluation(
                    flag_name,
                    value.enabled,
                    value.rule_matched.as_deref(),
                    value.variant.as_deref(),
                    eval_time,
                );
                self.emit(FlagEvent::FlagEvaluated(value.clone())).await;
                Ok(value)
            }
            Err(err) => {
                if config.global_settings.circuit_breaker_enabled {
                    self.breaker.record_failure();
                }
                self.metrics.record_error(&err);
                Err(err)
            }
        }
    }

    fn failsafe_value(&self, flag_name: &str, config: &FlagConfiguration) -> FlagValue {
        let enabled = matches!(config.global_settings.failure_mode, FailureMode::FailOpen);
        FlagValue {
            name: flag_name.to_string(),
            flag_type: config
                .flags
                .get(flag_name)
                .map(|f| f.flag_type)
                .unwrap_or(super::FlagType::Boolean),
            enabled,
            value: serde_json::Value::Bool(enabled),
            variant: None,
            reason: "failsafe_mode".to_string(),
            rule_matched: None,
            evaluated_at: Utc::now(),
        }
    }

    /// Whether the circuit breaker is currently tripped.
    pub fn circuit_open(&self) -> bool {
        self.breaker.is_open()
    }

    /// Reload configuration from `loader`: validates the candidate, then
    /// atomically swaps and clears the cache. Emits per-flag change
    /// events by diffing old vs. new.
    pub async fn reload(&self, loader: &dyn ConfigLoader) -> OAuthResult<()> {
        let candidate = loader.load().await?;
        for flag in candidate.flags.values() {
            let errors = validate_flag(flag);
            if !errors.is_empty() {
                return Err(OAuthError::InvalidFlag(errors));
            }
        }

        let old = {
            let mut guard = self.config.write().await;
            let old = Arc::clone(&guard);
            *guard = Arc::new(candidate);
            old
        };
        self.cache.clear();

        let new = Arc::clone(&*self.config.read().await);
        for name in new.flags.keys() {
            if old.flags.get(name).map(|f| f.version) != new.flags.get(name).map(|f| f.version) {
                self.emit(FlagEvent::FlagChanged { name: name.clone() }).await;
            }
        }
        for name in old.flags.keys() {
            if !new.flags.contains_key(name) {
                self.emit(FlagEvent::FlagChanged { name: name.clone() }).await;
            }
        }
        self.emit(FlagEvent::ConfigurationChanged { version: new.version }).await;
        Ok(())
    }

    /// Create a new flag at version 1.
    pub async fn create_flag(&self, mut flag: FlagDefinition) -> OAuthResult<()> {
        let errors = validate_flag(&flag);
        if !errors.is_empty() {
            return Err(OAuthError::InvalidFlag(errors));
        }
        let now = Utc::now();
        flag.version = 1;
        flag.created_at = now;
        flag.updated_at = now;
        let name = flag.name.clone();
        {
            let guard = self.config.read().await;
            let mut config = (**guard).clone();
            config.flags.insert(name.clone(), flag);
            config.version = self.version_counter.fetch_add(1, Ordering::SeqCst) + 1;
            drop(guard);
            *self.config.write().await = Arc::new(config);
        }
        self.cache.retain(|k, _| !k.starts_with(&format!("{name}|")));
        self.emit(FlagEvent::FlagChanged { name }).await;
        Ok(())
    }

    /// Update an existing flag, preserving `created_at` and bumping
    /// `version`/`updated_at`.
    pub async fn update_flag(&self, mut flag: FlagDefinition) -> OAuthResult<()> {
        let errors = validate_flag(&flag);
        if !errors.is_empty() {
            return Err(OAuthError::InvalidFlag(errors));
        }
        let name = flag.name.clone();
        {
            let guard = self.config.read().await;
            let mut config = (**guard).clone();
            let existing = config.flags.get(&name).ok_or_else(|| OAuthError::FlagNotFound(name.clone()))?;
            flag.created_at = existing.created_at;
            flag.version = existing.version + 1;
            flag.updated_at = Utc::now();
            config.flags.insert(name.clone(), flag);
            drop(guard);
            *self.config.write().await = Arc::new(config);
        }
        self.cache.retain(|k, _| !k.starts_with(&format!("{name}|")));
        self.emit(FlagEvent::FlagChanged { name }).await;
        Ok(())
    }

    /// Delete a flag and invalidate its cache entries.
    pub async fn delete_flag(&self, name: &str) -> OAuthResult<()> {
        {
            let guard = self.config.read().await;
            let mut config = (**guard).clone();
            config.flags.remove(name).ok_or_else(|| OAuthError::FlagNotFound(name.to_string()))?;
            drop(guard);
            *self.config.write().await = Arc::new(config);
        }
        self.cache.retain(|k, _| !k.starts_with(&format!("{name}|")));
        self.emit(FlagEvent::FlagChanged { name: name.to_string() }).await;
        Ok(())
    }

    /// Fetch the current definition for `name`.
    pub async fn get_flag(&self, name: &str) -> OAuthResult<FlagDefinition> {
        self.config
            .read()
            .await
            .flags
            .get(name)
            .cloned()
            .ok_or_else(|| OAuthError::FlagNotFound(name.to_string()))
    }

    /// List all currently loaded flags.
    pub async fn list_flags(&self) -> Vec<FlagDefinition> {
        self.config.read().await.flags.values().cloned().collect()
    }
}

fn validate_flag(flag: &FlagDefinition) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if flag.name.trim().is_empty() {
        errors.push(ValidationError::error("name", &flag.name, "required", "flag name must not be empty"));
    }
    if flag.rollout_percentage > 100 {
        errors.push(ValidationError::error(
            "rollout_percentage",
            flag.rollout_percentage.to_string(),
            "out_of_range",
            "rollout_percentage must be in [0,100]",
        ));
    }
    if !flag.variants.is_empty() {
        let total: u32 = flag.variants.iter().map(|v| v.weight).sum();
        if total != 100 {
            errors.push(ValidationError::error(
                "variants",
                total.to_string(),
                "weights_must_sum_to_100",
                "variant weights must sum to 100",
            ));
        }
    }
    for (i, rule) in flag.rules.iter().enumerate() {
        if rule.name.trim().is_empty() {
            errors.push(ValidationError::error(format!("rules[{i}].name"), "", "required", "rule name must not be empty"));
        }
    }
    errors
}

/// Loads configuration from a YAML or JSON file on disk.
pub struct FileConfigLoader {
    path: std::path::PathBuf,
}

impl FileConfigLoader {
    /// Read `path` on every `load` call.
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigLoader for FileConfigLoader {
    async fn load(&self) -> OAuthResult<FlagConfiguration> {
        let bytes = tokio::fs::read(&self.path).await?;
        match self.path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_slice(&bytes)?),
            _ => Ok(serde_json::from_slice(&bytes)?),
        }
    }
}

/// Loads configuration from environment variables, per the fixed naming
/// convention `MCP_PORTAL_FEATURE_<FLAG>` (+ `_ROLLOUT_PERCENTAGE`,
/// `_USER_OVERRIDES`) (spec §6). Only boolean/percentage flags are
/// representable this way; richer flags should use a file/HTTP/database
/// loader.
pub struct EnvConfigLoader;

impl EnvConfigLoader {
    /// Construct the loader. Stateless; reads `std::env` on `load`.
    pub fn new() -> Self {
        Self
    }
}

impl Default for EnvConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses the `_USER_OVERRIDES` suffix's value. Accepts a JSON object
/// (`{"alice":true,"bob":"variant-b"}`) for arbitrary override values, or
/// a comma-separated `user=value` list (`alice=true,bob=false`) using the
/// same boolean vocabulary as the flag's own on/off value.
fn parse_user_overrides(raw: &str) -> HashMap<String, serde_json::Value> {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(raw) {
        return map.into_iter().collect();
    }
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(user, value)| {
            let value = match value.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => serde_json::Value::Bool(true),
                "0" | "false" | "no" | "off" => serde_json::Value::Bool(false),
                other => serde_json::Value::String(other.to_string()),
            };
            (user.trim().to_string(), value)
        })
        .collect()
}

#[async_trait]
impl ConfigLoader for EnvConfigLoader {
    async fn load(&self) -> OAuthResult<FlagConfiguration> {
        const PREFIX: &str = "MCP_PORTAL_FEATURE_";
        let mut flags: HashMap<String, FlagDefinition> = HashMap::new();
        let now = Utc::now();

        for (key, value) in std::env::vars() {
            let Some(rest) = key.strip_prefix(PREFIX) else { continue };
            if rest.ends_with("_ROLLOUT_PERCENTAGE") || rest.ends_with("_USER_OVERRIDES") {
                continue;
            }
            let name = rest.to_lowercase();
            let enabled = matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
            let rollout_percentage = std::env::var(format!("{PREFIX}{rest}_ROLLOUT_PERCENTAGE"))
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100);
            let user_overrides = std::env::var(format!("{PREFIX}{rest}_USER_OVERRIDES"))
                .ok()
                .map(|raw| parse_user_overrides(&raw))
                .unwrap_or_default();
            flags.insert(
                name.clone(),
                FlagDefinition {
                    name,
                    flag_type: super::FlagType::Boolean,
                    enabled,
                    default_value: serde_json::Value::Bool(false),
                    rollout_percentage,
                    rules: vec![],
                    variants: vec![],
                    user_overrides,
                    server_overrides: HashMap::new(),
                    rollout_config: None,
                    version: 1,
                    created_at: now,
                    updated_at: now,
                },
            );
        }

        Ok(FlagConfiguration { version: 1, flags, ..FlagConfiguration::default() })
    }
}

/// Validates a remote config URL and its resolved address(es) before the
/// loader is allowed to connect, mirroring the discovery-document
/// fetcher's SSRF posture: https only, then a private/loopback/
/// link-local/cloud-metadata denylist checked against every IP the host
/// resolves to (not just the first one, which guards against DNS
/// rebinding between validation and connection).
fn validate_fetch_url(url_str: &str) -> OAuthResult<url::Url> {
    let url = url::Url::parse(url_str)
        .map_err(|e| OAuthError::ConfigSourceBlocked(format!("invalid url: {e}")))?;
    if url.scheme() != "https" {
        return Err(OAuthError::ConfigSourceBlocked(format!(
            "scheme must be https, got {}",
            url.scheme()
        )));
    }
    let host = url.host_str().ok_or_else(|| OAuthError::ConfigSourceBlocked("url has no host".into()))?;

    let addrs: Vec<_> = (host, 443u16)
        .to_socket_addrs()
        .map_err(|e| OAuthError::ConfigSourceBlocked(format!("dns resolution failed for {host}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(OAuthError::ConfigSourceBlocked(format!("no addresses resolved for {host}")));
    }
    for addr in &addrs {
        validate_fetch_ip(addr.ip())?;
    }
    Ok(url)
}

fn validate_fetch_ip(ip: IpAddr) -> OAuthResult<()> {
    match ip {
        IpAddr::V4(v4) => {
            if v4 == Ipv4Addr::new(169, 254, 169, 254) {
                return Err(OAuthError::ConfigSourceBlocked(format!("cloud metadata endpoint blocked: {ip}")));
            }
            if v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified() || v4.is_broadcast() {
                return Err(OAuthError::ConfigSourceBlocked(format!("blocked address: {ip}")));
            }
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xffc0) == 0xfe80 {
                return Err(OAuthError::ConfigSourceBlocked(format!("blocked address: {ip}")));
            }
        }
    }
    Ok(())
}

/// Loads configuration by fetching a JSON/YAML document over HTTPS,
/// re-validating the resolved IP against a private-network/localhost/
/// link-local/cloud-metadata denylist before connecting (spec §6).
/// Response size is capped and redirects are not followed, matching the
/// teacher's discovery-document fetcher.
pub struct HttpConfigLoader {
    url: String,
    client: reqwest::Client,
    max_response_size: usize,
}

impl HttpConfigLoader {
    /// `url` must resolve to an https endpoint. Uses a 64 KiB response
    /// cap and a 5 second request timeout.
    pub fn new(url: impl Into<String>) -> OAuthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| OAuthError::ConfigSourceUnavailable(format!("failed to build http client: {e}")))?;
        Ok(Self { url: url.into(), client, max_response_size: 64 * 1024 })
    }
}

#[async_trait]
impl ConfigLoader for HttpConfigLoader {
    async fn load(&self) -> OAuthResult<FlagConfiguration> {
        let url = validate_fetch_url(&self.url)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| OAuthError::ConfigSourceUnavailable(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(OAuthError::ConfigSourceUnavailable(format!(
                "http {} from {}",
                response.status().as_u16(),
                self.url
            )));
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_response_size {
                return Err(OAuthError::ConfigSourceUnavailable("response exceeds size limit".into()));
            }
        }

        let is_yaml = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("yaml"));

        let body = response
            .bytes()
            .await
            .map_err(|e| OAuthError::ConfigSourceUnavailable(format!("failed to read response: {e}")))?;
        if body.len() > self.max_response_size {
            return Err(OAuthError::ConfigSourceUnavailable("response exceeds size limit".into()));
        }

        if is_yaml {
            Ok(serde_yaml::from_slice(&body)?)
        } else {
            Ok(serde_json::from_slice(&body)?)
        }
    }
}

/// Loads configuration from a Postgres-backed flag table: one row per
/// flag, with a `definition` column holding a JSON-encoded
/// [`FlagDefinition`]. Gated behind the `database-config` feature so
/// consumers that only use file/env/http sources don't pull in `sqlx`.
#[cfg(feature = "database-config")]
pub struct DatabaseConfigLoader {
    pool: sqlx::PgPool,
}

#[cfg(feature = "database-config")]
impl DatabaseConfigLoader {
    /// Build a loader over an already-connected pool.
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "database-config")]
#[async_trait]
impl ConfigLoader for DatabaseConfigLoader {
    async fn load(&self) -> OAuthResult<FlagConfiguration> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT definition FROM feature_flags")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OAuthError::ConfigSourceUnavailable(format!("database query failed: {e}")))?;

        let mut flags = HashMap::new();
        for (definition,) in rows {
            let flag: FlagDefinition = serde_json::from_str(&definition)?;
            flags.insert(flag.name.clone(), flag);
        }
        let version = flags.values().map(|f| f.version).max().unwrap_or(1);

        Ok(FlagConfiguration { version, flags, ..FlagConfiguration::default() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::FlagType;

    fn sample_flag(name: &str, enabled: bool) -> FlagDefinition {
        let now = Utc::now();
        FlagDefinition {
            name: name.into(),
            flag_type: FlagType::Boolean,
            enabled,
            default_value: serde_json::Value::Bool(false),
            rollout_percentage: 100,
            rules: vec![],
            variants: vec![],
            user_overrides: HashMap::new(),
            server_overrides: HashMap::new(),
            rollout_config: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_evaluation() {
        let mut config = FlagConfiguration::default();
        config.flags.insert("f".into(), sample_flag("f", true));
        let manager = FlagManager::new(config, Arc::new(MetricsCollector::new()));
        let ctx = EvaluationContext::new("user-1");

        let first = manager.evaluate("f", &ctx).await.unwrap();
        let second = manager.evaluate("f", &ctx).await.unwrap();
        assert_eq!(first.reason, second.reason);

        let snap = manager.metrics.snapshot();
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 1);
    }

    #[tokio::test]
    async fn unknown_flag_errors() {
        let manager = FlagManager::new(FlagConfiguration::default(), Arc::new(MetricsCollector::new()));
        let ctx = EvaluationContext::new("user-1");
        assert!(matches!(manager.evaluate("missing", &ctx).await, Err(OAuthError::FlagNotFound(_))));
    }

    #[tokio::test]
    async fn create_then_update_bumps_version() {
        let manager = FlagManager::new(FlagConfiguration::default(), Arc::new(MetricsCollector::new()));
        manager.create_flag(sample_flag("f", true)).await.unwrap();
        let created = manager.get_flag("f").await.unwrap();
        assert_eq!(created.version, 1);

        manager.update_flag(sample_flag("f", false)).await.unwrap();
        let updated = manager.get_flag("f").await.unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.created_at, created.created_at);
    }

    #[tokio::test]
    async fn invalid_variant_weights_rejected() {
        let manager = FlagManager::new(FlagConfiguration::default(), Arc::new(MetricsCollector::new()));
        let mut flag = sample_flag("f", true);
        flag.flag_type = FlagType::Variant;
        flag.variants = vec![super::super::Variant { name: "a".into(), weight: 40, value: serde_json::Value::Null }];
        assert!(matches!(manager.create_flag(flag).await, Err(OAuthError::InvalidFlag(_))));
    }

    #[test]
    fn parse_user_overrides_accepts_json_object() {
        let parsed = parse_user_overrides(r#"{"alice":true,"bob":"variant-b"}"#);
        assert_eq!(parsed.get("alice"), Some(&serde_json::Value::Bool(true)));
        assert_eq!(parsed.get("bob"), Some(&serde_json::Value::String("variant-b".into())));
    }

    #[test]
    fn parse_user_overrides_accepts_key_value_list() {
        let parsed = parse_user_overrides("alice=true,bob=false");
        assert_eq!(parsed.get("alice"), Some(&serde_json::Value::Bool(true)));
        assert_eq!(parsed.get("bob"), Some(&serde_json::Value::Bool(false)));
    }

    #[tokio::test]
    async fn env_loader_populates_user_overrides() {
        std::env::set_var("MCP_PORTAL_FEATURE_NEW_DASHBOARD", "true");
        std::env::set_var("MCP_PORTAL_FEATURE_NEW_DASHBOARD_USER_OVERRIDES", "alice=true,bob=false");
        let config = EnvConfigLoader::new().load().await.unwrap();
        std::env::remove_var("MCP_PORTAL_FEATURE_NEW_DASHBOARD");
        std::env::remove_var("MCP_PORTAL_FEATURE_NEW_DASHBOARD_USER_OVERRIDES");

        let flag = config.flags.get("new_dashboard").unwrap();
        assert_eq!(flag.user_overrides.get("alice"), Some(&serde_json::Value::Bool(true)));
        assert_eq!(flag.user_overrides.get("bob"), Some(&serde_json::Value::Bool(false)));
    }

    #[test]
    fn fetch_url_rejects_non_https() {
        assert!(matches!(validate_fetch_url("http://example.com/flags.json"), Err(OAuthError::ConfigSourceBlocked(_))));
    }

    #[test]
    fn fetch_ip_rejects_loopback_and_metadata() {
        assert!(validate_fetch_ip(IpAddr::V4(Ipv4Addr::LOCALHOST)).is_err());
        assert!(validate_fetch_ip(IpAddr::V4(Ipv4Addr::new(169, 254, 169, 254))).is_err());
        assert!(validate_fetch_ip(IpAddr::V4(Ipv4Addr::new(172, 217, 0, 14))).is_ok());
    }
}
