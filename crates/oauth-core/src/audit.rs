//! Audit logger (spec §4.7 / C7): structured event recording for OAuth
//! request handling, token refresh, authorization flows, and revocations,
//! with queryable in-memory storage alongside `tracing` emission.

use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One recorded interceptor request.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Request correlation id.
    pub request_id: String,
    /// User the request executed on behalf of.
    pub user_id: String,
    /// Tenant, if tenant-scoped.
    pub tenant_id: Option<String>,
    /// Upstream server name.
    pub server_name: String,
    /// Provider key, when known.
    pub provider: Option<String>,
    /// Wall-clock duration of the request.
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// Whether the request ultimately succeeded.
    pub success: bool,
    /// Whether a token refresh occurred while handling it.
    pub token_refreshed: bool,
    /// Number of send attempts made.
    pub attempt_count: u32,
    /// Caller's remote address, if known.
    pub remote_addr: Option<String>,
    /// Caller's user agent, if known.
    pub user_agent: Option<String>,
    /// Error string, present only on failure.
    pub error: Option<String>,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
}

mod duration_millis {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }
}

/// A named lifecycle event: authorization flows, refreshes, revocations.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    /// Kind of event (`"authorize"`, `"refresh"`, `"revoke"`).
    pub kind: &'static str,
    /// Server involved.
    pub server_name: String,
    /// User involved.
    pub user_id: String,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Detail string, e.g. an error message on failure.
    pub detail: Option<String>,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Structured audit sink. Emits through `tracing` and keeps a queryable
/// in-memory buffer for admin-surface inspection.
#[derive(Default)]
pub struct AuditLogger {
    requests: RwLock<Vec<AuditEvent>>,
    lifecycle: RwLock<Vec<LifecycleEvent>>,
}

impl AuditLogger {
    /// An empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed interceptor request.
    pub fn record(&self, event: AuditEvent) {
        tracing::info!(
            request_id = %event.request_id,
            user_id = %event.user_id,
            server_name = %event.server_name,
            success = event.success,
            token_refreshed = event.token_refreshed,
            attempt_count = event.attempt_count,
            duration_ms = event.duration.as_millis(),
            error = event.error.as_deref(),
            "oauth request handled"
        );
        self.requests.write().expect("audit requests lock poisoned").push(event);
    }

    /// Record an authorization-flow, refresh, or revocation lifecycle
    /// event.
    pub fn record_lifecycle(&self, event: LifecycleEvent) {
        tracing::info!(
            kind = event.kind,
            server_name = %event.server_name,
            user_id = %event.user_id,
            success = event.success,
            detail = event.detail.as_deref(),
            "oauth lifecycle event"
        );
        self.lifecycle.write().expect("audit lifecycle lock poisoned").push(event);
    }

    /// Every request event for `user_id` at or after `since`.
    pub fn events_for_user(&self, user_id: &str, since: DateTime<Utc>) -> Vec<AuditEvent> {
        self.requests
            .read()
            .expect("audit requests lock poisoned")
            .iter()
            .filter(|e| e.user_id == user_id && e.timestamp >= since)
            .cloned()
            .collect()
    }

    /// Every request event for `server_name` at or after `since`.
    pub fn events_for_server(&self, server_name: &str, since: DateTime<Utc>) -> Vec<AuditEvent> {
        self.requests
            .read()
            .expect("audit requests lock poisoned")
            .iter()
            .filter(|e| e.server_name == server_name && e.timestamp >= since)
            .cloned()
            .collect()
    }

    /// Every failed request event at or after `since`.
    pub fn failed_since(&self, since: DateTime<Utc>) -> Vec<AuditEvent> {
        self.requests
            .read()
            .expect("audit requests lock poisoned")
            .iter()
            .filter(|e| !e.success && e.timestamp >= since)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(user_id: &str, success: bool) -> AuditEvent {
        AuditEvent {
            request_id: "req-1".into(),
            user_id: user_id.into(),
            tenant_id: None,
            server_name: "svc".into(),
            provider: Some("github".into()),
            duration: Duration::from_millis(42),
            success,
            token_refreshed: false,
            attempt_count: 1,
            remote_addr: None,
            user_agent: None,
            error: if success { None } else { Some("boom".into()) },
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn queries_filter_by_user_and_success() {
        let logger = AuditLogger::new();
        logger.record(sample_event("alice", true));
        logger.record(sample_event("bob", false));

        let since = Utc::now() - chrono::Duration::minutes(1);
        assert_eq!(logger.events_for_user("alice", since).len(), 1);
        assert_eq!(logger.failed_since(since).len(), 1);
        assert_eq!(logger.events_for_server("svc", since).len(), 2);
    }
}
