//! Metrics collector (spec §4.7 / C7): global and per-flag counters,
//! latency tracking, and error-category bucketing. Writers are concurrent;
//! readers obtain a consistent snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::error::{categorize_error, OAuthError};

/// Consistent point-in-time view of the collector's state.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Total requests handled.
    pub total_requests: u64,
    /// Requests that completed successfully.
    pub successful_requests: u64,
    /// Requests that ended in an error.
    pub failed_requests: u64,
    /// Refreshes that succeeded.
    pub refresh_success: u64,
    /// Refreshes that failed.
    pub refresh_failure: u64,
    /// Error counts by category bucket.
    pub errors_by_category: HashMap<String, u64>,
    /// Exponential moving average of request latency, in milliseconds.
    pub mean_latency_ms: f64,
    /// Cache hits recorded by the flag manager.
    pub cache_hits: u64,
    /// Cache misses recorded by the flag manager.
    pub cache_misses: u64,
    /// Per-flag evaluation counters.
    pub flags: HashMap<String, FlagMetricsSnapshot>,
}

/// Per-flag counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlagMetricsSnapshot {
    /// Times this flag evaluated to `true`.
    pub true_count: u64,
    /// Times this flag evaluated to `false`.
    pub false_count: u64,
    /// Counts per matched rule name.
    pub rule_matches: HashMap<String, u64>,
    /// Counts per selected variant name.
    pub variant_counts: HashMap<String, u64>,
    /// Maximum observed evaluation time, in microseconds.
    pub max_eval_micros: u64,
    /// Mean observed evaluation time, in microseconds.
    pub mean_eval_micros: f64,
}

#[derive(Default)]
struct FlagCounters {
    true_count: AtomicU64,
    false_count: AtomicU64,
    rule_matches: DashMap<String, AtomicU64>,
    variant_counts: DashMap<String, AtomicU64>,
    max_eval_micros: AtomicU64,
    eval_total_micros: AtomicU64,
    eval_count: AtomicU64,
}

/// Collects request, refresh, and flag-evaluation metrics.
#[derive(Default)]
pub struct MetricsCollector {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    refresh_success: AtomicU64,
    refresh_failure: AtomicU64,
    errors_by_category: DashMap<String, AtomicU64>,
    latency_ema_micros: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    flags: DashMap<String, FlagCounters>,
}

const EMA_ALPHA: f64 = 0.2;

impl MetricsCollector {
    /// An empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of an interceptor request.
    pub fn record_request(&self, _server_name: &str, success: bool, _token_refreshed: bool, error: Option<&str>) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
            if let Some(message) = error {
                self.bump_category_for_message(message);
            }
        }
        #[cfg(feature = "metrics")]
        emit_external("oauth_core_requests_total", 1);
    }

    /// Record a refresh attempt's outcome.
    pub fn record_refresh(&self, _server_name: &str, success: bool) {
        if success {
            self.refresh_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.refresh_failure.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a typed error using the same categorization the error
    /// taxonomy exposes.
    pub fn record_error(&self, err: &OAuthError) {
        let bucket = categorize_error(err);
        self.errors_by_category.entry(bucket.to_string()).or_default().fetch_add(1, Ordering::Relaxed);
    }

    fn bump_category_for_message(&self, message: &str) {
        let haystack = message.to_lowercase();
        const BUCKETS: &[&str] = &[
            "timeout", "not_found", "validation", "permission", "circuit_breaker", "cache", "database", "network",
        ];
        let bucket = BUCKETS
            .iter()
            .find(|b| haystack.contains(*b) || haystack.contains(&b.replace('_', " ")))
            .copied()
            .unwrap_or("unknown");
        self.errors_by_category.entry(bucket.to_string()).or_default().fetch_add(1, Ordering::Relaxed);
    }

    /// Record request latency for the moving average.
    pub fn record_latency(&self, duration: Duration) {
        let sample = duration.as_micros() as u64;
        self.latency_ema_micros
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |prev| {
                Some(if prev == 0 {
                    sample
                } else {
                    ((1.0 - EMA_ALPHA) * prev as f64 + EMA_ALPHA * sample as f64) as u64
                })
            })
            .ok();
    }

    /// Record a flag-manager cache hit or miss.
    pub fn record_cache(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one flag evaluation's result.
    pub fn record_flag_evaluation(
        &self,
        flag_name: &str,
        enabled: bool,
        rule_matched: Option<&str>,
        variant: Option<&str>,
        eval_time: Duration,
    ) {
        let counters = self.flags.entry(flag_name.to_string()).or_default();
        if enabled {
            counters.true_count.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.false_count.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(rule) = rule_matched {
            counters.rule_matches.entry(rule.to_string()).or_default().fetch_add(1, Ordering::Relaxed);
        }
        if let Some(variant) = variant {
            counters.variant_counts.entry(variant.to_string()).or_default().fetch_add(1, Ordering::Relaxed);
        }
        let micros = eval_time.as_micros() as u64;
        counters.max_eval_micros.fetch_max(micros, Ordering::Relaxed);
        counters.eval_total_micros.fetch_add(micros, Ordering::Relaxed);
        counters.eval_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let errors_by_category = self
            .errors_by_category
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();

        let flags = self
            .flags
            .iter()
            .map(|entry| {
                let counters = entry.value();
                let eval_count = counters.eval_count.load(Ordering::Relaxed);
                let mean = if eval_count == 0 {
                    0.0
                } else {
                    counters.eval_total_micros.load(Ordering::Relaxed) as f64 / eval_count as f64
                };
                (
                    entry.key().clone(),
                    FlagMetricsSnapshot {
                        true_count: counters.true_count.load(Ordering::Relaxed),
                        false_count: counters.false_count.load(Ordering::Relaxed),
                        rule_matches: counters
                            .rule_matches
                            .iter()
                            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
                            .collect(),
                        variant_counts: counters
                            .variant_counts
                            .iter()
                            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
                            .collect(),
                        max_eval_micros: counters.max_eval_micros.load(Ordering::Relaxed),
                        mean_eval_micros: mean,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            refresh_success: self.refresh_success.load(Ordering::Relaxed),
            refresh_failure: self.refresh_failure.load(Ordering::Relaxed),
            errors_by_category,
            mean_latency_ms: self.latency_ema_micros.load(Ordering::Relaxed) as f64 / 1000.0,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            flags,
        }
    }
}

#[cfg(feature = "metrics")]
pub(crate) fn emit_external(name: &'static str, value: u64) {
    metrics::counter!(name).increment(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_request_success_and_failure() {
        let collector = MetricsCollector::new();
        collector.record_request("svc", true, false, None);
        collector.record_request("svc", false, false, Some("provider timed out"));
        let snap = collector.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.successful_requests, 1);
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.errors_by_category.get("timeout"), Some(&1));
    }

    #[test]
    fn tracks_flag_counters() {
        let collector = MetricsCollector::new();
        collector.record_flag_evaluation("new-ui", true, Some("beta-users"), None, Duration::from_micros(50));
        collector.record_flag_evaluation("new-ui", false, None, None, Duration::from_micros(150));
        let snap = collector.snapshot();
        let flag = snap.flags.get("new-ui").unwrap();
        assert_eq!(flag.true_count, 1);
        assert_eq!(flag.false_count, 1);
        assert_eq!(flag.rule_matches.get("beta-users"), Some(&1));
        assert_eq!(flag.max_eval_micros, 150);
    }
}
