//! Feature-flag evaluation (spec §4.5-§4.6 / C5-C6): a pure evaluator
//! over flag definitions and an evaluation context, fronted by a caching,
//! circuit-breaking manager.

pub mod engine;
pub mod manager;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of flag, affecting which evaluation paths apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlagType {
    /// Plain on/off.
    Boolean,
    /// Gated purely by `rollout_percentage`.
    Percentage,
    /// Gated primarily by user overrides/rules.
    UserTarget,
    /// Gated primarily by server overrides/rules.
    ServerTarget,
    /// Resolves to one of several named variants.
    Variant,
}

/// Comparison operator for a rule condition (spec §4.5, exhaustive list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
    In,
    NotIn,
    RegexMatch,
    Percentage,
    VersionMatch,
    DateAfter,
    DateBefore,
}

/// One condition within a [`Rule`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Attribute name, looked up in `EvaluationContext::attributes` (with
    /// `user_id`, `tenant_id`, `server_name` also addressable directly).
    pub attribute: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Scalar comparison value (used by most operators).
    pub value: Option<Value>,
    /// Set comparison values (used by `in`/`not_in`).
    pub values: Option<Vec<Value>>,
    /// Invert the result of the operator comparison.
    #[serde(default)]
    pub negate: bool,
}

/// A named targeting rule: conditions AND-ed together, with a priority
/// used to order evaluation (ties broken by insertion order).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Rule name, echoed in the evaluation reason (`rule_match:<name>`).
    pub name: String,
    /// Higher runs first.
    pub priority: i32,
    /// Whether the rule is currently considered.
    pub enabled: bool,
    /// Conditions, all of which must match.
    pub conditions: Vec<Condition>,
    /// Value to return when this rule matches.
    pub value: Value,
}

/// One weighted option in a [`FlagType::Variant`] flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    /// Variant name, echoed in the evaluation result.
    pub name: String,
    /// Relative weight; all variants on a flag must sum to 100.
    pub weight: u32,
    /// Value returned when this variant is selected.
    pub value: Value,
}

/// Rollout strategy and its parameters (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RolloutConfig {
    /// `hash(user_id) mod 100 < start_percentage`.
    Percentage {
        /// Inclusion threshold in `[0,100]`.
        start_percentage: u32,
    },
    /// True iff the user belongs to any listed canary group.
    Canary {
        /// Canary group names.
        groups: Vec<String>,
    },
    /// Time-windowed rollout with optional business-hours gating and
    /// percentage milestones.
    Scheduled {
        /// Inclusive start of the rollout window.
        start: DateTime<Utc>,
        /// Inclusive end of the rollout window, open-ended if `None`.
        end: Option<DateTime<Utc>>,
        /// Optional business-hours restriction.
        business_hours: Option<BusinessHours>,
        /// Percentage milestones by timestamp, applied in order.
        milestones: Vec<Milestone>,
    },
    /// Always excluded; must be enabled by flipping the flag directly.
    Manual,
}

/// A business-hours window used by [`RolloutConfig::Scheduled`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHours {
    /// IANA timezone name, e.g. `"America/New_York"`.
    pub timezone: String,
    /// Inclusive start hour-of-day, 0-23, in `timezone`.
    pub start_hour: u32,
    /// Exclusive end hour-of-day, 0-23, in `timezone`.
    pub end_hour: u32,
    /// Allowed days of week, 0 = Sunday.
    pub days: Vec<u32>,
}

/// A single rollout-percentage step at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    /// When this milestone's percentage takes effect.
    pub at: DateTime<Utc>,
    /// Percentage in `[0,100]` active from `at` until the next milestone.
    pub percentage: u32,
}

/// A single flag's full definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagDefinition {
    /// Unique flag name.
    pub name: String,
    /// Flag kind.
    pub flag_type: FlagType,
    /// Master on/off switch; `false` short-circuits to disabled.
    pub enabled: bool,
    /// Value returned when no other path applies.
    pub default_value: Value,
    /// Base rollout percentage in `[0,100]`, used when no `rollout_config`
    /// strategy is present.
    pub rollout_percentage: u32,
    /// Targeting rules, evaluated by descending priority.
    pub rules: Vec<Rule>,
    /// Variants for [`FlagType::Variant`] flags.
    pub variants: Vec<Variant>,
    /// Per-user value overrides.
    pub user_overrides: HashMap<String, Value>,
    /// Per-server value overrides.
    pub server_overrides: HashMap<String, Value>,
    /// Optional rollout gate.
    pub rollout_config: Option<RolloutConfig>,
    /// Monotonically increasing version, bumped on every update.
    pub version: u64,
    /// Creation timestamp, preserved across updates.
    pub created_at: DateTime<Utc>,
    /// Bumped on every update.
    pub updated_at: DateTime<Utc>,
}

/// Per-evaluation context. Never shared mutably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationContext {
    /// Opaque user identifier; required for deterministic bucketing.
    pub user_id: String,
    /// Tenant, if applicable.
    pub tenant_id: Option<String>,
    /// Upstream server name, if the evaluation is request-scoped.
    pub server_name: Option<String>,
    /// Correlates this evaluation with a request.
    pub request_id: Option<String>,
    /// Caller's remote address.
    pub remote_addr: Option<String>,
    /// Free-form attributes consulted by rule conditions.
    pub attributes: HashMap<String, Value>,
    /// Free-form headers consulted by rule conditions.
    pub headers: HashMap<String, String>,
    /// Evaluation timestamp; defaults to `Utc::now()` if unset by the
    /// caller, but tests may pin it for determinism.
    pub timestamp: DateTime<Utc>,
}

impl EvaluationContext {
    /// A minimal context for `user_id`, timestamped now.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: None,
            server_name: None,
            request_id: None,
            remote_addr: None,
            attributes: HashMap::new(),
            headers: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    fn lookup(&self, attribute: &str) -> Option<Value> {
        match attribute {
            "user_id" => Some(Value::String(self.user_id.clone())),
            "tenant_id" => self.tenant_id.clone().map(Value::String),
            "server_name" => self.server_name.clone().map(Value::String),
            _ => self.attributes.get(attribute).cloned(),
        }
    }
}

/// Outcome of evaluating a flag against a context.
#[derive(Debug, Clone, Serialize)]
pub struct FlagValue {
    /// Flag name.
    pub name: String,
    /// Flag kind.
    pub flag_type: FlagType,
    /// Whether the resolved value is considered "on" (truthy default
    /// unless the resolved value is itself a boolean).
    pub enabled: bool,
    /// Resolved value.
    pub value: Value,
    /// Selected variant name, for variant flags.
    pub variant: Option<String>,
    /// Why this value was chosen (e.g. `"rule_match:beta-users"`).
    pub reason: String,
    /// Name of the rule that matched, if any.
    pub rule_matched: Option<String>,
    /// When evaluation completed.
    pub evaluated_at: DateTime<Utc>,
}

/// Status of an A/B experiment riding on a flag (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Created but not yet started.
    Draft,
    /// Actively serving traffic.
    Running,
    /// Temporarily halted.
    Paused,
    /// Finished; results finalized.
    Completed,
}

/// An experiment layered on top of a flag's variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    /// Unique experiment id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Flag this experiment rides on; must already exist.
    pub flag: String,
    /// Current lifecycle state.
    pub status: ExperimentStatus,
    /// Variant weights, summing to 100.
    pub variants: Vec<Variant>,
    /// Percentage of traffic included in the experiment at all.
    pub traffic_allocation: u32,
    /// Optional audience filter, same shape as a rule's conditions.
    pub audience: Option<Vec<Condition>>,
    /// When the experiment started (or will start).
    pub start_time: DateTime<Utc>,
    /// When the experiment ended, if completed.
    pub end_time: Option<DateTime<Utc>>,
    /// Planned duration, if set instead of an explicit end time.
    pub duration: Option<chrono::Duration>,
    /// Final results snapshot, populated on completion.
    pub results: Option<Value>,
}

/// Global settings shared by the flag manager (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagGlobalSettings {
    /// Default `enabled` for flags absent from configuration.
    pub default_enabled: bool,
    /// Cache TTL, default 5 minutes.
    pub default_cache_ttl: std::time::Duration,
    /// Per-evaluation deadline, default 2 seconds.
    pub evaluation_timeout: std::time::Duration,
    /// Failsafe behavior when the circuit breaker is open.
    pub failure_mode: FailureMode,
    /// Whether the circuit breaker is active at all.
    pub circuit_breaker_enabled: bool,
}

impl Default for FlagGlobalSettings {
    fn default() -> Self {
        Self {
            default_enabled: false,
            default_cache_ttl: std::time::Duration::from_secs(300),
            evaluation_timeout: std::time::Duration::from_secs(2),
            failure_mode: FailureMode::FailClosed,
            circuit_breaker_enabled: true,
        }
    }
}

/// Failsafe direction when the circuit breaker is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Evaluate as disabled.
    FailClosed,
    /// Evaluate as enabled.
    FailOpen,
}

/// A complete, versioned flag configuration, as produced by any loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagConfiguration {
    /// Configuration version, bumped on reload.
    pub version: u64,
    /// Global settings.
    pub global_settings: FlagGlobalSettings,
    /// All flags, keyed by name.
    pub flags: HashMap<String, FlagDefinition>,
    /// Named canary/targeting groups, keyed by group name.
    pub groups: HashMap<String, Vec<String>>,
    /// Active experiments, keyed by id.
    pub experiments: HashMap<String, Experiment>,
}

impl Default for FlagConfiguration {
    fn default() -> Self {
        Self {
            version: 0,
            global_settings: FlagGlobalSettings::default(),
            flags: HashMap::new(),
            groups: HashMap::new(),
            experiments: HashMap::new(),
        }
    }
}
