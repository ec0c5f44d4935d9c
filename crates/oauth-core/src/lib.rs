//! # oauth-core
//!
//! OAuth interception, token-lifecycle management, and feature-flag
//! gating for portal-side request flows.
//!
//! ## Architecture
//!
//! - `types` - core data types shared by providers, storage, and the registry
//! - `error` - unified error taxonomy
//! - `call` - per-call cancellation/deadline context
//! - `providers` - per-provider OAuth implementations (GitHub, Google, Microsoft)
//! - `store` - tiered, encrypted token storage (KeyVault -> local secrets dir -> env)
//! - `registry` - server OAuth configuration registry
//! - `interceptor` - the per-request resolve/refresh/send/retry state machine
//! - `metrics` - request, refresh, and flag-evaluation counters
//! - `audit` - structured audit trail for auth decisions
//! - `flags` - feature-flag definitions, the pure evaluator, and the caching/circuit-breaking manager
//! - `config` - layered application configuration
//!
//! ## Feature Flags
//!
//! - `default` - core functionality, no optional integrations
//! - `metrics` - emit counters to an external `metrics` recorder in addition to the in-process snapshot

pub mod audit;
pub mod call;
pub mod config;
pub mod error;
pub mod flags;
pub mod interceptor;
pub mod metrics;
pub mod providers;
pub mod registry;
pub mod store;
pub mod types;

#[doc(inline)]
pub use audit::{AuditEvent, AuditLogger, LifecycleEvent};
#[doc(inline)]
pub use call::CallContext;
#[doc(inline)]
pub use config::{AppConfig, AppConfigLoader, StorageSettings};
#[doc(inline)]
pub use error::{OAuthError, OAuthResult, ValidationError};
#[doc(inline)]
pub use flags::engine as flag_engine;
#[doc(inline)]
pub use flags::manager::{ConfigLoader as FlagConfigLoader, FlagEvent, FlagEventHandler, FlagManager};
#[doc(inline)]
pub use flags::{EvaluationContext, FlagConfiguration, FlagDefinition, FlagValue};
#[doc(inline)]
pub use interceptor::{AuthRequest, AuthResponse, InterceptorSettings, OAuthInterceptor};
#[doc(inline)]
pub use metrics::{MetricsCollector, MetricsSnapshot};
#[doc(inline)]
pub use providers::{Provider, ProviderRegistry, TokenResponse, UserInfo};
#[doc(inline)]
pub use registry::ServerConfigRegistry;
#[doc(inline)]
pub use store::{EncryptionService, TokenStore};
#[doc(inline)]
pub use types::{ProviderType, ServerConfig, StorageTier, TokenData, TokenKey};
