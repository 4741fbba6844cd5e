//! Polyvox Gateway
//!
//! Wraps the egress adapters with the resilience layer:
//!
//! - [`circuit_breaker`]: per-provider Closed/Open/HalfOpen state machine
//! - [`retry`]: jittered exponential backoff around retryable failures
//! - [`stats`]: per-provider request and retry statistics
//! - [`registry`]: provider handle lifecycle and lookup
//! - [`runtime`]: convenience facade bundling registry, tools and retries

pub mod circuit_breaker;
pub mod registry;
pub mod retry;
pub mod runtime;
pub mod stats;

pub use circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use registry::ProviderRegistry;
pub use retry::{RetryManager, RetryPolicy};
pub use runtime::Runtime;
pub use stats::RetryStats;
