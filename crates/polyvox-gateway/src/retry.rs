//! Retry wrapper
//!
//! `execute` wraps any adapter operation with jittered exponential backoff
//! and the provider's circuit breaker. Adapters never retry internally;
//! this is the only retry loop in the system.
//!
//! Only a request's final outcome reaches the breaker: a failure that is
//! about to be retried counts as neither success nor failure.

use crate::{
    circuit_breaker::{BreakerConfig, CircuitBreaker},
    stats::RetryStats,
};
use polyvox_core::{
    cancel::CancelToken,
    error::{Error, ErrorKind, Result},
    types::ProviderKind,
};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Total jitter band; each delay is perturbed by a factor drawn
    /// uniformly from `[-jitter_factor/2, +jitter_factor/2]`
    pub jitter_factor: f64,
    /// Extra multiplier applied to rate-limit delays. 1.0 keeps the
    /// documented backoff schedule; raise it to back off harder on 429s.
    pub rate_limit_delay_factor: f64,
    pub retry_on_timeout: bool,
    pub retry_on_rate_limit: bool,
    pub retry_on_server_error: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.25,
            rate_limit_delay_factor: 1.0,
            retry_on_timeout: true,
            retry_on_rate_limit: true,
            retry_on_server_error: true,
        }
    }
}

impl RetryPolicy {
    /// Per-provider default policies. A few services earn overrides:
    /// Anthropic tolerates longer waits, OpenAI gets an extra attempt,
    /// Gemini's free tier throttles hard enough to warrant a slower start.
    pub fn for_provider(kind: ProviderKind) -> Self {
        let mut policy = Self::default();
        match kind {
            ProviderKind::Anthropic => {
                policy.max_delay = Duration::from_secs(120);
            }
            ProviderKind::OpenAi => {
                policy.max_retries = 4;
            }
            ProviderKind::Gemini => {
                policy.base_delay = Duration::from_secs(2);
            }
            _ => {}
        }
        policy
    }

    /// Whether this policy retries the given failure class.
    pub fn should_retry(&self, kind: ErrorKind) -> bool {
        match kind {
            ErrorKind::Timeout => self.retry_on_timeout,
            ErrorKind::RateLimit => self.retry_on_rate_limit,
            ErrorKind::Overloaded => self.retry_on_server_error,
            ErrorKind::Network => true,
            _ => false,
        }
    }

    /// Backoff before retry number `attempt` (0-based), jittered.
    pub fn delay_for(&self, attempt: u32, kind: ErrorKind) -> Duration {
        let mut raw = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        if kind == ErrorKind::RateLimit {
            raw *= self.rate_limit_delay_factor;
        }
        raw = raw.min(self.max_delay.as_secs_f64());

        let half_band = self.jitter_factor / 2.0;
        let perturbation = if half_band > 0.0 {
            rand::rng().random_range(-half_band..=half_band)
        } else {
            0.0
        };
        Duration::from_secs_f64((raw * (1.0 + perturbation)).max(0.0))
    }
}

struct ProviderState {
    breaker: CircuitBreaker,
    stats: RetryStats,
}

impl ProviderState {
    fn new(breaker_config: BreakerConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(breaker_config),
            stats: RetryStats::default(),
        }
    }
}

/// Per-provider retry policies, breakers and statistics behind one shared
/// mutex. The lock is held only for bookkeeping, never across an await.
pub struct RetryManager {
    policies: HashMap<ProviderKind, RetryPolicy>,
    breaker_config: BreakerConfig,
    state: Mutex<HashMap<ProviderKind, ProviderState>>,
    cancel: CancelToken,
}

impl RetryManager {
    pub fn new() -> Self {
        Self::with_breaker_config(BreakerConfig::default())
    }

    pub fn with_breaker_config(breaker_config: BreakerConfig) -> Self {
        let policies = ProviderKind::ALL
            .iter()
            .map(|&kind| (kind, RetryPolicy::for_provider(kind)))
            .collect();
        Self {
            policies,
            breaker_config,
            state: Mutex::new(HashMap::new()),
            cancel: CancelToken::new(),
        }
    }

    pub fn set_policy(&mut self, kind: ProviderKind, policy: RetryPolicy) {
        self.policies.insert(kind, policy);
    }

    pub fn policy(&self, kind: ProviderKind) -> &RetryPolicy {
        &self.policies[&kind]
    }

    /// Token that interrupts backoff sleeps when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn stats(&self, kind: ProviderKind) -> RetryStats {
        let mut state = self.state.lock().unwrap();
        state
            .entry(kind)
            .or_insert_with(|| ProviderState::new(self.breaker_config.clone()))
            .stats
            .clone()
    }

    pub fn breaker_state(&self, kind: ProviderKind) -> crate::circuit_breaker::CircuitState {
        let mut state = self.state.lock().unwrap();
        state
            .entry(kind)
            .or_insert_with(|| ProviderState::new(self.breaker_config.clone()))
            .breaker
            .state()
    }

    fn with_state<T>(&self, kind: ProviderKind, f: impl FnOnce(&mut ProviderState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .entry(kind)
            .or_insert_with(|| ProviderState::new(self.breaker_config.clone()));
        f(entry)
    }

    /// Run `op` under this provider's retry policy and circuit breaker.
    pub async fn execute<T, F, Fut>(&self, kind: ProviderKind, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = self.policies[&kind].clone();

        let allowed = self.with_state(kind, |s| {
            if s.breaker.allow_request() {
                s.stats.total_requests += 1;
                true
            } else {
                s.stats.circuit_rejections += 1;
                false
            }
        });
        if !allowed {
            return Err(Error::new(
                ErrorKind::RateLimit,
                format!("{kind} circuit is open, request rejected"),
            ));
        }

        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => {
                    self.with_state(kind, |s| {
                        s.breaker.record_success();
                        s.stats.successful_requests += 1;
                        if attempt > 0 {
                            s.stats.retried_requests += 1;
                        }
                    });
                    return Ok(value);
                }
                Err(error) => {
                    let retryable = policy.should_retry(error.kind);
                    if !retryable || attempt >= policy.max_retries {
                        if !retryable {
                            debug!(provider = %kind, kind = error.kind.as_str(), "error is not retryable");
                        } else {
                            warn!(provider = %kind, attempts = attempt + 1, "retries exhausted");
                        }
                        self.with_state(kind, |s| {
                            s.breaker.record_failure();
                            s.stats.failed_requests += 1;
                        });
                        return Err(error);
                    }

                    let delay = policy.delay_for(attempt, error.kind);
                    debug!(
                        provider = %kind,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after backoff"
                    );
                    self.with_state(kind, |s| {
                        s.stats.total_retries += 1;
                        s.stats.accumulated_delay += delay;
                    });
                    if !self.cancel.sleep(delay).await {
                        return Err(Error::new(ErrorKind::Timeout, "retry cancelled"));
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new()
    }
}
