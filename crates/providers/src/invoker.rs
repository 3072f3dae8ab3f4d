//! Upstream invoker: one logical model call with per-attempt timeout,
//! bounded retry with exponential backoff and jitter, and failure
//! classification.
//!
//! Only transient failures are retried. The loop is bounded both by the
//! attempt cap and by an overall deadline covering attempts and sleeps.

use parley_config::AppConfig;
use parley_core::error::{FailureKind, ProviderError};
use parley_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::token;

/// How a raw provider failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Retrying the same input may succeed; the provider may suggest a wait.
    Transient { retry_after: Option<Duration> },
    /// Retrying will not help.
    Permanent(FailureKind),
}

/// Classify a provider failure. Pure: depends only on the signal.
pub fn classify(error: &ProviderError) -> Classification {
    match error {
        ProviderError::RateLimited { retry_after_secs } => Classification::Transient {
            retry_after: Some(Duration::from_secs(*retry_after_secs)),
        },
        ProviderError::Timeout(_) | ProviderError::Network(_) => Classification::Transient { retry_after: None },
        ProviderError::ApiError { status_code, .. } => match status_code {
            408 | 425 | 429 | 500..=599 => Classification::Transient { retry_after: None },
            400..=499 => Classification::Permanent(FailureKind::InvalidRequest),
            _ => Classification::Permanent(FailureKind::Unknown),
        },
        ProviderError::AuthenticationFailed(_) => Classification::Permanent(FailureKind::AuthFailed),
        ProviderError::InvalidRequest(_) | ProviderError::ModelNotFound(_) => {
            Classification::Permanent(FailureKind::InvalidRequest)
        }
        ProviderError::ContentPolicy(_) => Classification::Permanent(FailureKind::PolicyRejected),
        ProviderError::MalformedResponse(_) | ProviderError::NotConfigured(_) => {
            Classification::Permanent(FailureKind::Unknown)
        }
    }
}

/// Retry/backoff policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the uniform random jitter added to each delay
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &parley_config::RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Policy without jitter, for deterministic schedules.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = Duration::ZERO;
        self
    }

    /// Delay after failed attempt number `attempt` (1-based), before jitter:
    /// `base × 2^(attempt-1)`, raised to the provider's retry-after hint,
    /// capped at `max_delay`.
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let exponential = self.base_delay.saturating_mul(1u32 << exponent);
        exponential.max(retry_after.unwrap_or_default()).min(self.max_delay)
    }

    fn sample_jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&parley_config::RetryConfig::default())
    }
}

/// A successful invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub response: ProviderResponse,
    /// Provider-reported usage, or an estimate when the provider sent none
    pub usage: Usage,
    pub usage_estimated: bool,
    pub attempts: u32,
}

/// A classified, final failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationFailure {
    pub kind: FailureKind,
    pub attempts: u32,
    pub message: String,
}

impl std::fmt::Display for InvocationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} after {} attempt(s): {}", self.kind, self.attempts, self.message)
    }
}

impl std::error::Error for InvocationFailure {}

impl From<InvocationFailure> for parley_core::Error {
    fn from(failure: InvocationFailure) -> Self {
        match failure.kind {
            FailureKind::TransientExhausted => parley_core::Error::UpstreamTransient {
                attempts: failure.attempts,
                message: failure.message,
            },
            kind => parley_core::Error::UpstreamPermanent {
                kind,
                message: failure.message,
            },
        }
    }
}

/// Wraps the shared provider handle with timeout and retry behavior.
pub struct UpstreamInvoker {
    provider: Arc<dyn Provider>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    deadline: Duration,
}

impl UpstreamInvoker {
    pub fn new(provider: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self {
            provider,
            policy,
            attempt_timeout: Duration::from_secs(30),
            deadline: Duration::from_secs(120),
        }
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &AppConfig) -> Self {
        Self::new(provider, RetryPolicy::from_config(&config.retry))
            .with_timeout(config.upstream.timeout())
            .with_deadline(config.upstream.deadline())
    }

    /// Timeout of a single attempt.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Hard bound across all attempts and backoff sleeps.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run the call. Never exceeds `max_attempts` provider calls.
    pub async fn invoke(&self, request: ProviderRequest) -> Result<Invocation, InvocationFailure> {
        let provider_name = self.provider.name().to_string();
        let deadline_at = Instant::now() + self.deadline;
        let mut attempt: u32 = 0;

        loop {
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(provider = %provider_name, attempts = attempt, "Upstream deadline elapsed");
                return Err(InvocationFailure {
                    kind: FailureKind::TransientExhausted,
                    attempts: attempt,
                    message: format!("deadline of {}s elapsed", self.deadline.as_secs()),
                });
            }

            attempt += 1;
            let per_attempt = self.attempt_timeout.min(remaining);
            debug!(provider = %provider_name, attempt, model = %request.model, "Invoking upstream");

            let outcome = match tokio::time::timeout(per_attempt, self.provider.complete(request.clone())).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "attempt timed out after {}ms",
                    per_attempt.as_millis()
                ))),
            };

            let error = match outcome {
                Ok(response) => return Ok(self.finish(response, &request, attempt)),
                Err(e) => e,
            };

            let retry_after = match classify(&error) {
                Classification::Permanent(kind) => {
                    warn!(provider = %provider_name, attempt, kind = %kind, error = %error, "Permanent upstream failure");
                    return Err(InvocationFailure {
                        kind,
                        attempts: attempt,
                        message: error.to_string(),
                    });
                }
                Classification::Transient { retry_after } => retry_after,
            };

            if attempt >= self.policy.max_attempts {
                warn!(provider = %provider_name, attempts = attempt, error = %error, "Upstream retries exhausted");
                return Err(InvocationFailure {
                    kind: FailureKind::TransientExhausted,
                    attempts: attempt,
                    message: error.to_string(),
                });
            }

            let delay = self.policy.backoff(attempt, retry_after) + self.policy.sample_jitter();
            if Instant::now() + delay >= deadline_at {
                warn!(
                    provider = %provider_name,
                    attempts = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Next retry would pass the upstream deadline"
                );
                return Err(InvocationFailure {
                    kind: FailureKind::TransientExhausted,
                    attempts: attempt,
                    message: error.to_string(),
                });
            }

            warn!(
                provider = %provider_name,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient upstream failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn finish(&self, response: ProviderResponse, request: &ProviderRequest, attempts: u32) -> Invocation {
        let (usage, usage_estimated) = match response.usage {
            Some(usage) => (usage, false),
            None => {
                warn!(provider = %self.provider.name(), "Provider returned no usage, estimating");
                (token::estimate_usage(&request.messages, &response.message.content), true)
            }
        };
        if attempts > 1 {
            info!(provider = %self.provider.name(), attempts, "Upstream call succeeded after retry");
        }
        Invocation {
            response,
            usage,
            usage_estimated,
            attempts,
        }
    }
}
