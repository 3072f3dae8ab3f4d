//! Error types for the parley domain.
//!
//! Uses `thiserror` for ergonomic error definitions. [`Error`] is the
//! classified taxonomy every facade operation surfaces; the bounded-context
//! errors below it are the raw signals from each collaborator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::ConversationId;

/// The top-level error type for all parley operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Ownership / lookup ---
    #[error("Conversation {conversation_id} is not owned by the requesting user")]
    Forbidden { conversation_id: ConversationId },

    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    // --- Admission ---
    #[error("Rate limited ({reason}), retry after {retry_after_secs}s")]
    RateLimited {
        reason: RejectionReason,
        retry_after_secs: u64,
    },

    // --- Dispatch ---
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // --- Upstream ---
    #[error("Upstream unavailable after {attempts} attempt(s): {message}")]
    UpstreamTransient { attempts: u32, message: String },

    #[error("Upstream rejected the request ({kind}): {message}")]
    UpstreamPermanent { kind: FailureKind, message: String },

    // --- Persistence ---
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// The model produced content but it could not be saved.
    #[error("Content generated for conversation {conversation_id} but not saved: {reason}")]
    PartialSuccess {
        conversation_id: ConversationId,
        content: String,
        tokens_used: u32,
        model: String,
        reason: String,
    },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Forbidden { .. } => "forbidden",
            Self::ConversationNotFound(_) => "conversation_not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::UnknownOperation(_) => "unknown_operation",
            Self::InvalidInput(_) => "invalid_input",
            Self::UpstreamTransient { .. } => "upstream_transient",
            Self::UpstreamPermanent { .. } => "upstream_permanent",
            Self::Persistence(_) => "persistence_failure",
            Self::PartialSuccess { .. } => "partial_success",
            Self::Config { .. } => "config_error",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether a fresh request may succeed later. Never means "retry in place".
    pub fn is_retryable_later(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::UpstreamTransient { .. } | Self::Persistence(_)
        )
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Why the usage limiter refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    RequestRateExceeded,
    TokenBudgetExceeded,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestRateExceeded => "request_rate_exceeded",
            Self::TokenBudgetExceeded => "token_budget_exceeded",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified outcome of a failed upstream invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransientExhausted,
    InvalidRequest,
    AuthFailed,
    PolicyRejected,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientExhausted => "transient_exhausted",
            Self::InvalidRequest => "invalid_request",
            Self::AuthFailed => "auth_failed",
            Self::PolicyRejected => "policy_rejected",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Bounded context errors ---

/// Raw failure signal from a model provider, before classification.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rejected by content policy: {0}")]
    ContentPolicy(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("Search provider not configured: {0}")]
    NotConfigured(String),

    #[error("Search request failed: {0}")]
    Request(String),

    #[error("Unparseable search response: {0}")]
    Parse(String),
}
