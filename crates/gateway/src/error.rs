//! Mapping from the facade's error taxonomy to HTTP responses.
//!
//! Every error body has the shape `{ "error": { "code", "message", ... } }`.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use parley_core::Error;
use serde::Serialize;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    /// Generated content that could not be persisted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved: Option<bool>,
}

impl ErrorBody {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after_secs: None,
            reason: None,
            attempts: None,
            content: None,
            conversation_id: None,
            tokens_used: None,
            saved: None,
        }
    }
}

/// An error leaving the HTTP surface.
#[derive(Debug)]
pub enum ApiError {
    /// No identity was supplied by the fronting identity provider.
    Unauthenticated,

    /// A query parameter held a value the API does not accept.
    BadRequest(String),

    /// The body or query string was rejected before reaching a handler.
    Malformed { status: StatusCode, message: String },

    Core(Error),
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::Malformed {
            status: e.status(),
            message: e.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::Malformed {
            status: e.status(),
            message: e.body_text(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self::Core(e)
    }
}

/// HTTP status for a facade error.
pub fn status_for(e: &Error) -> StatusCode {
    match e {
        Error::Forbidden { .. } => StatusCode::FORBIDDEN,
        Error::ConversationNotFound(_) => StatusCode::NOT_FOUND,
        Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::UnknownOperation(_) | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::UpstreamTransient { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Error::UpstreamPermanent { .. } => StatusCode::BAD_GATEWAY,
        Error::Persistence(_)
        | Error::PartialSuccess { .. }
        | Error::Config { .. }
        | Error::Serialization(_)
        | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let e = match self {
            Self::Unauthenticated => {
                let body = ErrorBody::new("unauthenticated", "missing X-User-Id header");
                return (StatusCode::UNAUTHORIZED, Json(ErrorResponse { error: body })).into_response();
            }
            Self::BadRequest(message) => {
                let body = ErrorBody::new("bad_request", message);
                return (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: body })).into_response();
            }
            Self::Malformed { status, message } => {
                let body = ErrorBody::new("malformed_request", message);
                return (status, Json(ErrorResponse { error: body })).into_response();
            }
            Self::Core(e) => e,
        };

        let status = status_for(&e);
        let mut body = ErrorBody::new(e.code(), e.to_string());
        let mut retry_after = None;

        match &e {
            Error::RateLimited {
                reason,
                retry_after_secs,
            } => {
                body.reason = Some(reason.to_string());
                body.retry_after_secs = Some(*retry_after_secs);
                retry_after = Some(*retry_after_secs);
            }
            Error::UpstreamTransient { attempts, .. } => {
                body.attempts = Some(*attempts);
            }
            Error::UpstreamPermanent { kind, .. } => {
                body.reason = Some(kind.to_string());
            }
            Error::PartialSuccess {
                conversation_id,
                content,
                tokens_used,
                reason,
                ..
            } => {
                body.message = format!("response generated but not saved: {reason}");
                body.content = Some(content.clone());
                body.conversation_id = Some(conversation_id.to_string());
                body.tokens_used = Some(*tokens_used);
                body.saved = Some(false);
            }
            _ => {}
        }

        if status.is_server_error() {
            error!(code = e.code(), error = %e, "Request failed");
        }

        let mut response = (status, Json(ErrorResponse { error: body })).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use parley_core::error::{FailureKind, RejectionReason, StoreError};
    use parley_core::message::ConversationId;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn statuses_follow_the_taxonomy() {
        let id = ConversationId::from("c1");
        let cases = [
            (Error::Forbidden { conversation_id: id.clone() }, 403),
            (Error::ConversationNotFound(id.clone()), 404),
            (
                Error::RateLimited {
                    reason: RejectionReason::RequestRateExceeded,
                    retry_after_secs: 5,
                },
                429,
            ),
            (Error::UnknownOperation("x".into()), 400),
            (Error::InvalidInput("x".into()), 400),
            (
                Error::UpstreamTransient {
                    attempts: 3,
                    message: "timeout".into(),
                },
                503,
            ),
            (
                Error::UpstreamPermanent {
                    kind: FailureKind::AuthFailed,
                    message: "401".into(),
                },
                502,
            ),
            (Error::Persistence(StoreError::Storage("disk".into())), 500),
            (Error::Internal("x".into()), 500),
        ];
        for (e, expected) in cases {
            assert_eq!(status_for(&e).as_u16(), expected, "{}", e.code());
        }
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after() {
        let response = ApiError::from(Error::RateLimited {
            reason: RejectionReason::TokenBudgetExceeded,
            retry_after_secs: 42,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "rate_limited");
        assert_eq!(json["error"]["reason"], "token_budget_exceeded");
        assert_eq!(json["error"]["retry_after_secs"], 42);
    }

    #[tokio::test]
    async fn partial_success_carries_content() {
        let response = ApiError::from(Error::PartialSuccess {
            conversation_id: ConversationId::from("c9"),
            content: "the answer".into(),
            tokens_used: 12,
            model: "gpt-4o-mini".into(),
            reason: "disk full".into(),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "partial_success");
        assert_eq!(json["error"]["content"], "the answer");
        assert_eq!(json["error"]["conversation_id"], "c9");
        assert_eq!(json["error"]["saved"], false);
    }

    #[tokio::test]
    async fn unauthenticated_is_401() {
        let response = ApiError::Unauthenticated.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "unauthenticated");
        assert!(json["error"].get("saved").is_none());
    }
}
