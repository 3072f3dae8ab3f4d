//! Operation request/result types: what a caller hands the facade and what it
//! gets back. Both are transient and never persisted as such.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, UserId};
use crate::provider::Usage;

/// Operation-specific input. Strategies read the fields they need and
/// validate their own preconditions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationInput {
    /// The user's text (question, query, instruction)
    #[serde(default)]
    pub text: String,

    /// Image reference for image analysis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    /// Free-form strategy attributes (e.g. `code`, `language`, `device_type`)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl OperationInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// A string attribute, if present and non-empty.
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Model parameters at one precedence layer. `None` defers to the next layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelParameters {
    pub fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            model: None,
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
        }
    }

    /// Layer `higher` on top of `self`; any field set in `higher` wins.
    pub fn overlay(&self, higher: &ModelParameters) -> ModelParameters {
        ModelParameters {
            model: higher.model.clone().or_else(|| self.model.clone()),
            temperature: higher.temperature.or(self.temperature),
            max_tokens: higher.max_tokens.or(self.max_tokens),
        }
    }

    /// Fill remaining gaps and produce concrete parameters.
    pub fn resolve(&self, default_model: &str) -> ResolvedParameters {
        ResolvedParameters {
            model: self.model.clone().unwrap_or_else(|| default_model.to_string()),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        }
    }
}

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Fully resolved parameters sent upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedParameters {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A request entering the orchestration facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Authenticated caller
    pub user_id: UserId,

    /// Registered operation name (exact, case-sensitive)
    pub operation: String,

    #[serde(default)]
    pub input: OperationInput,

    /// Target conversation; `None` starts a new one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,

    /// Per-request parameter overrides
    #[serde(default)]
    pub overrides: ModelParameters,

    /// Explicit title for a new conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl OperationRequest {
    pub fn new(user_id: UserId, operation: impl Into<String>, input: OperationInput) -> Self {
        Self {
            user_id,
            operation: operation.into(),
            input,
            conversation_id: None,
            overrides: ModelParameters::default(),
            title: None,
        }
    }

    pub fn in_conversation(mut self, id: ConversationId) -> Self {
        self.conversation_id = Some(id);
        self
    }

    pub fn with_overrides(mut self, overrides: ModelParameters) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// The structured response of a successful operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub conversation_id: ConversationId,
    pub content: String,

    /// Authoritative total tokens of the upstream call
    pub tokens_used: u32,
    pub usage: Usage,

    /// Model identifier that actually answered
    pub model: String,
    pub operation: String,
    pub timestamp: DateTime<Utc>,

    /// Upstream attempts it took (1 when the first try succeeded)
    pub attempts: u32,

    pub user_message_id: String,
    pub assistant_message_id: String,

    /// Operation-specific extras (citations, video link, degraded flags)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_higher_layer() {
        let defaults = ModelParameters::new(0.7, 1000);
        let config = ModelParameters {
            model: Some("gpt-4o".into()),
            temperature: Some(0.3),
            max_tokens: None,
        };
        let request = ModelParameters {
            model: None,
            temperature: None,
            max_tokens: Some(50),
        };

        let merged = defaults.overlay(&config).overlay(&request);
        assert_eq!(merged.model.as_deref(), Some("gpt-4o"));
        assert_eq!(merged.temperature, Some(0.3));
        assert_eq!(merged.max_tokens, Some(50));
    }

    #[test]
    fn resolve_falls_back_to_default_model() {
        let resolved = ModelParameters::new(0.2, 1500).resolve("gpt-4o-mini");
        assert_eq!(resolved.model, "gpt-4o-mini");
        assert!((resolved.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(resolved.max_tokens, 1500);
    }

    #[test]
    fn attribute_str_skips_blank_values() {
        let input = OperationInput::text("q")
            .with_attribute("language", "rust")
            .with_attribute("code", "   ");
        assert_eq!(input.attribute_str("language"), Some("rust"));
        assert_eq!(input.attribute_str("code"), None);
        assert_eq!(input.attribute_str("missing"), None);
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let req: OperationRequest =
            serde_json::from_str(r#"{"user_id":"u1","operation":"chat","input":{"text":"hi"}}"#).unwrap();
        assert_eq!(req.user_id, UserId::from("u1"));
        assert!(req.conversation_id.is_none());
        assert_eq!(req.overrides, ModelParameters::default());
    }
}
