//! Operation strategies.
//!
//! A strategy turns the assembled context plus the operation's input into the
//! messages and model parameters sent upstream. Strategies are looked up by
//! name in a [`StrategyRegistry`]; a new operation is a new registration.

mod chat;
mod code;
mod diagnostic;
mod image;
mod search;
mod video;

pub use chat::ChatStrategy;
pub use code::CodeAssistantStrategy;
pub use diagnostic::DeviceDiagnosticStrategy;
pub use image::ImageAnalysisStrategy;
pub use search::WebSearchStrategy;
pub use video::VideoSearchStrategy;

use async_trait::async_trait;
use parley_config::AppConfig;
use parley_core::Result;
use parley_core::message::{Message, Role};
use parley_core::operation::{ModelParameters, OperationInput};
use parley_providers::SearchProviders;
use std::sync::Arc;

use crate::registry::StrategyRegistry;

/// What a strategy hands back to the facade.
#[derive(Debug, Clone, Default)]
pub struct StrategyPayload {
    /// Messages to send, system prompt first
    pub messages: Vec<Message>,

    /// The strategy's parameter layer; config and request overrides go on top
    pub parameters: ModelParameters,

    /// Recorded on the assistant message and returned with the result
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A named, swappable way of shaping an upstream request.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// The operation name this strategy is registered under.
    fn name(&self) -> &str;

    /// Default temperature and output budget.
    fn defaults(&self) -> ModelParameters;

    /// A tighter history limit than the configured one, if this operation wants it.
    fn max_history(&self) -> Option<usize> {
        None
    }

    /// Build the upstream payload.
    ///
    /// `context` is the pruned history in chronological order; its last
    /// element is the user turn being answered.
    async fn build_payload(&self, context: &[Message], input: &OperationInput) -> Result<StrategyPayload>;
}

/// Build the registry of built-in operations.
///
/// Operations disabled under `[features]` are left out. A configured
/// `system_prompt` replaces the strategy's own.
pub fn default_registry(config: &AppConfig, search: SearchProviders) -> StrategyRegistry {
    let prompt = |name: &str| config.strategies.get(name).and_then(|s| s.system_prompt.clone());
    let max_results = config.search.max_results;
    let mut registry = StrategyRegistry::new();

    registry.register(Arc::new(ChatStrategy::new().with_system_prompt(prompt(chat::NAME))));
    registry.register(Arc::new(
        CodeAssistantStrategy::new().with_system_prompt(prompt(code::NAME)),
    ));
    registry.register(Arc::new(
        DeviceDiagnosticStrategy::new().with_system_prompt(prompt(diagnostic::NAME)),
    ));
    registry.register(Arc::new(
        VideoSearchStrategy::new(search.video, max_results).with_system_prompt(prompt(video::NAME)),
    ));

    if config.features.web_search {
        registry.register(Arc::new(
            WebSearchStrategy::new(search.web, max_results).with_system_prompt(prompt(search::NAME)),
        ));
    }
    if config.features.image_analysis {
        registry.register(Arc::new(
            ImageAnalysisStrategy::new().with_system_prompt(prompt(image::NAME)),
        ));
    }

    registry
}

/// Split the context into prior history and the current user turn.
fn split_turn(context: &[Message]) -> (&[Message], Option<&Message>) {
    match context.split_last() {
        Some((last, history)) if last.role == Role::User => (history, Some(last)),
        _ => (context, None),
    }
}

/// `system` first, then any history, then the turn.
///
/// A conversation's own leading system message is folded into the operation
/// prompt so the upstream sees exactly one system message.
fn assemble(system: &str, history: &[Message], turn: Message) -> Vec<Message> {
    let (system, history) = match history.split_first() {
        Some((first, rest)) if first.role == Role::System => (format!("{system}\n\n{}", first.content), rest),
        _ => (system.to_string(), history),
    };

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system));
    messages.extend(history.iter().cloned());
    messages.push(turn);
    messages
}
