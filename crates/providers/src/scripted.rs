//! Scripted provider: replays a queue of canned outcomes.
//!
//! Used as the injectable fake upstream in tests and for offline runs
//! (`parley ask --offline`). Records every request it receives.

use async_trait::async_trait;
use parley_core::error::ProviderError;
use parley_core::message::Message;
use parley_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::token;

type Outcome = std::result::Result<ProviderResponse, ProviderError>;

pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Outcome>>,
    /// Returned once the script runs dry; `None` means fail with `NotConfigured`.
    fallback: Option<ProviderResponse>,
    echo: bool,
    latency: Duration,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Outcome>) -> Self {
        Self {
            name: "scripted".into(),
            script: Mutex::new(script.into()),
            fallback: None,
            echo: false,
            latency: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that answers every request with the same reply.
    pub fn always(response: ProviderResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Self::new(Vec::new())
        }
    }

    /// A provider that echoes the last message back.
    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::new(Vec::new())
        }
        .named("echo")
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Simulated network latency applied before every outcome.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue another outcome.
    pub fn push(&self, outcome: Outcome) {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).push_back(outcome);
    }

    /// Number of `complete` calls received so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).last().cloned()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).push(request.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let next = self.script.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        if let Some(outcome) = next {
            return outcome;
        }
        if self.echo {
            let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            return Ok(ProviderResponse {
                usage: Some(token::estimate_usage(&request.messages, &last)),
                message: Message::assistant(last),
                model: request.model,
                finish_reason: Some("stop".into()),
                metadata: serde_json::Map::new(),
            });
        }
        match &self.fallback {
            Some(response) => Ok(response.clone()),
            None => Err(ProviderError::NotConfigured("scripted provider has no more responses".into())),
        }
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(vec!["scripted-model".into()])
    }
}

/// Build a reply with the given content and total token count.
pub fn reply(content: &str, total_tokens: u32) -> ProviderResponse {
    let prompt_tokens = total_tokens / 2;
    ProviderResponse {
        message: Message::assistant(content),
        usage: Some(Usage::new(prompt_tokens, total_tokens - prompt_tokens)),
        model: "scripted-model".into(),
        finish_reason: Some("stop".into()),
        metadata: serde_json::Map::new(),
    }
}
