//! The orchestration facade: the single entry point for operations.

use chrono::Utc;
use parley_config::AppConfig;
use parley_core::error::Error;
use parley_core::message::{
    Conversation, ConversationId, ConversationStatus, ConversationUpdate, Message, UserId, derive_title,
};
use parley_core::operation::{ModelParameters, OperationRequest, OperationResult};
use parley_core::provider::{Provider, ProviderRequest};
use parley_core::store::{ConversationQuery, ConversationStore};
use parley_core::Result;
use parley_providers::{SearchProviders, UpstreamInvoker, token};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

use crate::context::ContextBuilder;
use crate::limiter::{Admission, UsageLimiter, UsageSnapshot};
use crate::locks::{ConversationGuard, ConversationLocks};
use crate::registry::StrategyRegistry;
use crate::strategy::{Strategy, StrategyPayload, default_registry};

/// Everything a request needs before the upstream call.
struct Prepared {
    user_message: Message,
    payload: StrategyPayload,
    upstream: ProviderRequest,
}

/// Coordinates admission, context, dispatch, invocation, and persistence.
///
/// Shared behind an `Arc`; every collaborator is handed in explicitly.
pub struct Orchestrator {
    store: Arc<dyn ConversationStore>,
    invoker: UpstreamInvoker,
    limiter: UsageLimiter,
    context: ContextBuilder,
    registry: RwLock<StrategyRegistry>,
    locks: ConversationLocks,
    default_model: String,
    estimated_tokens: u64,
    /// `[strategies.<name>]` parameter layers, keyed by operation
    overrides: HashMap<String, ModelParameters>,
}

impl Orchestrator {
    /// Create a facade with default limits and context size.
    pub fn new(store: Arc<dyn ConversationStore>, invoker: UpstreamInvoker, registry: StrategyRegistry) -> Self {
        let config = AppConfig::default();
        Self {
            store,
            invoker,
            limiter: UsageLimiter::from_config(&config.limits),
            context: ContextBuilder::from_config(&config.context),
            registry: RwLock::new(registry),
            locks: ConversationLocks::new(),
            default_model: config.default_model,
            estimated_tokens: config.limits.estimated_tokens_per_request,
            overrides: HashMap::new(),
        }
    }

    /// Wire everything from configuration around the given collaborators.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        store: Arc<dyn ConversationStore>,
        search: SearchProviders,
    ) -> Self {
        let overrides = config
            .strategies
            .iter()
            .map(|(name, s)| {
                let layer = ModelParameters {
                    model: s.model.clone(),
                    temperature: s.temperature,
                    max_tokens: s.max_tokens,
                };
                (name.clone(), layer)
            })
            .collect();

        Self::new(
            store,
            UpstreamInvoker::from_config(provider, config),
            default_registry(config, search),
        )
        .with_limiter(UsageLimiter::from_config(&config.limits))
        .with_context_builder(ContextBuilder::from_config(&config.context))
        .with_default_model(config.default_model.clone())
        .with_estimated_tokens(config.limits.estimated_tokens_per_request)
        .with_strategy_overrides(overrides)
    }

    pub fn with_limiter(mut self, limiter: UsageLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_context_builder(mut self, context: ContextBuilder) -> Self {
        self.context = context;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Tokens charged at admission, before the real count is known.
    pub fn with_estimated_tokens(mut self, tokens: u64) -> Self {
        self.estimated_tokens = tokens;
        self
    }

    pub fn with_strategy_overrides(mut self, overrides: HashMap<String, ModelParameters>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        self.invoker.provider()
    }

    /// Add or replace an operation at runtime.
    pub fn register_strategy(&self, strategy: Arc<dyn Strategy>) {
        let name = strategy.name().to_string();
        let replaced = self
            .registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .register(strategy);
        info!(operation = %name, replaced = replaced.is_some(), "Registered operation");
    }

    /// Registered operation names, sorted.
    pub fn operations(&self) -> Vec<String> {
        self.registry.read().unwrap_or_else(|e| e.into_inner()).names()
    }

    pub fn usage(&self, user_id: &UserId) -> UsageSnapshot {
        self.limiter.snapshot(user_id)
    }

    /// Run an operation to completion on its own task.
    ///
    /// Dropping the returned future does not cancel the pipeline: an in-flight
    /// upstream call still finishes and its result is persisted.
    pub async fn execute(self: &Arc<Self>, request: OperationRequest) -> Result<OperationResult> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(request).await })
            .await
            .map_err(|e| Error::Internal(format!("operation task failed: {e}")))?
    }

    /// Run an operation on the caller's task.
    pub async fn run(&self, request: OperationRequest) -> Result<OperationResult> {
        let user = request.user_id.clone();
        let operation = request.operation.clone();
        debug!(user = %user, operation = %operation, "Operation received");

        // 1. Resolve the conversation; a new one is only created once the request is viable.
        let (conversation, is_new, _guard) = self.resolve_conversation(&request).await?;
        let conversation_id = conversation.id.clone();

        // 2. Admission.
        let ticket = match self.limiter.admit(&user, self.estimated_tokens) {
            Admission::Admitted(ticket) => ticket,
            Admission::Rejected { reason, retry_after } => {
                let retry_after_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                warn!(user = %user, operation = %operation, reason = %reason, retry_after_secs, "Request rejected by usage limiter");
                return Err(Error::RateLimited {
                    reason,
                    retry_after_secs,
                });
            }
        };

        // 3-5. Context, dispatch, payload.
        let prepared = match self.prepare(&request, &conversation, is_new).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.limiter.release(ticket);
                return Err(e);
            }
        };

        if is_new {
            if let Err(e) = self.store.create_conversation(conversation.clone()).await {
                self.limiter.release(ticket);
                error!(user = %user, conversation = %conversation_id, error = %e, "Failed to create conversation");
                return Err(Error::Persistence(e));
            }
            info!(user = %user, conversation = %conversation_id, "Created conversation");
        }

        // 6. Invoke.
        let model = prepared.upstream.model.clone();
        let invocation = self.invoker.invoke(prepared.upstream).await;

        // 7. Persist.
        match invocation {
            Ok(invocation) => {
                let tokens_used = invocation.usage.total_tokens;
                self.limiter.reconcile(ticket, u64::from(tokens_used));

                let response_model = if invocation.response.model.is_empty() {
                    model
                } else {
                    invocation.response.model.clone()
                };

                let mut metadata = prepared.payload.metadata;
                if invocation.usage_estimated {
                    metadata.insert("usage_estimated".into(), json!(true));
                }

                let mut assistant = Message::assistant(invocation.response.message.content.clone())
                    .with_token_count(tokens_used)
                    .with_metadata("model", json!(response_model))
                    .with_metadata("operation", json!(operation));
                if let Some(reason) = &invocation.response.finish_reason {
                    assistant = assistant.with_metadata("finish_reason", json!(reason));
                }
                assistant.metadata.extend(metadata.clone());

                let user_message = prepared.user_message;
                let user_message_id = user_message.id.clone();
                let assistant_message_id = assistant.id.clone();
                let content = assistant.content.clone();
                let timestamp = assistant.timestamp;
                let mut persisted = 0;
                let mut persisted_tokens = 0;

                for message in [user_message, assistant] {
                    let message_tokens = u64::from(message.token_count.unwrap_or(0));
                    if let Err(e) = self.store.append_message(&conversation_id, message).await {
                        if persisted > 0 {
                            self.touch(&conversation, persisted, persisted_tokens).await;
                        }
                        error!(
                            user = %user,
                            conversation = %conversation_id,
                            tokens = tokens_used,
                            error = %e,
                            "Generated content could not be saved"
                        );
                        return Err(Error::PartialSuccess {
                            conversation_id,
                            content,
                            tokens_used,
                            model: response_model,
                            reason: e.to_string(),
                        });
                    }
                    persisted += 1;
                    persisted_tokens += message_tokens;
                }

                self.touch(&conversation, persisted, persisted_tokens).await;

                info!(
                    user = %user,
                    conversation = %conversation_id,
                    operation = %operation,
                    tokens = tokens_used,
                    attempts = invocation.attempts,
                    "Operation complete"
                );

                Ok(OperationResult {
                    conversation_id,
                    content,
                    tokens_used,
                    usage: invocation.usage,
                    model: response_model,
                    operation,
                    timestamp,
                    attempts: invocation.attempts,
                    user_message_id,
                    assistant_message_id,
                    metadata,
                })
            }
            Err(failure) => {
                self.limiter.reconcile(ticket, 0);
                warn!(
                    user = %user,
                    conversation = %conversation_id,
                    operation = %operation,
                    kind = %failure.kind,
                    attempts = failure.attempts,
                    "Operation failed upstream"
                );

                // The user's turn happened; keep it. If it cannot be kept the
                // caller must hear about the lost turn, not only the upstream failure.
                let user_tokens = u64::from(prepared.user_message.token_count.unwrap_or(0));
                if let Err(e) = self.store.append_message(&conversation_id, prepared.user_message).await {
                    error!(
                        user = %user,
                        conversation = %conversation_id,
                        upstream = %failure.kind,
                        error = %e,
                        "Failed to persist user message after upstream failure"
                    );
                    return Err(Error::Persistence(e));
                }
                self.touch(&conversation, 1, user_tokens).await;

                Err(failure.into())
            }
        }
    }

    async fn resolve_conversation(
        &self,
        request: &OperationRequest,
    ) -> Result<(Conversation, bool, Option<ConversationGuard>)> {
        let Some(id) = &request.conversation_id else {
            let title = request
                .title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| derive_title(&request.input.text));
            return Ok((Conversation::new(request.user_id.clone(), title), true, None));
        };

        let guard = self.locks.acquire(id).await;
        let conversation = self.owned_conversation(&request.user_id, id).await?;
        if conversation.status == ConversationStatus::Archived {
            return Err(Error::InvalidInput(format!("conversation {id} is archived")));
        }
        Ok((conversation, false, Some(guard)))
    }

    /// Load a live conversation and check that `user_id` owns it.
    async fn owned_conversation(&self, user_id: &UserId, id: &ConversationId) -> Result<Conversation> {
        let conversation = self
            .store
            .get_conversation(id)
            .await?
            .filter(|c| c.status != ConversationStatus::Deleted)
            .ok_or_else(|| Error::ConversationNotFound(id.clone()))?;

        if !conversation.is_owned_by(user_id) {
            warn!(user = %user_id, conversation = %id, "Conversation access denied");
            return Err(Error::Forbidden {
                conversation_id: id.clone(),
            });
        }
        Ok(conversation)
    }

    async fn prepare(&self, request: &OperationRequest, conversation: &Conversation, is_new: bool) -> Result<Prepared> {
        let mut history = if is_new {
            Vec::new()
        } else {
            self.store.list_messages(&conversation.id).await?
        };

        let mut user_message = Message::user(request.input.text.clone());
        if let Some(image) = &request.input.image_url {
            user_message = user_message.with_image(image.clone());
        }
        let estimate = token::estimate_message_tokens(&user_message);
        user_message = user_message
            .with_token_count(estimate)
            .with_metadata("operation", json!(request.operation));

        let strategy = self
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .resolve(&request.operation)?;

        let builder = match strategy.max_history() {
            Some(cap) => self.context.capped(cap),
            None => self.context,
        };
        history.push(user_message.clone());
        let context = builder.build(&history);
        debug!(
            conversation = %conversation.id,
            history = history.len(),
            context = context.len(),
            "Context built"
        );

        let payload = strategy.build_payload(&context, &request.input).await?;

        let mut layers = payload.parameters.clone();
        if let Some(configured) = self.overrides.get(&request.operation) {
            layers = layers.overlay(configured);
        }
        let params = layers.overlay(&request.overrides).resolve(&self.default_model);

        let upstream = ProviderRequest {
            model: params.model,
            messages: payload.messages.clone(),
            temperature: params.temperature,
            max_tokens: Some(params.max_tokens),
            stop: Vec::new(),
        };

        Ok(Prepared {
            user_message,
            payload,
            upstream,
        })
    }

    /// Bump the derived counters. Failures are logged: the counters can be
    /// recomputed from the messages.
    async fn touch(&self, conversation: &Conversation, new_messages: u32, new_tokens: u64) {
        let update = ConversationUpdate {
            message_count: Some(conversation.message_count.saturating_add(new_messages)),
            total_tokens: Some(conversation.total_tokens.saturating_add(new_tokens)),
            last_message_at: Some(Utc::now()),
            ..Default::default()
        };
        if let Err(e) = self.store.update_conversation_meta(&conversation.id, update).await {
            warn!(conversation = %conversation.id, error = %e, "Failed to update conversation metadata");
        }
    }

    // --- Conversation management ---

    /// A conversation and its messages, in order.
    pub async fn get_conversation(&self, user_id: &UserId, id: &ConversationId) -> Result<(Conversation, Vec<Message>)> {
        let conversation = self.owned_conversation(user_id, id).await?;
        let messages = self.store.list_messages(id).await?;
        Ok((conversation, messages))
    }

    /// The caller's conversations, most recently active first.
    pub async fn list_conversations(&self, query: ConversationQuery) -> Result<Vec<Conversation>> {
        Ok(self.store.list_conversations(query).await?)
    }

    pub async fn archive_conversation(&self, user_id: &UserId, id: &ConversationId) -> Result<Conversation> {
        let _guard = self.locks.acquire(id).await;
        self.owned_conversation(user_id, id).await?;
        let update = ConversationUpdate {
            status: Some(ConversationStatus::Archived),
            ..Default::default()
        };
        let conversation = self.store.update_conversation_meta(id, update).await?;
        info!(user = %user_id, conversation = %id, "Archived conversation");
        Ok(conversation)
    }

    /// Hard delete; the store cascades the messages.
    pub async fn delete_conversation(&self, user_id: &UserId, id: &ConversationId) -> Result<()> {
        {
            let _guard = self.locks.acquire(id).await;
            self.owned_conversation(user_id, id).await?;
            if !self.store.delete_conversation(id).await? {
                return Err(Error::ConversationNotFound(id.clone()));
            }
        }
        self.locks.remove(id);
        info!(user = %user_id, conversation = %id, "Deleted conversation");
        Ok(())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store.name())
            .field("provider", &self.invoker.provider().name())
            .field("default_model", &self.default_model)
            .field("operations", &self.operations())
            .finish()
    }
}
