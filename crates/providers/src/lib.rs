//! Upstream collaborators for parley.
//!
//! - [`OpenAiCompatProvider`] implements `parley_core::Provider`
//! - [`UpstreamInvoker`] wraps a provider with timeout, retry, and classification
//! - [`search`] holds the `parley_core::SearchProvider` backends
//! - [`ScriptedProvider`] is the injectable fake upstream

pub mod invoker;
pub mod openai_compat;
pub mod scripted;
pub mod search;
pub mod token;

pub use invoker::{Classification, Invocation, InvocationFailure, RetryPolicy, UpstreamInvoker, classify};
pub use openai_compat::OpenAiCompatProvider;
pub use scripted::ScriptedProvider;
pub use search::{NoopSearchProvider, SearxngSearchProvider, YouTubeSearchProvider};

use parley_config::{AppConfig, WebSearchBackend};
use parley_core::provider::Provider;
use parley_core::search::SearchProvider;
use std::sync::Arc;

/// Build the shared upstream provider from configuration.
///
/// A missing API key still yields a provider; the upstream will answer 401,
/// which classifies as `auth_failed`.
pub fn build_from_config(config: &AppConfig) -> Arc<dyn Provider> {
    if !config.has_api_key() {
        tracing::warn!("No API key configured; upstream calls will fail authentication");
    }
    Arc::new(OpenAiCompatProvider::new(
        "openai",
        config.api_url.clone(),
        config.api_key.clone().unwrap_or_default(),
    ))
}

/// The search providers used by the search-backed operations.
pub struct SearchProviders {
    pub web: Arc<dyn SearchProvider>,
    pub video: Arc<dyn SearchProvider>,
}

/// Build the web and video search providers from configuration.
pub fn build_search_from_config(config: &AppConfig) -> SearchProviders {
    let web: Arc<dyn SearchProvider> = match (config.search.web_backend, &config.search.searxng_url) {
        (WebSearchBackend::Searxng, Some(url)) => Arc::new(SearxngSearchProvider::new(url.clone())),
        _ => Arc::new(NoopSearchProvider),
    };
    let video: Arc<dyn SearchProvider> = match &config.search.youtube_api_key {
        Some(key) if !key.is_empty() => Arc::new(YouTubeSearchProvider::new(key.clone())),
        _ => Arc::new(NoopSearchProvider),
    };
    SearchProviders { web, video }
}
