use async_trait::async_trait;
use parley_core::error::Error;
use parley_core::message::Message;
use parley_core::operation::{ModelParameters, OperationInput};
use parley_core::search::{SearchProvider, SearchResult};
use parley_core::Result;
use serde_json::json;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Strategy, StrategyPayload, assemble, split_turn};

pub(super) const NAME: &str = "search";

/// Search answers lean on fresh sources, not long history.
const HISTORY_LIMIT: usize = 10;

const SYSTEM_PROMPT: &str = "You are a research assistant. Answer the question using the numbered sources \
provided, cite them inline as [n], and say so plainly when the sources do not cover the question.";

/// Retrieval-augmented answer: search results are formatted into the prompt.
///
/// A failed retrieval degrades to an uncited answer instead of failing the
/// request.
pub struct WebSearchStrategy {
    search: Arc<dyn SearchProvider>,
    max_results: usize,
    system_prompt: String,
}

impl WebSearchStrategy {
    pub fn new(search: Arc<dyn SearchProvider>, max_results: usize) -> Self {
        Self {
            search,
            max_results,
            system_prompt: SYSTEM_PROMPT.into(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        if let Some(prompt) = prompt {
            self.system_prompt = prompt;
        }
        self
    }
}

fn format_prompt(query: &str, results: &[SearchResult], degraded: bool) -> String {
    let mut prompt = format!("Search the web for: {query}");
    if !results.is_empty() {
        prompt.push_str("\n\nSources:");
        for (i, result) in results.iter().enumerate() {
            let _ = write!(prompt, "\n[{}] {}\n    {}\n    {}", i + 1, result.title, result.url, result.snippet);
        }
        prompt.push_str("\n\nSynthesize an answer from these sources and cite them as [n].");
    } else if degraded {
        prompt.push_str("\n\nWeb search is unavailable right now. Answer from general knowledge and say that no sources were checked.");
    } else {
        prompt.push_str("\n\nNo search results were found. Answer from general knowledge and say that no sources were found.");
    }
    prompt
}

#[async_trait]
impl Strategy for WebSearchStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn defaults(&self) -> ModelParameters {
        ModelParameters::new(0.5, 1000)
    }

    fn max_history(&self) -> Option<usize> {
        Some(HISTORY_LIMIT)
    }

    async fn build_payload(&self, context: &[Message], input: &OperationInput) -> Result<StrategyPayload> {
        let query = input.text.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("search requires a non-empty query".into()));
        }

        let (results, degraded) = match self.search.search(query, self.max_results).await {
            Ok(results) => (results, false),
            Err(e) => {
                warn!(backend = self.search.name(), error = %e, "Search retrieval failed; answering uncited");
                (Vec::new(), true)
            }
        };
        debug!(backend = self.search.name(), results = results.len(), "Search retrieval complete");

        let (history, _) = split_turn(context);
        let messages = assemble(
            &self.system_prompt,
            history,
            Message::user(format_prompt(query, &results, degraded)),
        );

        let citations: Vec<serde_json::Value> = results
            .iter()
            .map(|r| json!({ "title": r.title, "url": r.url, "snippet": r.snippet }))
            .collect();

        let mut metadata = serde_json::Map::new();
        metadata.insert("search_backend".into(), json!(self.search.name()));
        metadata.insert("search_degraded".into(), json!(degraded));
        metadata.insert("citations".into(), serde_json::Value::Array(citations));

        Ok(StrategyPayload {
            messages,
            parameters: self.defaults(),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::FixedSearch;
    use parley_core::error::SearchError;
    use parley_core::message::Role;

    fn results() -> Vec<SearchResult> {
        vec![
            SearchResult::new("Fix Wi-Fi drops", "Update the driver", "https://example.com/wifi"),
            SearchResult::new("Router guide", "Change the channel", "https://example.com/router"),
        ]
    }

    #[tokio::test]
    async fn formats_results_and_records_citations() {
        let strategy = WebSearchStrategy::new(Arc::new(FixedSearch { results: Ok(results()) }), 5);
        let context = vec![Message::user("earlier"), Message::assistant("reply"), Message::user("wifi drops")];
        let payload = strategy
            .build_payload(&context, &OperationInput::text("wifi drops"))
            .await
            .unwrap();

        assert_eq!(payload.messages.len(), 4);
        assert_eq!(payload.messages[0].role, Role::System);
        let prompt = &payload.messages[3].content;
        assert!(prompt.starts_with("Search the web for: wifi drops"));
        assert!(prompt.contains("[1] Fix Wi-Fi drops"));
        assert!(prompt.contains("[2] Router guide"));

        assert_eq!(payload.metadata["search_degraded"], false);
        assert_eq!(payload.metadata["citations"].as_array().unwrap().len(), 2);
        assert_eq!(payload.metadata["citations"][0]["url"], "https://example.com/wifi");
        assert_eq!(payload.parameters.temperature, Some(0.5));
    }

    #[tokio::test]
    async fn retrieval_failure_degrades() {
        let strategy = WebSearchStrategy::new(
            Arc::new(FixedSearch {
                results: Err(SearchError::Request("connection refused".into())),
            }),
            5,
        );
        let payload = strategy
            .build_payload(&[Message::user("q")], &OperationInput::text("q"))
            .await
            .unwrap();

        assert_eq!(payload.metadata["search_degraded"], true);
        assert!(payload.metadata["citations"].as_array().unwrap().is_empty());
        assert!(payload.messages.last().unwrap().content.contains("unavailable"));
    }

    #[tokio::test]
    async fn max_results_is_respected() {
        let strategy = WebSearchStrategy::new(Arc::new(FixedSearch { results: Ok(results()) }), 1);
        let payload = strategy
            .build_payload(&[Message::user("q")], &OperationInput::text("q"))
            .await
            .unwrap();
        assert_eq!(payload.metadata["citations"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn history_is_capped() {
        let strategy = WebSearchStrategy::new(Arc::new(FixedSearch { results: Ok(vec![]) }), 5);
        assert_eq!(strategy.max_history(), Some(HISTORY_LIMIT));
    }

    #[tokio::test]
    async fn empty_query_is_invalid() {
        let strategy = WebSearchStrategy::new(Arc::new(FixedSearch { results: Ok(vec![]) }), 5);
        let err = strategy
            .build_payload(&[Message::user("  ")], &OperationInput::text("  "))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
