use async_trait::async_trait;
use parley_core::Result;
use parley_core::message::Message;
use parley_core::operation::{ModelParameters, OperationInput};
use parley_core::search::{SearchProvider, SearchResult};
use parley_providers::search::youtube_results_url;
use serde_json::json;
use std::fmt::Write;
use std::sync::Arc;
use tracing::warn;

use super::{Strategy, StrategyPayload, assemble, split_turn};

pub(super) const NAME: &str = "video_search";

const SYSTEM_PROMPT: &str = "You are a tech support assistant. Review the tutorial videos found for the \
user's problem and recommend the most helpful ones. Be specific about which videos to watch first.";

const GUIDANCE_PROMPT: &str = "You are a tech support assistant helping users find video tutorials. \
Explain what to search for and what to look for in a good tutorial.";

/// Tutorial video lookup.
///
/// The primary link is returned as `video_url` metadata: the top search hit,
/// or a YouTube results page for the query when nothing was found.
pub struct VideoSearchStrategy {
    search: Arc<dyn SearchProvider>,
    max_results: usize,
    system_prompt: Option<String>,
}

impl VideoSearchStrategy {
    pub fn new(search: Arc<dyn SearchProvider>, max_results: usize) -> Self {
        Self {
            search,
            max_results,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        if prompt.is_some() {
            self.system_prompt = prompt;
        }
        self
    }

    fn search_query(input: &OperationInput) -> String {
        let problem = input.text.trim();
        match input.attribute_str("device_info") {
            Some(device) => format!("{device} {problem} fix tutorial"),
            None => problem.to_string(),
        }
    }
}

fn video_list(videos: &[SearchResult]) -> String {
    let mut list = String::new();
    for (i, video) in videos.iter().enumerate() {
        let _ = write!(list, "{}. {}\n   {}\n   URL: {}\n", i + 1, video.title, video.snippet, video.url);
    }
    list
}

#[async_trait]
impl Strategy for VideoSearchStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn defaults(&self) -> ModelParameters {
        ModelParameters::new(0.5, 800)
    }

    async fn build_payload(&self, context: &[Message], input: &OperationInput) -> Result<StrategyPayload> {
        let query = Self::search_query(input);
        let device = input.attribute_str("device_info").unwrap_or("Not specified");
        let problem = input.text.trim();

        let videos = match self.search.search(&query, self.max_results).await {
            Ok(videos) => videos,
            Err(e) => {
                warn!(backend = self.search.name(), error = %e, "Video search failed; falling back to a search link");
                Vec::new()
            }
        };

        let mut metadata = serde_json::Map::new();
        metadata.insert("search_query".into(), json!(query));

        let (system, turn) = if let Some(top) = videos.first() {
            metadata.insert("video_url".into(), json!(top.url));
            metadata.insert(
                "videos".into(),
                json!(videos.iter().map(|v| json!({ "title": v.title, "url": v.url })).collect::<Vec<_>>()),
            );
            (
                self.system_prompt.as_deref().unwrap_or(SYSTEM_PROMPT),
                format!(
                    "Device: {device}\nProblem: {problem}\n\nFound these videos:\n{}\nWhich videos should the user watch? Provide a brief explanation.",
                    video_list(&videos)
                ),
            )
        } else {
            let url = youtube_results_url(&query);
            metadata.insert("video_url".into(), json!(url));
            (
                self.system_prompt.as_deref().unwrap_or(GUIDANCE_PROMPT),
                format!(
                    "Device: {device}\nProblem: {problem}\n\nProvide search guidance for finding video tutorials. \
                     The user can start from this search: {url}"
                ),
            )
        };

        let (history, _) = split_turn(context);
        Ok(StrategyPayload {
            messages: assemble(system, history, Message::user(turn)),
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
    use parley_providers::NoopSearchProvider;

    #[tokio::test]
    async fn top_result_becomes_video_url() {
        let search = FixedSearch {
            results: Ok(vec![
                SearchResult::new("Fix offline printer", "TechFix: steps", "https://www.youtube.com/watch?v=abc"),
                SearchResult::new("Printer reset", "Chan: reset", "https://www.youtube.com/watch?v=def"),
            ]),
        };
        let input = OperationInput::text("printer offline").with_attribute("device_info", "HP LaserJet");
        let payload = VideoSearchStrategy::new(Arc::new(search), 5)
            .build_payload(&[Message::user("printer offline")], &input)
            .await
            .unwrap();

        assert_eq!(payload.metadata["video_url"], "https://www.youtube.com/watch?v=abc");
        assert_eq!(payload.metadata["search_query"], "HP LaserJet printer offline fix tutorial");
        assert_eq!(payload.metadata["videos"].as_array().unwrap().len(), 2);
        let turn = &payload.messages.last().unwrap().content;
        assert!(turn.contains("1. Fix offline printer"));
        assert!(turn.contains("Device: HP LaserJet"));
    }

    #[tokio::test]
    async fn no_results_falls_back_to_search_link() {
        let payload = VideoSearchStrategy::new(Arc::new(NoopSearchProvider), 5)
            .build_payload(&[Message::user("xbox won't update")], &OperationInput::text("xbox won't update"))
            .await
            .unwrap();

        let url = payload.metadata["video_url"].as_str().unwrap();
        assert!(url.starts_with("https://www.youtube.com/results?search_query="));
        assert!(payload.messages.last().unwrap().content.contains(url));
        assert!(!payload.metadata.contains_key("videos"));
    }

    #[tokio::test]
    async fn search_failure_falls_back_too() {
        let search = FixedSearch {
            results: Err(SearchError::NotConfigured("no key".into())),
        };
        let payload = VideoSearchStrategy::new(Arc::new(search), 5)
            .build_payload(&[Message::user("q")], &OperationInput::text("q"))
            .await
            .unwrap();
        assert_eq!(
            payload.metadata["video_url"],
            "https://www.youtube.com/results?search_query=q"
        );
    }
}
