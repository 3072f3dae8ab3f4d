//! Search provider implementations used by the search-backed operations.
//!
//! - [`NoopSearchProvider`]: returns nothing (no backend configured)
//! - [`SearxngSearchProvider`]: a SearXNG instance's JSON API
//! - [`YouTubeSearchProvider`]: YouTube Data API v3 video search

use async_trait::async_trait;
use parley_core::error::SearchError;
use parley_core::search::{SearchProvider, SearchResult};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const YOUTUBE_API_URL: &str = "https://www.googleapis.com/youtube/v3/search";
const SNIPPET_MAX_CHARS: usize = 200;

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(SEARCH_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn truncate(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() { format!("{head}...") } else { head }
}

/// Always returns an empty result set.
pub struct NoopSearchProvider;

#[async_trait]
impl SearchProvider for NoopSearchProvider {
    fn name(&self) -> &str {
        "none"
    }

    async fn search(&self, _query: &str, _max_results: usize) -> std::result::Result<Vec<SearchResult>, SearchError> {
        Ok(Vec::new())
    }
}

/// Web search through a SearXNG instance (`format=json` must be enabled).
pub struct SearxngSearchProvider {
    base_url: String,
    client: reqwest::Client,
}

impl SearxngSearchProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: http_client(),
        }
    }

    fn parse(body: &str, max_results: usize) -> std::result::Result<Vec<SearchResult>, SearchError> {
        let parsed: SearxngResponse = serde_json::from_str(body).map_err(|e| SearchError::Parse(e.to_string()))?;
        Ok(parsed
            .results
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .take(max_results)
            .map(|r| SearchResult::new(r.title, truncate(&r.content, SNIPPET_MAX_CHARS), r.url))
            .collect())
    }
}

#[async_trait]
impl SearchProvider for SearxngSearchProvider {
    fn name(&self) -> &str {
        "searxng"
    }

    async fn search(&self, query: &str, max_results: usize) -> std::result::Result<Vec<SearchResult>, SearchError> {
        let url = format!("{}/search", self.base_url);
        debug!(backend = "searxng", query, "Running web search");

        let response = self
            .client
            .get(&url)
            .query(&[("q", query), ("format", "json")])
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SearchError::Request(format!("status {}", response.status().as_u16())));
        }

        let body = response.text().await.map_err(|e| SearchError::Request(e.to_string()))?;
        Self::parse(&body, max_results)
    }
}

/// Video search through the YouTube Data API v3.
pub struct YouTubeSearchProvider {
    api_key: String,
    api_url: String,
    client: reqwest::Client,
}

impl YouTubeSearchProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: YOUTUBE_API_URL.into(),
            client: http_client(),
        }
    }

    /// Point at a different endpoint (proxies, tests).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    fn parse(body: &str) -> std::result::Result<Vec<SearchResult>, SearchError> {
        let parsed: YouTubeResponse = serde_json::from_str(body).map_err(|e| SearchError::Parse(e.to_string()))?;
        Ok(parsed
            .items
            .into_iter()
            .filter_map(|item| {
                let video_id = item.id.video_id?;
                let snippet = item.snippet;
                let description = truncate(&snippet.description, SNIPPET_MAX_CHARS);
                let summary = if snippet.channel_title.is_empty() {
                    description
                } else {
                    format!("{}: {}", snippet.channel_title, description)
                };
                Some(SearchResult::new(snippet.title, summary, watch_url(&video_id)))
            })
            .collect())
    }
}

#[async_trait]
impl SearchProvider for YouTubeSearchProvider {
    fn name(&self) -> &str {
        "youtube"
    }

    async fn search(&self, query: &str, max_results: usize) -> std::result::Result<Vec<SearchResult>, SearchError> {
        if self.api_key.is_empty() {
            return Err(SearchError::NotConfigured("youtube_api_key is not set".into()));
        }
        debug!(backend = "youtube", query, "Running video search");

        let max_results = max_results.clamp(1, 50).to_string();
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("part", "snippet"),
                ("q", query),
                ("type", "video"),
                ("maxResults", max_results.as_str()),
                ("order", "relevance"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SearchError::Request(format!("status {}", response.status().as_u16())));
        }

        let body = response.text().await.map_err(|e| SearchError::Request(e.to_string()))?;
        Self::parse(&body)
    }
}

/// Canonical watch URL for a video ID.
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// YouTube results page for a free-text query; the link of last resort
/// when no API results are available.
pub fn youtube_results_url(query: &str) -> String {
    reqwest::Url::parse_with_params("https://www.youtube.com/results", &[("search_query", query)])
        .map(|u| u.to_string())
        .unwrap_or_else(|_| "https://www.youtube.com/results".to_string())
}

// --- Wire types (internal) ---

#[derive(Debug, Deserialize)]
struct SearxngResponse {
    #[serde(default)]
    results: Vec<SearxngResult>,
}

#[derive(Debug, Deserialize)]
struct SearxngResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct YouTubeResponse {
    #[serde(default)]
    items: Vec<YouTubeItem>,
}

#[derive(Debug, Deserialize)]
struct YouTubeItem {
    id: YouTubeItemId,
    snippet: YouTubeSnippet,
}

#[derive(Debug, Deserialize)]
struct YouTubeItemId {
    #[serde(rename = "videoId", default)]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YouTubeSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "channelTitle", default)]
    channel_title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_returns_nothing() {
        let results = NoopSearchProvider.search("anything", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn parse_searxng_results() {
        let body = r#"{"results":[
            {"title":"Rust","content":"A language empowering everyone","url":"https://rust-lang.org"},
            {"title":"No URL","content":"skipped","url":""},
            {"title":"Tokio","content":"Async runtime","url":"https://tokio.rs"},
            {"title":"Axum","content":"Web framework","url":"https://docs.rs/axum"}
        ]}"#;
        let results = SearxngSearchProvider::parse(body, 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://rust-lang.org");
        assert_eq!(results[1].title, "Tokio");
    }

    #[test]
    fn parse_searxng_garbage_is_error() {
        assert!(matches!(
            SearxngSearchProvider::parse("<html>", 5),
            Err(SearchError::Parse(_))
        ));
    }

    #[test]
    fn parse_youtube_items() {
        let body = r#"{"items":[
            {"id":{"kind":"youtube#video","videoId":"abc123"},
             "snippet":{"title":"Fix printer offline","description":"Step by step","channelTitle":"TechFix"}},
            {"id":{"kind":"youtube#channel","channelId":"xyz"},
             "snippet":{"title":"A channel","description":"","channelTitle":"Chan"}}
        ]}"#;
        let results = YouTubeSearchProvider::parse(body).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://www.youtube.com/watch?v=abc123");
        assert_eq!(results[0].snippet, "TechFix: Step by step");
    }

    #[tokio::test]
    async fn youtube_without_key_is_not_configured() {
        let provider = YouTubeSearchProvider::new("");
        assert!(matches!(
            provider.search("q", 5).await,
            Err(SearchError::NotConfigured(_))
        ));
    }

    #[test]
    fn results_url_is_encoded() {
        let url = youtube_results_url("hp laserjet offline fix");
        assert_eq!(url, "https://www.youtube.com/results?search_query=hp+laserjet+offline+fix");
    }

    #[test]
    fn long_snippets_are_truncated() {
        let text = "x".repeat(300);
        assert_eq!(truncate(&text, 200).chars().count(), 203);
        assert_eq!(truncate("short", 200), "short");
    }
}
