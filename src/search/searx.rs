//! SearxNG JSON API client.

use super::SearchTool;
use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::models::Source;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct SearxResponse {
    #[serde(default)]
    results: Vec<SearxResult>,
}

#[derive(Debug, Deserialize)]
struct SearxResult {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

/// Web search through a SearxNG instance.
pub struct SearxSearch {
    http_client: reqwest::Client,
    base_url: String,
    engines: Option<String>,
    timeout_seconds: u64,
}

impl SearxSearch {
    pub fn new(config: &SearchConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.searx_url.trim_end_matches('/').to_string(),
            engines: config.engines.clone(),
            timeout_seconds: config.timeout_seconds,
        })
    }

    fn search_url(&self, query: &str) -> Result<reqwest::Url, SearchError> {
        let endpoint = format!("{}/search", self.base_url);
        let mut params = vec![("q", query.to_string()), ("format", "json".to_string())];
        if let Some(ref engines) = self.engines {
            params.push(("engines", engines.clone()));
        }

        reqwest::Url::parse_with_params(&endpoint, &params)
            .map_err(|e| SearchError::Unavailable(format!("invalid search URL {}: {}", endpoint, e)))
    }
}

#[async_trait]
impl SearchTool for SearxSearch {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Source>, SearchError> {
        let url = self.search_url(query)?;
        debug!("Searching: {}", query);

        let response = self.http_client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                SearchError::Timeout(self.timeout_seconds)
            } else if e.is_connect() {
                SearchError::Unavailable(format!("cannot connect to SearxNG at {}", self.base_url))
            } else {
                SearchError::Unavailable(format!("failed to send request: {}", e))
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Unavailable(format!(
                "SearxNG API error {}: {}",
                status, body
            )));
        }

        let body: SearxResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Unavailable(format!("unreadable SearxNG response: {}", e)))?;

        let sources = to_sources(body, top_k);
        if sources.is_empty() {
            return Err(SearchError::NoResults(query.to_string()));
        }

        Ok(sources)
    }
}

/// Keep the first `top_k` results with a URL, deduplicated by URL.
fn to_sources(response: SearxResponse, top_k: usize) -> Vec<Source> {
    let mut seen = std::collections::HashSet::new();

    response
        .results
        .into_iter()
        .filter(|r| !r.url.trim().is_empty())
        .filter(|r| seen.insert(r.url.clone()))
        .take(top_k)
        .map(|r| Source::new(r.url, r.title, r.content))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_sources_dedups_and_truncates() {
        let response: SearxResponse = serde_json::from_str(
            r#"{"results":[
                {"url":"https://a.example","title":"A","content":"alpha"},
                {"url":"https://a.example","title":"A again","content":"alpha"},
                {"url":"","title":"no url"},
                {"url":"https://b.example","title":"B","content":"beta"},
                {"url":"https://c.example","title":"C"}
            ]}"#,
        )
        .unwrap();

        let sources = to_sources(response, 2);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].id, "https://a.example");
        assert_eq!(sources[1].id, "https://b.example");
    }

    #[test]
    fn test_search_url_encodes_query() {
        let search = SearxSearch::new(&SearchConfig {
            searx_url: "http://localhost:8888/".to_string(),
            timeout_seconds: 5,
            engines: Some("duckduckgo".to_string()),
        })
        .unwrap();

        let url = search.search_url("remote work & rents").unwrap();
        let url = url.as_str();
        assert!(url.starts_with("http://localhost:8888/search?"));
        assert!(url.contains("format=json"));
        assert!(url.contains("engines=duckduckgo"));
        assert!(!url.contains(' '));
    }
}
