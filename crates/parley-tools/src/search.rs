//! Web search tool backed by a Brave-style search API.

use crate::registry::{ToolHandler, ToolSpec};
use parley_types::ToolOutcome;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Configuration for the web search provider.
#[derive(Debug, Clone)]
pub struct WebSearchConfig {
    /// API key; searching is disabled without one.
    pub api_key: Option<String>,
    pub base_url: String,
    pub max_results: usize,
    pub timeout: Duration,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.search.brave.com/res/v1/web/search".to_string(),
            max_results: 5,
            timeout: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    web: WebResults,
}

#[derive(Debug, Default, Deserialize)]
struct WebResults {
    #[serde(default)]
    results: Vec<WebResult>,
}

#[derive(Debug, Deserialize)]
struct WebResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

/// Searches the web and returns title/url/snippet triples.
pub struct WebSearchTool {
    config: WebSearchConfig,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(config: WebSearchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }
}

#[async_trait::async_trait]
impl ToolHandler for WebSearchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "web_search",
            "Searches the web and returns the top results with titles and snippets",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "count": { "type": "integer", "description": "Number of results (max 10)" }
                },
                "required": ["query"]
            }),
        )
    }

    async fn call(&self, args: serde_json::Value) -> ToolOutcome {
        let args: SearchArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {e}")),
        };
        if args.query.trim().is_empty() {
            return ToolOutcome::err("query must not be empty");
        }

        let Some(api_key) = self.config.api_key.as_deref() else {
            return ToolOutcome::err("web_search is not configured: missing search API key");
        };

        let count = args.count.unwrap_or(self.config.max_results).min(10);
        let count_param = count.to_string();
        let response = self
            .client
            .get(&self.config.base_url)
            .query(&[("q", args.query.as_str()), ("count", count_param.as_str())])
            .header("X-Subscription-Token", api_key)
            .header("Accept", "application/json")
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return ToolOutcome::err(format!("search request failed: {e}")),
        };
        if !response.status().is_success() {
            return ToolOutcome::err(format!(
                "search provider returned status {}",
                response.status()
            ));
        }

        match response.json::<SearchResponse>().await {
            Ok(body) => {
                let results: Vec<serde_json::Value> = body
                    .web
                    .results
                    .into_iter()
                    .take(count)
                    .map(|r| {
                        json!({
                            "title": r.title,
                            "url": r.url,
                            "snippet": r.description,
                        })
                    })
                    .collect();
                ToolOutcome::ok(json!({ "query": args.query, "results": results }))
            }
            Err(e) => ToolOutcome::err(format!("search response was not valid JSON: {e}")),
        }
    }
}
