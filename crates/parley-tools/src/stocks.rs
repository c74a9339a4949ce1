//! Stock quote tool backed by a Finnhub-style quote API.

use crate::registry::{ToolHandler, ToolSpec};
use parley_types::ToolOutcome;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Configuration for the quote provider.
#[derive(Debug, Clone)]
pub struct StockQuoteConfig {
    /// API key; quotes are disabled without one.
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for StockQuoteConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://finnhub.io/api/v1/quote".to_string(),
            timeout: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QuoteArgs {
    symbol: String,
}

/// Quote payload in the provider's single-letter field convention.
#[derive(Debug, Default, Deserialize)]
struct QuoteResponse {
    #[serde(default, rename = "c")]
    current: f64,
    #[serde(default, rename = "o")]
    open: f64,
    #[serde(default, rename = "h")]
    high: f64,
    #[serde(default, rename = "l")]
    low: f64,
    #[serde(default, rename = "pc")]
    previous_close: f64,
}

/// Looks up the latest quote for a ticker symbol.
pub struct StockQuoteTool {
    config: StockQuoteConfig,
    client: reqwest::Client,
}

impl StockQuoteTool {
    pub fn new(config: StockQuoteConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }
}

#[async_trait::async_trait]
impl ToolHandler for StockQuoteTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "stock_quote",
            "Returns the latest price quote for a stock ticker symbol",
            json!({
                "type": "object",
                "properties": {
                    "symbol": { "type": "string", "description": "Ticker symbol, e.g. AAPL" }
                },
                "required": ["symbol"]
            }),
        )
    }

    async fn call(&self, args: serde_json::Value) -> ToolOutcome {
        let args: QuoteArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {e}")),
        };
        let symbol = args.symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() || symbol.len() > 12 {
            return ToolOutcome::err("symbol must be 1-12 characters");
        }

        let Some(api_key) = self.config.api_key.as_deref() else {
            return ToolOutcome::err("stock_quote is not configured: missing quote API key");
        };

        let response = self
            .client
            .get(&self.config.base_url)
            .query(&[("symbol", symbol.as_str()), ("token", api_key)])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return ToolOutcome::err(format!("quote request failed: {e}")),
        };
        if !response.status().is_success() {
            return ToolOutcome::err(format!(
                "quote provider returned status {}",
                response.status()
            ));
        }

        match response.json::<QuoteResponse>().await {
            Ok(quote) => {
                // The provider reports all-zero fields for unknown symbols.
                if quote.current == 0.0 && quote.previous_close == 0.0 {
                    return ToolOutcome::err(format!("no quote available for {symbol}"));
                }
                ToolOutcome::ok(json!({
                    "symbol": symbol,
                    "price": quote.current,
                    "open": quote.open,
                    "high": quote.high,
                    "low": quote.low,
                    "previous_close": quote.previous_close,
                }))
            }
            Err(e) => ToolOutcome::err(format!("quote response was not valid JSON: {e}")),
        }
    }
}
