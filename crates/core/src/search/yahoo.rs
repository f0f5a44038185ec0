use crate::search::{SearchCandidate, SymbolSearch};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";
const SEARCH_PATH: &str = "/v1/finance/search";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Symbol lookup against the Yahoo Finance search endpoint.
#[derive(Debug, Clone)]
pub struct YahooSearchClient {
    http: reqwest::Client,
    base_url: String,
}

impl YahooSearchClient {
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("YAHOO_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let timeout_secs = std::env::var("YAHOO_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build yahoo search http client")?;

        Ok(Self { http, base_url })
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<SearchCandidate>> {
        let url = format!("{}{SEARCH_PATH}", self.base_url.trim_end_matches('/'));

        let res = self
            .http
            .get(url)
            .query(&[
                ("q", query),
                ("quotesCount", &max_results.to_string()),
                ("newsCount", "0"),
            ])
            .send()
            .await
            .context("yahoo search request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read yahoo search response")?;
        if !status.is_success() {
            anyhow::bail!("yahoo search HTTP {status}: {text}");
        }

        let body = serde_json::from_str::<SearchResponse>(&text)
            .with_context(|| format!("yahoo search response is not valid JSON: {text}"))?;
        Ok(candidates_from_quotes(body.quotes, max_results))
    }
}

#[async_trait::async_trait]
impl SymbolSearch for YahooSearchClient {
    async fn search(&self, query: &str, max_results: usize) -> Vec<SearchCandidate> {
        match self.fetch(query, max_results).await {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::warn!(query, error = %err, "symbol search failed; treating as no candidates");
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    quotes: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    longname: Option<String>,
    #[serde(default)]
    shortname: Option<String>,
    #[serde(default)]
    exchange: Option<String>,
}

fn candidates_from_quotes(quotes: Vec<Quote>, max_results: usize) -> Vec<SearchCandidate> {
    quotes
        .into_iter()
        .filter(|q| !q.symbol.trim().is_empty())
        .map(|q| SearchCandidate {
            symbol: q.symbol.trim().to_string(),
            name: q
                .longname
                .or(q.shortname)
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
            exchange: q
                .exchange
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
        })
        .take(max_results)
        .collect()
}
