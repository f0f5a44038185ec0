use crate::config::Settings;
use crate::llm::error::LlmCallError;
use crate::llm::{json, MatchLlm, MatchRequest, TickerSelection};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

const TOOL_NAME_SELECT_MATCH: &str = "select_ticker_match";

// Anthropic signals overload with 529 in addition to the standard 429.
const STATUS_OVERLOADED: u16 = 529;

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let timeout_secs = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    async fn create_message(
        &self,
        req: CreateMessageRequest,
    ) -> Result<CreateMessageResponse, LlmCallError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|err| LlmCallError::Transport(err.into()))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .map_err(|err| {
                LlmCallError::Transport(anyhow::Error::new(err).context("Anthropic request failed"))
            })?;

        let status = res.status();
        let text = res.text().await.map_err(|err| {
            LlmCallError::Transport(
                anyhow::Error::new(err).context("failed to read Anthropic response body"),
            )
        })?;
        if !status.is_success() {
            return Err(classify_http_failure(status, text));
        }

        serde_json::from_str::<CreateMessageResponse>(&text).map_err(|err| {
            LlmCallError::Transport(
                anyhow::Error::new(err)
                    .context(format!("failed to decode Anthropic response: {text}")),
            )
        })
    }

    fn tools() -> Vec<Tool> {
        // Strict and explicit to maximize compliance: exactly the two fields
        // of the selection contract, nothing else.
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["selected_ticker", "reasoning"],
            "properties": {
                "selected_ticker": {
                    "type": "string",
                    "description": "The best matching ticker symbol, or 'PRIVATE' if the company was taken private, or '<ticker>_UNKNOWN' if nothing matches"
                },
                "reasoning": {
                    "type": "string",
                    "description": "Brief explanation of why this ticker was selected"
                }
            }
        });

        vec![Tool {
            name: TOOL_NAME_SELECT_MATCH,
            description: "Select the best matching ticker for a company",
            input_schema: schema,
        }]
    }

    fn tool_choice() -> ToolChoice {
        ToolChoice::Tool {
            name: TOOL_NAME_SELECT_MATCH,
        }
    }

    fn system_prompt() -> String {
        [
            "You are a financial data matching assistant.",
            "Given a company name, its possibly stale ticker, and candidate symbols from a",
            "symbol directory, you pick the single best answer. There are exactly three",
            "possible answer shapes: a real ticker symbol from the candidates, the literal",
            "string PRIVATE when the company appears to have been delisted or taken private,",
            "or the original ticker with the suffix _UNKNOWN when no candidate is a",
            "confident match. When several candidates plausibly match, select the one",
            "listed on the largest, most prominent exchange.",
        ]
        .join("\n")
    }

    fn user_prompt(req: &MatchRequest) -> String {
        let candidates =
            serde_json::to_string(&req.candidates).unwrap_or_else(|_| "[]".to_string());
        format!(
            "Company name: '{}'\nCurrent ticker: '{}'\n\n\
Select the best matching ticker from these search results, or return 'PRIVATE' \
if the company seems to have been taken private or delisted, or '{}_UNKNOWN' if \
no result appears to match. Select the largest exchange where you have an \
option.\n\nSearch results JSON:\n{}",
            req.company_name, req.current_ticker, req.current_ticker, candidates
        )
    }

    fn selection_from_response(
        res: &CreateMessageResponse,
    ) -> Result<TickerSelection, LlmCallError> {
        for block in &res.content {
            if let ContentBlock::ToolUse { name, input, .. } = block {
                if name == TOOL_NAME_SELECT_MATCH {
                    let parsed = serde_json::from_value::<TickerSelection>(input.clone())
                        .map_err(|err| LlmCallError::Malformed {
                            detail: format!("tool_use input does not match selection schema: {err}"),
                            raw_output: Some(input.to_string()),
                        })?;
                    if parsed.selected_ticker.trim().is_empty() {
                        return Err(LlmCallError::Malformed {
                            detail: "tool_use input has an empty selected_ticker".to_string(),
                            raw_output: Some(input.to_string()),
                        });
                    }
                    return Ok(parsed);
                }
            }
        }

        // Fallback to text (should be rare with a forced tool choice).
        let text = Self::response_text(res);
        if text.trim().is_empty() {
            return Err(LlmCallError::Malformed {
                detail: "response contained no tool call and no text".to_string(),
                raw_output: None,
            });
        }
        json::parse_selection(&text).map_err(|err| LlmCallError::Malformed {
            detail: format!("{err:#}"),
            raw_output: Some(text),
        })
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }
}

#[async_trait::async_trait]
impl MatchLlm for AnthropicClient {
    async fn select_match(&self, req: MatchRequest) -> Result<TickerSelection, LlmCallError> {
        let request = CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: Some(Self::system_prompt()),
            messages: vec![Message {
                role: "user",
                content: Self::user_prompt(&req),
            }],
            tools: Some(Self::tools()),
            tool_choice: Some(Self::tool_choice()),
        };

        let res = self.create_message(request).await?;
        Self::selection_from_response(&res)
    }
}

fn classify_http_failure(status: StatusCode, body: String) -> LlmCallError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == STATUS_OVERLOADED {
        return LlmCallError::RateLimited {
            detail: format!("HTTP {status}: {body}"),
        };
    }
    LlmCallError::Transport(anyhow::anyhow!("Anthropic HTTP {status}: {body}"))
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}
