pub mod anthropic;
pub mod error;
pub mod json;

use crate::search::SearchCandidate;
use serde::{Deserialize, Serialize};

pub use error::LlmCallError;

/// Everything the model needs to disambiguate one record.
#[derive(Debug, Clone)]
pub struct MatchRequest {
    pub company_name: String,
    pub current_ticker: String,
    pub candidates: Vec<SearchCandidate>,
}

/// The structured output contract of the selection call. `selected_ticker`
/// is either a real symbol, the literal `PRIVATE`, or `<ticker>_UNKNOWN`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerSelection {
    pub selected_ticker: String,
    pub reasoning: String,
}

#[async_trait::async_trait]
pub trait MatchLlm: Send + Sync {
    async fn select_match(&self, req: MatchRequest) -> Result<TickerSelection, LlmCallError>;
}
