use crate::retry::RetryableError;
use std::fmt;

/// Failure classes of one selection call. The retry policy acts on
/// `RateLimited` only; the decision engine degrades `Malformed` into a
/// synthesized unknown-sentinel decision; `Transport` surfaces per record.
#[derive(Debug)]
pub enum LlmCallError {
    RateLimited {
        detail: String,
    },
    Malformed {
        detail: String,
        raw_output: Option<String>,
    },
    Transport(anyhow::Error),
}

impl fmt::Display for LlmCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmCallError::RateLimited { detail } => write!(f, "LLM rate limited: {detail}"),
            LlmCallError::Malformed { detail, .. } => {
                write!(f, "LLM output malformed: {detail}")
            }
            LlmCallError::Transport(err) => write!(f, "LLM call failed: {err:#}"),
        }
    }
}

impl std::error::Error for LlmCallError {}

impl RetryableError for LlmCallError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, LlmCallError::RateLimited { .. })
    }
}
