use crate::domain::decision::{MatchDecision, MatchOutcome};
use crate::llm::{LlmCallError, MatchLlm, MatchRequest, TickerSelection};
use crate::retry::{RetryError, RetryPolicy};
use crate::search::SymbolSearch;

const DEFAULT_MAX_CANDIDATES: usize = 5;

/// Resolves one record's ticker through search plus a structured LLM call.
/// Borrows its collaborators for the duration of one run; the orchestrator
/// owns them.
pub struct MatchDecisionEngine<'a> {
    search: &'a dyn SymbolSearch,
    llm: &'a dyn MatchLlm,
    retry: RetryPolicy,
    max_candidates: usize,
}

impl<'a> MatchDecisionEngine<'a> {
    pub fn new(search: &'a dyn SymbolSearch, llm: &'a dyn MatchLlm) -> Self {
        Self {
            search,
            llm,
            retry: RetryPolicy::default(),
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Two-stage resolution. Search by company name first; iff that stage
    /// decides "unknown", repeat with the ticker string as the query, and let
    /// a conclusive second decision supersede the first. `Private` is
    /// terminal — there is no symbol left to retry with.
    pub async fn decide(
        &self,
        company_name: &str,
        current_ticker: &str,
    ) -> anyhow::Result<MatchDecision> {
        let first = self
            .decide_with_query(company_name, current_ticker, company_name)
            .await?;
        if !first.outcome.is_unknown() {
            return Ok(first);
        }

        tracing::info!(
            company_name,
            current_ticker,
            reasoning = %first.reasoning,
            "company name search inconclusive; retrying with ticker query"
        );

        let second = self
            .decide_with_query(company_name, current_ticker, current_ticker)
            .await?;
        if second.outcome.is_unknown() {
            Ok(first)
        } else {
            Ok(second)
        }
    }

    /// One stage of the state machine, parameterized by query string so the
    /// name-search and ticker-fallback call sites cannot diverge.
    async fn decide_with_query(
        &self,
        company_name: &str,
        current_ticker: &str,
        query: &str,
    ) -> anyhow::Result<MatchDecision> {
        let candidates = self.search.search(query, self.max_candidates).await;
        let req = MatchRequest {
            company_name: company_name.to_string(),
            current_ticker: current_ticker.to_string(),
            candidates,
        };

        let outcome = self
            .retry
            .run("select_ticker_match", || self.llm.select_match(req.clone()))
            .await;

        match outcome {
            Ok(selection) => Ok(decode_selection(selection, current_ticker)),
            Err(RetryError::Fatal(LlmCallError::Malformed { detail, .. })) => {
                // The state machine stays total: an undecodable response is a
                // decision, not a fault.
                Ok(MatchDecision::unknown(
                    current_ticker,
                    format!("failed to parse match response: {detail}"),
                ))
            }
            Err(err) => Err(anyhow::Error::new(err).context("ticker match call failed")),
        }
    }
}

fn decode_selection(selection: TickerSelection, current_ticker: &str) -> MatchDecision {
    let selected = selection.selected_ticker.trim();
    if selected.is_empty() {
        return MatchDecision::unknown(
            current_ticker,
            "match response had an empty selected_ticker",
        );
    }
    MatchDecision {
        outcome: MatchOutcome::from_wire(selected),
        reasoning: selection.reasoning,
    }
}
