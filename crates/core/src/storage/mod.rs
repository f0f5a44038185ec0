pub mod theses;

use crate::domain::thesis::{ThesisKey, ThesisRecord};
use anyhow::Context;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// The record store seam of the pipeline. The session behind an
/// implementation is owned by the orchestrator for the duration of one run.
#[async_trait::async_trait]
pub trait ThesisStore: Send + Sync {
    /// One page of records still needing reconciliation: price history null
    /// or an empty serialized list, ticker not an already-resolved sentinel.
    /// Ordering is stable within a run, so increasing offsets partition the
    /// eligible set (assuming no concurrent writer).
    async fn fetch_eligible_batch(
        &self,
        batch_size: usize,
        offset: usize,
    ) -> anyhow::Result<Vec<ThesisRecord>>;

    /// The key-changing ticker rewrite as a single transaction. Returns
    /// `Ok(false)` after rollback when the rewrite did not happen; the caller
    /// decides whether to abort or continue.
    async fn commit_ticker_change(
        &self,
        key: &ThesisKey,
        new_ticker: &str,
    ) -> anyhow::Result<bool>;

    /// Exact lookup by the composite key. Used by the apply-from-file path.
    async fn find_by_key(&self, key: &ThesisKey) -> anyhow::Result<Option<ThesisRecord>>;
}
