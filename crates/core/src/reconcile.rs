use crate::changeset;
use crate::domain::thesis::{ChangeRecord, ThesisRecord};
use crate::matching::MatchDecisionEngine;
use crate::storage::ThesisStore;
use chrono::Utc;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Records fetched per store query.
    pub batch_size: usize,
    /// Cap on total records processed across the run; `None` means all.
    pub total_limit: Option<usize>,
    /// Stage decisions in a change-set file instead of mutating the store.
    pub export: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            total_limit: None,
            export: false,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub updated: usize,
    pub failed: usize,
    pub exported: Option<PathBuf>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub applied: usize,
    pub unchanged: usize,
    pub missing: usize,
    pub failed: usize,
}

/// Drives the batch loop. Owns the store session and the decision engine for
/// the duration of one run.
pub struct Reconciler<'a> {
    store: &'a dyn ThesisStore,
    engine: MatchDecisionEngine<'a>,
    out_dir: PathBuf,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn ThesisStore, engine: MatchDecisionEngine<'a>) -> Self {
        Self {
            store,
            engine,
            out_dir: PathBuf::from("."),
        }
    }

    pub fn with_out_dir(mut self, out_dir: impl Into<PathBuf>) -> Self {
        self.out_dir = out_dir.into();
        self
    }

    pub async fn run(&self, opts: &RunOptions) -> anyhow::Result<RunSummary> {
        anyhow::ensure!(opts.batch_size >= 1, "batch size must be >= 1");

        let mut summary = RunSummary::default();
        let mut results: Vec<ChangeRecord> = Vec::new();

        loop {
            let remaining = opts
                .total_limit
                .map(|limit| limit.saturating_sub(summary.processed));
            if remaining == Some(0) {
                break;
            }
            let fetch = remaining.map_or(opts.batch_size, |r| opts.batch_size.min(r));

            // Offset by the number already processed: processed records stay
            // eligible until the ingester fills their price history, so the
            // offset partitions the stable-ordered eligible set.
            let batch = self
                .store
                .fetch_eligible_batch(fetch, summary.processed)
                .await?;
            if batch.is_empty() {
                break;
            }

            tracing::info!(
                batch_len = batch.len(),
                processed_so_far = summary.processed,
                "processing batch"
            );

            for thesis in batch {
                if let Some(change) = self.process_one(&thesis, opts.export, &mut summary).await {
                    if opts.export {
                        results.push(change);
                    }
                }
                summary.processed += 1;
            }
        }

        if opts.export && !results.is_empty() {
            let path = changeset::default_export_path(&self.out_dir);
            changeset::write_change_set(&path, &results)?;
            summary.exported = Some(path);
        }

        tracing::info!(
            processed = summary.processed,
            updated = summary.updated,
            failed = summary.failed,
            "reconciliation run complete"
        );
        Ok(summary)
    }

    /// One record, start to finish. Every failure class degrades to a skip;
    /// nothing here aborts the batch loop.
    async fn process_one(
        &self,
        thesis: &ThesisRecord,
        export: bool,
        summary: &mut RunSummary,
    ) -> Option<ChangeRecord> {
        let company = thesis.company_name.as_deref().unwrap_or_default();
        tracing::info!(company, ticker = %thesis.ticker, "processing thesis");

        let decision = match self.engine.decide(company, &thesis.ticker).await {
            Ok(decision) => decision,
            Err(err) => {
                summary.failed += 1;
                tracing::warn!(key = %thesis.key(), error = %err, "match failed; skipping record");
                return None;
            }
        };

        let change = ChangeRecord {
            date: thesis.date,
            author: thesis.author.clone(),
            old_ticker: thesis.ticker.clone(),
            new_ticker: decision.outcome.to_wire(),
            company_name: company.to_string(),
            reasoning: decision.reasoning,
            processed_at: Utc::now(),
        };

        if !export && change.new_ticker != thesis.ticker {
            tracing::info!(
                key = %thesis.key(),
                new_ticker = %change.new_ticker,
                reasoning = %change.reasoning,
                "updating ticker"
            );

            let committed = match self
                .store
                .commit_ticker_change(&thesis.key(), &change.new_ticker)
                .await
            {
                Ok(committed) => committed,
                Err(err) => {
                    tracing::warn!(key = %thesis.key(), error = %err, "ticker update errored");
                    false
                }
            };
            if !committed {
                summary.failed += 1;
                return None;
            }
            summary.updated += 1;
        } else {
            tracing::info!(
                key = %thesis.key(),
                new_ticker = %change.new_ticker,
                reasoning = %change.reasoning,
                "found new ticker"
            );
        }

        Some(change)
    }
}

/// Replays a previously exported change-set against the store. Independent of
/// the search/match components; rows whose key no longer exists are warnings,
/// not errors, because the file may be stale relative to the store.
pub async fn apply_change_set(
    store: &dyn ThesisStore,
    path: &Path,
) -> anyhow::Result<ApplySummary> {
    let rows = changeset::read_change_set(path)?;
    tracing::info!(path = %path.display(), rows = rows.len(), "applying change-set");

    let mut summary = ApplySummary::default();
    for row in rows {
        // No-op rows exist for review; direct mode would not have committed
        // them either.
        if row.new_ticker == row.old_ticker {
            summary.unchanged += 1;
            continue;
        }

        let key = row.old_key();
        match store.find_by_key(&key).await {
            Ok(Some(thesis)) => {
                tracing::info!(
                    company = %row.company_name,
                    old_ticker = %row.old_ticker,
                    new_ticker = %row.new_ticker,
                    "updating ticker from change-set"
                );

                let committed = match store
                    .commit_ticker_change(&thesis.key(), &row.new_ticker)
                    .await
                {
                    Ok(committed) => committed,
                    Err(err) => {
                        tracing::warn!(key = %key, error = %err, "ticker update errored");
                        false
                    }
                };
                if committed {
                    summary.applied += 1;
                } else {
                    summary.failed += 1;
                }
            }
            Ok(None) => {
                summary.missing += 1;
                tracing::warn!(key = %key, company = %row.company_name, "no thesis record for change-set row");
            }
            Err(err) => {
                summary.failed += 1;
                tracing::warn!(key = %key, error = %err, "lookup failed for change-set row");
            }
        }
    }

    tracing::info!(
        applied = summary.applied,
        unchanged = summary.unchanged,
        missing = summary.missing,
        failed = summary.failed,
        "finished applying change-set"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::thesis::ThesisKey;
    use crate::llm::{LlmCallError, MatchLlm, MatchRequest, TickerSelection};
    use crate::search::{SearchCandidate, SymbolSearch};
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn thesis(day: u32, author: &str, ticker: &str) -> ThesisRecord {
        ThesisRecord {
            date: NaiveDate::from_ymd_opt(2021, 3, day).unwrap(),
            author: author.to_string(),
            ticker: ticker.to_string(),
            company_name: Some(format!("{ticker} Corp")),
            link: None,
            market_cap: None,
            price: None,
            text: None,
            profile: None,
            daily_price: None,
            dividends: None,
            created_at: None,
        }
    }

    struct MemStore {
        rows: Mutex<Vec<ThesisRecord>>,
        fetch_calls: Mutex<Vec<(usize, usize)>>,
        commits: Mutex<Vec<(ThesisKey, String)>>,
        fail_commits_for: Vec<String>,
    }

    impl MemStore {
        fn new(rows: Vec<ThesisRecord>) -> Self {
            Self {
                rows: Mutex::new(rows),
                fetch_calls: Mutex::new(Vec::new()),
                commits: Mutex::new(Vec::new()),
                fail_commits_for: Vec::new(),
            }
        }

        fn failing_commits_for(mut self, tickers: &[&str]) -> Self {
            self.fail_commits_for = tickers.iter().map(|t| t.to_string()).collect();
            self
        }

        fn tickers(&self) -> Vec<String> {
            let mut out: Vec<String> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.ticker.clone())
                .collect();
            out.sort();
            out
        }

        fn commits(&self) -> Vec<(ThesisKey, String)> {
            self.commits.lock().unwrap().clone()
        }

        fn fetch_calls(&self) -> Vec<(usize, usize)> {
            self.fetch_calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ThesisStore for MemStore {
        async fn fetch_eligible_batch(
            &self,
            batch_size: usize,
            offset: usize,
        ) -> anyhow::Result<Vec<ThesisRecord>> {
            self.fetch_calls.lock().unwrap().push((batch_size, offset));
            let rows = self.rows.lock().unwrap();
            let mut eligible: Vec<ThesisRecord> = rows
                .iter()
                .filter(|r| r.needs_reconciliation())
                .cloned()
                .collect();
            eligible.sort_by_key(|r| (r.date, r.author.clone(), r.ticker.clone()));
            Ok(eligible.into_iter().skip(offset).take(batch_size).collect())
        }

        async fn commit_ticker_change(
            &self,
            key: &ThesisKey,
            new_ticker: &str,
        ) -> anyhow::Result<bool> {
            if self.fail_commits_for.contains(&key.ticker) {
                return Ok(false);
            }
            let mut rows = self.rows.lock().unwrap();
            let Some(row) = rows.iter_mut().find(|r| {
                r.date == key.date && r.author == key.author && r.ticker == key.ticker
            }) else {
                return Ok(false);
            };
            row.ticker = new_ticker.to_string();
            self.commits
                .lock()
                .unwrap()
                .push((key.clone(), new_ticker.to_string()));
            Ok(true)
        }

        async fn find_by_key(&self, key: &ThesisKey) -> anyhow::Result<Option<ThesisRecord>> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .find(|r| r.date == key.date && r.author == key.author && r.ticker == key.ticker)
                .cloned())
        }
    }

    struct SilentSearch;

    #[async_trait::async_trait]
    impl SymbolSearch for SilentSearch {
        async fn search(&self, _query: &str, _max_results: usize) -> Vec<SearchCandidate> {
            Vec::new()
        }
    }

    /// Maps the current ticker to a scripted wire result; unmapped tickers
    /// resolve to themselves. Counts calls per ticker.
    struct MappedLlm {
        map: HashMap<String, String>,
        fail_for: Option<String>,
        calls: Mutex<HashMap<String, usize>>,
    }

    impl MappedLlm {
        fn new(pairs: &[(&str, &str)]) -> Self {
            Self {
                map: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                fail_for: None,
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn failing_for(mut self, ticker: &str) -> Self {
            self.fail_for = Some(ticker.to_string());
            self
        }

        fn calls_for(&self, ticker: &str) -> usize {
            self.calls.lock().unwrap().get(ticker).copied().unwrap_or(0)
        }
    }

    #[async_trait::async_trait]
    impl MatchLlm for MappedLlm {
        async fn select_match(&self, req: MatchRequest) -> Result<TickerSelection, LlmCallError> {
            *self
                .calls
                .lock()
                .unwrap()
                .entry(req.current_ticker.clone())
                .or_insert(0) += 1;

            if self.fail_for.as_deref() == Some(req.current_ticker.as_str()) {
                return Err(LlmCallError::Transport(anyhow::anyhow!(
                    "connection refused"
                )));
            }

            Ok(TickerSelection {
                selected_ticker: self
                    .map
                    .get(&req.current_ticker)
                    .cloned()
                    .unwrap_or_else(|| req.current_ticker.clone()),
                reasoning: "scripted".to_string(),
            })
        }
    }

    fn reconciler<'a>(store: &'a MemStore, llm: &'a MappedLlm) -> Reconciler<'a> {
        Reconciler::new(
            store,
            MatchDecisionEngine::new(&SILENT_SEARCH, llm),
        )
    }

    static SILENT_SEARCH: SilentSearch = SilentSearch;

    #[tokio::test]
    async fn pagination_partitions_the_eligible_set() {
        let store = MemStore::new(vec![
            thesis(1, "ana", "T1"),
            thesis(2, "ana", "T2"),
            thesis(3, "ana", "T3"),
            thesis(4, "ana", "T4"),
            thesis(5, "ana", "T5"),
        ]);
        let llm = MappedLlm::new(&[]);

        let summary = reconciler(&store, &llm)
            .run(&RunOptions {
                batch_size: 3,
                total_limit: Some(5),
                export: false,
            })
            .await
            .unwrap();

        assert_eq!(summary.processed, 5);
        assert_eq!(summary.updated, 0);
        assert_eq!(store.fetch_calls(), vec![(3, 0), (2, 3)]);
        for ticker in ["T1", "T2", "T3", "T4", "T5"] {
            assert_eq!(llm.calls_for(ticker), 1, "{ticker} visited exactly once");
        }
        assert!(store.commits().is_empty());
    }

    #[tokio::test]
    async fn direct_mode_commits_only_changed_tickers() {
        let store = MemStore::new(vec![thesis(1, "ana", "FOO"), thesis(2, "ana", "BAZ")]);
        let llm = MappedLlm::new(&[("FOO", "BAR")]);

        let summary = reconciler(&store, &llm)
            .run(&RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.failed, 0);

        let commits = store.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].0.ticker, "FOO");
        assert_eq!(commits[0].1, "BAR");
        assert_eq!(store.tickers(), vec!["BAR", "BAZ"]);
    }

    #[tokio::test]
    async fn export_mode_never_mutates_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemStore::new(vec![thesis(1, "ana", "FOO"), thesis(2, "ana", "BAZ")]);
        let llm = MappedLlm::new(&[("FOO", "BAR")]);

        let summary = reconciler(&store, &llm)
            .with_out_dir(dir.path())
            .run(&RunOptions {
                batch_size: 100,
                total_limit: None,
                export: true,
            })
            .await
            .unwrap();

        assert!(store.commits().is_empty());
        assert_eq!(store.tickers(), vec!["BAZ", "FOO"]);

        let path = summary.exported.expect("export mode writes a file");
        let rows = changeset::read_change_set(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].old_ticker, "FOO");
        assert_eq!(rows[0].new_ticker, "BAR");
        assert_eq!(rows[1].old_ticker, "BAZ");
        assert_eq!(rows[1].new_ticker, "BAZ");
    }

    #[tokio::test]
    async fn export_with_no_eligible_records_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemStore::new(vec![]);
        let llm = MappedLlm::new(&[]);

        let summary = reconciler(&store, &llm)
            .with_out_dir(dir.path())
            .run(&RunOptions {
                batch_size: 10,
                total_limit: None,
                export: true,
            })
            .await
            .unwrap();

        assert_eq!(summary.processed, 0);
        assert!(summary.exported.is_none());
    }

    #[tokio::test]
    async fn commit_failure_is_isolated_to_the_record() {
        let store = MemStore::new(vec![
            thesis(1, "ana", "A"),
            thesis(2, "ana", "B"),
            thesis(3, "ana", "C"),
        ])
        .failing_commits_for(&["B"]);
        let llm = MappedLlm::new(&[("A", "A2"), ("B", "B2"), ("C", "C2")]);

        let summary = reconciler(&store, &llm)
            .run(&RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.updated, 2);
        assert_eq!(summary.failed, 1);

        let committed: Vec<String> = store.commits().into_iter().map(|(_, t)| t).collect();
        assert_eq!(committed, vec!["A2", "C2"]);
    }

    #[tokio::test]
    async fn engine_failure_skips_the_record_and_continues() {
        let store = MemStore::new(vec![
            thesis(1, "ana", "A"),
            thesis(2, "ana", "B"),
            thesis(3, "ana", "C"),
        ]);
        let llm = MappedLlm::new(&[("A", "A2"), ("C", "C2")]).failing_for("B");

        let summary = reconciler(&store, &llm)
            .run(&RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.updated, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(store.tickers(), vec!["A2", "B", "C2"]);
    }

    #[tokio::test]
    async fn second_run_over_resolved_store_performs_zero_writes() {
        let store = MemStore::new(vec![thesis(1, "ana", "FOO"), thesis(2, "bob", "GONE")]);
        let llm = MappedLlm::new(&[("FOO", "BAR"), ("GONE", "GONE_UNKNOWN")]);

        let first = reconciler(&store, &llm)
            .run(&RunOptions::default())
            .await
            .unwrap();
        assert_eq!(first.updated, 2);
        assert_eq!(store.commits().len(), 2);

        // Sentinel-marked GONE_UNKNOWN is no longer eligible; BAR resolves to
        // itself. Nothing left to write.
        let second = reconciler(&store, &llm)
            .run(&RunOptions::default())
            .await
            .unwrap();
        assert_eq!(second.processed, 1);
        assert_eq!(second.updated, 0);
        assert_eq!(store.commits().len(), 2);
    }

    #[tokio::test]
    async fn export_then_apply_matches_direct_mode() {
        let rows = || {
            vec![
                thesis(1, "ana", "FOO"),
                thesis(2, "ana", "BAZ"),
                thesis(3, "bob", "QUX"),
            ]
        };
        let mapping = [("FOO", "BAR"), ("QUX", "PRIVATE")];

        let direct_store = MemStore::new(rows());
        let direct_llm = MappedLlm::new(&mapping);
        reconciler(&direct_store, &direct_llm)
            .run(&RunOptions::default())
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let staged_store = MemStore::new(rows());
        let staged_llm = MappedLlm::new(&mapping);
        let summary = reconciler(&staged_store, &staged_llm)
            .with_out_dir(dir.path())
            .run(&RunOptions {
                batch_size: 2,
                total_limit: None,
                export: true,
            })
            .await
            .unwrap();

        let apply = apply_change_set(&staged_store, &summary.exported.unwrap())
            .await
            .unwrap();
        assert_eq!(apply.applied, 2);
        assert_eq!(apply.unchanged, 1);
        assert_eq!(apply.missing, 0);

        assert_eq!(staged_store.tickers(), direct_store.tickers());
        assert_eq!(staged_store.commits(), direct_store.commits());
    }

    #[tokio::test]
    async fn stale_change_set_rows_warn_and_do_not_stop_the_apply() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemStore::new(vec![thesis(2, "ana", "FOO")]);

        let stale = ChangeRecord {
            date: NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(),
            author: "nobody".to_string(),
            old_ticker: "GHOST".to_string(),
            new_ticker: "SEEN".to_string(),
            company_name: "Ghost Corp".to_string(),
            reasoning: "row predates a re-scrape".to_string(),
            processed_at: Utc::now(),
        };
        let good = ChangeRecord {
            date: NaiveDate::from_ymd_opt(2021, 3, 2).unwrap(),
            author: "ana".to_string(),
            old_ticker: "FOO".to_string(),
            new_ticker: "BAR".to_string(),
            company_name: "FOO Corp".to_string(),
            reasoning: "renamed".to_string(),
            processed_at: Utc::now(),
        };

        let path = dir.path().join("changes.csv");
        changeset::write_change_set(&path, &[stale, good]).unwrap();

        let summary = apply_change_set(&store, &path).await.unwrap();
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(store.tickers(), vec!["BAR"]);
    }
}
