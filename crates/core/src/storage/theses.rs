use crate::domain::decision::{PRIVATE_TICKER, UNKNOWN_SUFFIX};
use crate::domain::thesis::{ThesisKey, ThesisRecord};
use crate::storage::ThesisStore;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

const RECORD_COLUMNS: &str = "date, author, ticker, company_name, link, market_cap, price, text, \
                              profile, daily_price, dividends, created_at";

#[derive(Debug, Clone)]
pub struct PgThesisStore {
    pool: sqlx::PgPool,
}

impl PgThesisStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl ThesisStore for PgThesisStore {
    async fn fetch_eligible_batch(
        &self,
        batch_size: usize,
        offset: usize,
    ) -> anyhow::Result<Vec<ThesisRecord>> {
        // The legacy ingester wrote the empty history either as a JSON array
        // or as a double-encoded string; both count as missing.
        let sql = format!(
            "SELECT {RECORD_COLUMNS} \
             FROM thesis \
             WHERE (daily_price IS NULL \
                    OR daily_price = 'null'::jsonb \
                    OR daily_price = '[]'::jsonb \
                    OR daily_price = '\"[]\"'::jsonb) \
               AND ticker <> $3 \
               AND ticker NOT LIKE $4 \
             ORDER BY date, author, ticker \
             LIMIT $1 OFFSET $2"
        );

        // Underscore is a LIKE wildcard; match the suffix literally.
        let unknown_pattern = format!("%\\{UNKNOWN_SUFFIX}");

        let rows = sqlx::query_as::<_, ThesisRow>(&sql)
            .persistent(false)
            .bind(batch_size as i64)
            .bind(offset as i64)
            .bind(PRIVATE_TICKER)
            .bind(unknown_pattern)
            .fetch_all(&self.pool)
            .await
            .context("fetch eligible thesis batch failed")?;

        Ok(rows.into_iter().map(ThesisRecord::from).collect())
    }

    async fn commit_ticker_change(
        &self,
        key: &ThesisKey,
        new_ticker: &str,
    ) -> anyhow::Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin transaction failed")?;

        // Ticker is part of the primary key: this UPDATE re-identifies the
        // row in place, keeping every other column.
        let res = sqlx::query(
            "UPDATE thesis SET ticker = $1 WHERE date = $2 AND author = $3 AND ticker = $4",
        )
        .persistent(false)
        .bind(new_ticker)
        .bind(key.date)
        .bind(&key.author)
        .bind(&key.ticker)
        .execute(&mut *tx)
        .await;

        match res {
            Ok(done) if done.rows_affected() == 1 => {
                tx.commit().await.context("commit ticker change failed")?;
                Ok(true)
            }
            Ok(done) => {
                tracing::warn!(
                    key = %key,
                    new_ticker,
                    rows = done.rows_affected(),
                    "ticker change matched no row; rolling back"
                );
                let _ = tx.rollback().await;
                Ok(false)
            }
            Err(err) => {
                // Key collisions (the new ticker already exists for the same
                // date/author) land here; isolated to this record.
                tracing::warn!(key = %key, new_ticker, error = %err, "ticker change failed; rolling back");
                let _ = tx.rollback().await;
                Ok(false)
            }
        }
    }

    async fn find_by_key(&self, key: &ThesisKey) -> anyhow::Result<Option<ThesisRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM thesis WHERE date = $1 AND author = $2 AND ticker = $3"
        );

        let row = sqlx::query_as::<_, ThesisRow>(&sql)
            .persistent(false)
            .bind(key.date)
            .bind(&key.author)
            .bind(&key.ticker)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("thesis lookup failed for {key}"))?;

        Ok(row.map(ThesisRecord::from))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ThesisRow {
    date: NaiveDate,
    author: String,
    ticker: String,
    company_name: Option<String>,
    link: Option<String>,
    market_cap: Option<f64>,
    price: Option<f64>,
    text: Option<String>,
    profile: Option<Value>,
    daily_price: Option<Value>,
    dividends: Option<Value>,
    created_at: Option<DateTime<Utc>>,
}

impl From<ThesisRow> for ThesisRecord {
    fn from(row: ThesisRow) -> Self {
        ThesisRecord {
            date: row.date,
            author: row.author,
            ticker: row.ticker,
            company_name: row.company_name,
            link: row.link,
            market_cap: row.market_cap,
            price: row.price,
            text: row.text,
            profile: row.profile,
            daily_price: row.daily_price,
            dividends: row.dividends,
            created_at: row.created_at,
        }
    }
}
