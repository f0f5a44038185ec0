use crate::domain::decision::is_sentinel_ticker;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A stored investment thesis. Identified by the composite natural key
/// (date, author, ticker); a ticker rewrite re-identifies the record rather
/// than updating an ordinary field.
#[derive(Debug, Clone)]
pub struct ThesisRecord {
    pub date: NaiveDate,
    pub author: String,
    pub ticker: String,
    pub company_name: Option<String>,
    pub link: Option<String>,
    pub market_cap: Option<f64>,
    pub price: Option<f64>,
    pub text: Option<String>,
    pub profile: Option<Value>,
    /// List of date/performance pairs filled by the financial-data ingester.
    /// Null or an empty serialized list marks the record for reconciliation.
    pub daily_price: Option<Value>,
    pub dividends: Option<Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl ThesisRecord {
    pub fn key(&self) -> ThesisKey {
        ThesisKey {
            date: self.date,
            author: self.author.clone(),
            ticker: self.ticker.clone(),
        }
    }

    /// The legacy ingester wrote the empty history both as `[]` and as the
    /// double-encoded string `"[]"`; both count as missing.
    pub fn has_price_history(&self) -> bool {
        match &self.daily_price {
            None | Some(Value::Null) => false,
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::String(s)) => {
                let t = s.trim();
                !t.is_empty() && t != "[]"
            }
            Some(_) => true,
        }
    }

    /// Eligibility predicate for the batch loop: no price history yet, and
    /// the ticker is not an already-resolved sentinel.
    pub fn needs_reconciliation(&self) -> bool {
        !self.has_price_history() && !is_sentinel_ticker(&self.ticker)
    }
}

/// The (date, author, ticker) tuple that uniquely identifies a thesis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThesisKey {
    pub date: NaiveDate,
    pub author: String,
    pub ticker: String,
}

impl fmt::Display for ThesisKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.date, self.author, self.ticker)
    }
}

/// One row of a change-set. Field order is the column contract of the
/// change-set file: a file written by an export run must always be readable
/// by a later apply run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub date: NaiveDate,
    pub author: String,
    pub old_ticker: String,
    pub new_ticker: String,
    pub company_name: String,
    pub reasoning: String,
    pub processed_at: DateTime<Utc>,
}

impl ChangeRecord {
    /// Key of the record this change was proposed against.
    pub fn old_key(&self) -> ThesisKey {
        ThesisKey {
            date: self.date,
            author: self.author.clone(),
            ticker: self.old_ticker.clone(),
        }
    }
}
