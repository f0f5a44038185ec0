pub mod yahoo;

use serde::{Deserialize, Serialize};

/// One candidate match from the symbol directory. Produced per-query and
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub symbol: String,
    pub name: String,
    pub exchange: String,
}

/// Best-effort symbol directory lookup. Implementations recover provider-side
/// failures as "no candidates found": log and return the empty vec. A later
/// fallback stage can still proceed, so nothing is propagated.
#[async_trait::async_trait]
pub trait SymbolSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Vec<SearchCandidate>;
}
