/// Wire value standing in for "company believed delisted or taken private".
pub const PRIVATE_TICKER: &str = "PRIVATE";

/// Wire suffix standing in for "no confident match found for this ticker".
pub const UNKNOWN_SUFFIX: &str = "_UNKNOWN";

/// True for any reserved value that is not a real symbol.
pub fn is_sentinel_ticker(ticker: &str) -> bool {
    let t = ticker.trim();
    t == PRIVATE_TICKER || t.ends_with(UNKNOWN_SUFFIX)
}

/// Outcome of one matching pass, decoded from the wire sentinel encoding
/// exactly once. Internal logic branches on this tag, never on the strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// A real ticker symbol was resolved.
    Resolved(String),
    /// The company is believed delisted or taken private.
    Private,
    /// No confident match; `original` is the ticker the record carried.
    Unknown { original: String },
}

impl MatchOutcome {
    pub fn from_wire(selected: &str) -> Self {
        let t = selected.trim();
        if t == PRIVATE_TICKER {
            return MatchOutcome::Private;
        }
        if let Some(original) = t.strip_suffix(UNKNOWN_SUFFIX) {
            return MatchOutcome::Unknown {
                original: original.to_string(),
            };
        }
        MatchOutcome::Resolved(t.to_string())
    }

    /// Encode back to the sentinel form used by the store and the change-set
    /// file. `from_wire(x).to_wire() == x` for trimmed inputs.
    pub fn to_wire(&self) -> String {
        match self {
            MatchOutcome::Resolved(ticker) => ticker.clone(),
            MatchOutcome::Private => PRIVATE_TICKER.to_string(),
            MatchOutcome::Unknown { original } => format!("{original}{UNKNOWN_SUFFIX}"),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, MatchOutcome::Unknown { .. })
    }
}

/// Final product of the decision engine for one record.
#[derive(Debug, Clone)]
pub struct MatchDecision {
    pub outcome: MatchOutcome,
    pub reasoning: String,
}

impl MatchDecision {
    /// Synthesized "no confident match" decision. Used when the structured
    /// LLM response cannot be decoded, so every input yields a decision.
    pub fn unknown(original_ticker: &str, reasoning: impl Into<String>) -> Self {
        Self {
            outcome: MatchOutcome::Unknown {
                original: original_ticker.to_string(),
            },
            reasoning: reasoning.into(),
        }
    }
}
