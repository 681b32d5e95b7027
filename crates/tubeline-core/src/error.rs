//! Per-item outcome classification

/// Why a single external call for one work item did not produce a result.
///
/// The kind decides what the engine does next:
/// - `Absent`: expected condition (comments disabled, no captions) → `skipped`
/// - `Transient`: network blip, throttling, malformed-but-plausible reply → retry
/// - `Permanent`: provider rejected this particular item → `failed`, no retry
/// - `Fatal`: auth revoked, quota gone, bad configuration → abort the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    Absent(String),
    Transient(String),
    Permanent(String),
    Fatal(String),
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent(r) => write!(f, "not available: {r}"),
            Self::Transient(r) => write!(f, "transient: {r}"),
            Self::Permanent(r) => write!(f, "rejected: {r}"),
            Self::Fatal(r) => write!(f, "fatal: {r}"),
        }
    }
}

impl std::error::Error for ItemError {}

impl ItemError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Absent(r) | Self::Transient(r) | Self::Permanent(r) | Self::Fatal(r) => r,
        }
    }
}

/// Fatal condition raised while processing `item_id`; aborts the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fatal {
    pub item_id: String,
    pub reason: String,
}

impl std::fmt::Display for Fatal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (while processing {})", self.reason, self.item_id)
    }
}

impl std::error::Error for Fatal {}
