//! Public types for the sync orchestrator.

use crate::record::{MirrorRecord, RawRecord};

/// Caller-supplied directive controlling whether mirror data may be
/// trusted without a refetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessHint {
    /// Trust the mirror inside the soft TTL
    CachedOk,
    /// Refetch regardless of mirror age
    Strict,
}

impl std::fmt::Display for FreshnessHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CachedOk => write!(f, "cached_ok"),
            Self::Strict => write!(f, "strict"),
        }
    }
}

/// Tagged result of a read. Reads never raise: every failure mode folds
/// into one of these, and callers pattern-match instead of catching.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Mirror was inside the soft TTL; no fetch happened
    Fresh(Vec<MirrorRecord>),
    /// A fetch ran and the mirror now reflects it
    Refreshed {
        records: Vec<MirrorRecord>,
        source_version: String,
    },
    /// Another caller held the fetch lease past the bounded wait; mirror
    /// returned as-is
    Contended(Vec<MirrorRecord>),
    /// The fetch (or its persistence) failed; last-known mirror rows
    /// returned. `hard_expired` marks data past the hard TTL —
    /// unusable-but-returned.
    Degraded {
        records: Vec<MirrorRecord>,
        hard_expired: bool,
        error: String,
    },
    /// The fetch failed and the mirror could not be read either
    Unavailable { error: String },
}

impl ReadOutcome {
    /// The records carried by this outcome (empty for `Unavailable`).
    #[must_use]
    pub fn records(&self) -> &[MirrorRecord] {
        match self {
            Self::Fresh(records)
            | Self::Contended(records)
            | Self::Refreshed { records, .. }
            | Self::Degraded { records, .. } => records,
            Self::Unavailable { .. } => &[],
        }
    }

    #[must_use]
    pub fn into_records(self) -> Vec<MirrorRecord> {
        match self {
            Self::Fresh(records)
            | Self::Contended(records)
            | Self::Refreshed { records, .. }
            | Self::Degraded { records, .. } => records,
            Self::Unavailable { .. } => Vec::new(),
        }
    }

    /// True when the data served did not come from a successful in-window
    /// sync (degraded or missing entirely).
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. } | Self::Unavailable { .. })
    }

    /// Label for metrics and span fields
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fresh(_) => "fresh",
            Self::Refreshed { .. } => "refreshed",
            Self::Contended(_) => "contended",
            Self::Degraded { .. } => "degraded",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

/// Result of an idempotent write.
#[derive(Debug, Clone)]
pub struct WriteReceipt {
    /// The rail's resulting record (stored one if replayed)
    pub record: RawRecord,
    pub idem_key: String,
    /// True when this call was answered from the idempotency store
    /// without touching the rail
    pub replayed: bool,
}
