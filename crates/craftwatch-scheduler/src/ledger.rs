//! Dedup ledger — in-memory record of alert occurrences already handled.
//!
//! Process-local and never persisted. A restart forgets everything, so an
//! event whose tolerance window is still open can fire once more.

use std::collections::HashSet;
use std::sync::Mutex;

use craftwatch_core::{ChannelId, JobKind, SilkStage};

/// One concrete alert occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// A steel warning, keyed by its fire instant (Unix seconds, floored).
    Steel { channel: ChannelId, fire_at: i64 },
    /// The `occurrence`-th repeat of a silk stage within the cycle that
    /// started at `cycle_start` (Unix seconds).
    Silk {
        channel: ChannelId,
        cycle_start: i64,
        stage: SilkStage,
        occurrence: i64,
    },
}

impl DedupKey {
    pub fn channel(&self) -> ChannelId {
        match self {
            DedupKey::Steel { channel, .. } | DedupKey::Silk { channel, .. } => *channel,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            DedupKey::Steel { .. } => JobKind::Steel,
            DedupKey::Silk { .. } => JobKind::Silk,
        }
    }
}

/// Set of fired keys. `record` is an atomic check-then-insert.
#[derive(Debug, Default)]
pub struct DedupLedger {
    fired: Mutex<HashSet<DedupKey>>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.lock().contains(key)
    }

    /// Record `key`. Returns `false` if it was already recorded.
    pub fn record(&self, key: DedupKey) -> bool {
        self.lock().insert(key)
    }

    /// Drop every key of one channel's job. Returns how many were removed.
    pub fn forget(&self, channel: ChannelId, kind: JobKind) -> usize {
        let mut fired = self.lock();
        let before = fired.len();
        fired.retain(|k| k.channel() != channel || k.kind() != kind);
        before - fired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<DedupKey>> {
        // The set stays consistent even if a holder panicked.
        self.fired.lock().unwrap_or_else(|e| e.into_inner())
    }
}
