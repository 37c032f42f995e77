//! Alerts produced by a tick, and a bounded history of recent ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

use craftwatch_core::{ChannelId, JobKind, SilkStage, UserId};

/// Max alerts kept in history.
const HISTORY_LIMIT: usize = 100;

/// One notification request handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub channel: ChannelId,
    pub kind: JobKind,
    /// Silk stage the alert is about (`None` for steel).
    pub stage: Option<SilkStage>,
    /// Full message text, mentions included.
    pub text: String,
    /// Boundary instant the alert belongs to.
    pub fire_time: DateTime<Utc>,
    /// Tick instant that produced it.
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Build an alert mentioning every target.
    pub fn new(
        channel: ChannelId,
        kind: JobKind,
        stage: Option<SilkStage>,
        targets: &BTreeSet<UserId>,
        message: &str,
        fire_time: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            channel,
            kind,
            stage,
            text: format!("{} {}", mention_list(targets), message),
            fire_time,
            created_at,
        }
    }
}

/// Space-separated mentions, in id order.
pub fn mention_list(targets: &BTreeSet<UserId>) -> String {
    targets
        .iter()
        .map(UserId::mention)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ring buffer of the most recent alerts.
#[derive(Debug, Default)]
pub struct AlertHistory {
    entries: VecDeque<Alert>,
}

impl AlertHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an emitted alert, evicting the oldest past the limit.
    pub fn record(&mut self, alert: Alert) {
        self.entries.push_back(alert);
        if self.entries.len() > HISTORY_LIMIT {
            self.entries.pop_front();
        }
    }

    pub fn recent(&self) -> Vec<Alert> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
