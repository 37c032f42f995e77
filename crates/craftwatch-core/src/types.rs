//! Per-channel job state and audience identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CraftError;

/// A chat channel that owns job state (a Discord channel snowflake).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChannelId {
    type Err = CraftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(ChannelId)
            .map_err(|_| CraftError::InvalidArgument(format!("bad channel id '{s}'")))
    }
}

/// A member of a job's audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl UserId {
    /// Chat mention markup for this member.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = CraftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept raw ids as well as pasted mentions (`<@123>`, `<@!123>`).
        let raw = s
            .trim()
            .trim_start_matches("<@")
            .trim_start_matches('!')
            .trim_end_matches('>');
        raw.parse()
            .map(UserId)
            .map_err(|_| CraftError::InvalidArgument(format!("bad user id '{s}'")))
    }
}

/// The two independent job kinds tracked per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Steel,
    Silk,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Steel => "steel",
            JobKind::Silk => "silk",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = CraftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "steel" => Ok(JobKind::Steel),
            "silk" => Ok(JobKind::Silk),
            other => Err(CraftError::InvalidArgument(format!("unknown job kind '{other}'"))),
        }
    }
}

/// Silk cycle stage. `Idle` is the persisted `none` stage (no cycle running).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SilkStage {
    #[serde(rename = "none")]
    Idle,
    Egg,
    Larva,
    Pupa,
    Adult,
}

impl SilkStage {
    /// Stages of one cycle, in order.
    pub const CYCLE: [SilkStage; 4] = [
        SilkStage::Egg,
        SilkStage::Larva,
        SilkStage::Pupa,
        SilkStage::Adult,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SilkStage::Idle => "none",
            SilkStage::Egg => "egg",
            SilkStage::Larva => "larva",
            SilkStage::Pupa => "pupa",
            SilkStage::Adult => "adult",
        }
    }

    /// Decode a stored stage. Unknown text reads as `Idle`.
    pub fn from_stored(s: &str) -> Self {
        s.parse().unwrap_or(SilkStage::Idle)
    }
}

impl fmt::Display for SilkStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SilkStage {
    type Err = CraftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(SilkStage::Idle),
            "egg" => Ok(SilkStage::Egg),
            "larva" => Ok(SilkStage::Larva),
            "pupa" => Ok(SilkStage::Pupa),
            "adult" => Ok(SilkStage::Adult),
            other => Err(CraftError::InvalidArgument(format!("unknown silk stage '{other}'"))),
        }
    }
}

/// Steel job state of one channel.
///
/// `start_ts` and `last_refuel_ts` are set iff `active`. Rows that break this
/// are treated as "no active job" by readers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SteelState {
    pub active: bool,
    pub start_ts: Option<DateTime<Utc>>,
    pub last_refuel_ts: Option<DateTime<Utc>>,
}

impl SteelState {
    /// A job started (and fuelled) at `now`.
    pub fn started(now: DateTime<Utc>) -> Self {
        Self {
            active: true,
            start_ts: Some(now),
            last_refuel_ts: Some(now),
        }
    }

    /// `(start, last_refuel)` of a well-formed active job.
    pub fn running(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        if !self.active {
            return None;
        }
        Some((self.start_ts?, self.last_refuel_ts?))
    }
}

/// Silk job state of one channel.
///
/// `stage == Idle` iff `start_ts` is unset. `start_ts` is the instant the egg
/// stage began and never changes during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilkState {
    pub stage: SilkStage,
    pub start_ts: Option<DateTime<Utc>>,
    pub ack_stage: Option<SilkStage>,
}

impl Default for SilkState {
    fn default() -> Self {
        Self {
            stage: SilkStage::Idle,
            start_ts: None,
            ack_stage: None,
        }
    }
}

impl SilkState {
    /// A fresh cycle whose egg stage begins at `now`.
    pub fn started(now: DateTime<Utc>) -> Self {
        Self {
            stage: SilkStage::Egg,
            start_ts: Some(now),
            ack_stage: None,
        }
    }

    /// Cycle start of a well-formed running cycle.
    pub fn cycle_start(&self) -> Option<DateTime<Utc>> {
        if self.stage == SilkStage::Idle {
            return None;
        }
        self.start_ts
    }
}
