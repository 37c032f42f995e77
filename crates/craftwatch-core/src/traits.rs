//! Collaborator traits the scheduler is built against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::error::Result;
use crate::types::{ChannelId, JobKind, SilkState, SteelState, UserId};

/// Durable per-channel job state and audience membership.
///
/// Missing rows read as the inactive defaults. `update_*` run the closure as a
/// single read-modify-write of one channel's state and return the state that
/// was left behind; nothing else may interleave with it.
pub trait JobStore: Send + Sync {
    /// Channels with an active steel job or a running silk cycle.
    fn active_channels(&self) -> Result<Vec<ChannelId>>;

    fn get_steel(&self, channel: ChannelId) -> Result<SteelState>;
    fn set_steel(&self, channel: ChannelId, state: &SteelState) -> Result<()>;
    fn update_steel(
        &self,
        channel: ChannelId,
        f: &mut dyn FnMut(&mut SteelState),
    ) -> Result<SteelState>;

    fn get_silk(&self, channel: ChannelId) -> Result<SilkState>;
    fn set_silk(&self, channel: ChannelId, state: &SilkState) -> Result<()>;
    fn update_silk(
        &self,
        channel: ChannelId,
        f: &mut dyn FnMut(&mut SilkState),
    ) -> Result<SilkState>;

    fn get_targets(&self, channel: ChannelId, kind: JobKind) -> Result<BTreeSet<UserId>>;
    fn add_targets(&self, channel: ChannelId, kind: JobKind, users: &[UserId]) -> Result<()>;
    fn remove_targets(&self, channel: ChannelId, kind: JobKind, users: &[UserId]) -> Result<()>;
}

/// Best-effort text delivery to a channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    async fn send(&self, channel: ChannelId, text: &str) -> Result<()>;
}

/// Source of "now" for the tick driver.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
