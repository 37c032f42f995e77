//! Job commands — the mutating surface used by operators.
//!
//! Every state change is a single `update_*` call on the store, so a command
//! never interleaves with a tick's read-modify-write of the same channel.
//! Status queries share the stage clock with the scheduler but never write
//! stage transitions; those belong to the tick.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use craftwatch_core::{
    ChannelId, CraftConfig, CraftError, JobKind, JobStore, Result, SilkStage, SilkState,
    SteelState, UserId,
};

use crate::clock::{SilkPhase, StagePosition, derive_silk_stage, derive_steel_fuel_deadline};

/// Snapshot of a running steel job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SteelStatus {
    pub started_at: DateTime<Utc>,
    pub last_refuel: DateTime<Utc>,
    pub job_end: DateTime<Utc>,
    /// Time left until `job_end`, floored at zero.
    pub remaining: Duration,
    pub fuel_deadline: Option<DateTime<Utc>>,
}

/// Snapshot of a running silk cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SilkStatus {
    pub started_at: DateTime<Utc>,
    pub position: StagePosition,
    /// Reminders for the current stage are silenced.
    pub acked: bool,
}

/// Command handlers over a shared store.
pub struct JobCommands {
    config: Arc<CraftConfig>,
    store: Arc<dyn JobStore>,
}

impl JobCommands {
    pub fn new(config: Arc<CraftConfig>, store: Arc<dyn JobStore>) -> Self {
        Self { config, store }
    }

    // ─── Audience ──────────────────────────────────────────

    pub fn add_targets(&self, channel: ChannelId, kind: JobKind, users: &[UserId]) -> Result<()> {
        if users.is_empty() {
            return Err(CraftError::InvalidArgument("no users given".into()));
        }
        self.store.add_targets(channel, kind, users)?;
        tracing::info!("👥 Added {} {kind} target(s) in channel {channel}", users.len());
        Ok(())
    }

    pub fn remove_targets(
        &self,
        channel: ChannelId,
        kind: JobKind,
        users: &[UserId],
    ) -> Result<()> {
        if users.is_empty() {
            return Err(CraftError::InvalidArgument("no users given".into()));
        }
        self.store.remove_targets(channel, kind, users)?;
        tracing::info!("👥 Removed {} {kind} target(s) in channel {channel}", users.len());
        Ok(())
    }

    pub fn list_targets(&self, channel: ChannelId, kind: JobKind) -> Result<BTreeSet<UserId>> {
        self.store.get_targets(channel, kind)
    }

    // ─── Steel ─────────────────────────────────────────────

    /// Start a steel job at `now`. Refused while one is active.
    pub fn start_steel(&self, channel: ChannelId, now: DateTime<Utc>) -> Result<SteelState> {
        let mut started = false;
        let state = self
            .store
            .update_steel(channel, &mut |state: &mut SteelState| {
                started = !state.active;
                if started {
                    *state = SteelState::started(now);
                }
            })?;
        if !started {
            return Err(CraftError::JobAlreadyActive(JobKind::Steel));
        }
        tracing::info!("🔥 Steel job started in channel {channel}");
        Ok(state)
    }

    pub fn steel_status(&self, channel: ChannelId, now: DateTime<Utc>) -> Result<SteelStatus> {
        let state = self.store.get_steel(channel)?;
        let (started_at, last_refuel) = state
            .running()
            .ok_or(CraftError::NoActiveJob(JobKind::Steel))?;
        let outlook = derive_steel_fuel_deadline(&self.config.steel, started_at, last_refuel, now);
        Ok(SteelStatus {
            started_at,
            last_refuel,
            job_end: outlook.job_end,
            remaining: (outlook.job_end - now).max(Duration::zero()),
            fuel_deadline: outlook.fuel_deadline,
        })
    }

    /// Record a refuel at `now`.
    pub fn refuel_steel(&self, channel: ChannelId, now: DateTime<Utc>) -> Result<SteelState> {
        let mut refuelled = false;
        let state = self
            .store
            .update_steel(channel, &mut |state: &mut SteelState| {
                refuelled = state.running().is_some();
                if refuelled {
                    state.last_refuel_ts = Some(now);
                }
            })?;
        if !refuelled {
            return Err(CraftError::NoActiveJob(JobKind::Steel));
        }
        tracing::info!("⛽ Steel refuelled in channel {channel}");
        Ok(state)
    }

    /// Clear the steel job unconditionally.
    pub fn complete_steel(&self, channel: ChannelId) -> Result<()> {
        self.store
            .update_steel(channel, &mut |state: &mut SteelState| {
                *state = SteelState::default();
            })?;
        tracing::info!("🏁 Steel job reset in channel {channel}");
        Ok(())
    }

    // ─── Silk ──────────────────────────────────────────────

    /// Start a silk cycle (egg stage) at `now`. Refused while one is running.
    pub fn start_silk(&self, channel: ChannelId, now: DateTime<Utc>) -> Result<SilkState> {
        let mut started = false;
        let state = self
            .store
            .update_silk(channel, &mut |state: &mut SilkState| {
                started = state.stage == SilkStage::Idle;
                if started {
                    *state = SilkState::started(now);
                }
            })?;
        if !started {
            return Err(CraftError::JobAlreadyActive(JobKind::Silk));
        }
        tracing::info!("🥚 Silk cycle started in channel {channel}");
        Ok(state)
    }

    /// Current stage, derived from the cycle start. A cycle whose end has
    /// passed is reset.
    pub fn silk_status(&self, channel: ChannelId, now: DateTime<Utc>) -> Result<SilkStatus> {
        self.sync_silk(channel, now, false)
    }

    /// Silence repeat reminders for the current stage. Only `ack_stage` is
    /// written.
    pub fn ack_silk(&self, channel: ChannelId, now: DateTime<Utc>) -> Result<SilkStatus> {
        let status = self.sync_silk(channel, now, true)?;
        tracing::info!(
            "🔕 Silk {} reminders acknowledged in channel {channel}",
            status.position.stage
        );
        Ok(status)
    }

    /// Clear the silk cycle unconditionally.
    pub fn complete_silk(&self, channel: ChannelId) -> Result<()> {
        self.store
            .update_silk(channel, &mut |state: &mut SilkState| {
                *state = SilkState::default();
            })?;
        tracing::info!("🏁 Silk cycle reset in channel {channel}");
        Ok(())
    }

    fn sync_silk(&self, channel: ChannelId, now: DateTime<Utc>, ack: bool) -> Result<SilkStatus> {
        let silk = &self.config.silk;
        let mut status = None;
        self.store
            .update_silk(channel, &mut |state: &mut SilkState| {
                status = None;
                let Some(started_at) = state.cycle_start() else {
                    return;
                };
                match derive_silk_stage(silk, started_at, now) {
                    SilkPhase::CycleComplete { .. } => *state = SilkState::default(),
                    SilkPhase::Stage(position) => {
                        if ack {
                            state.ack_stage = Some(position.stage);
                        }
                        status = Some(SilkStatus {
                            started_at,
                            position,
                            acked: state.ack_stage == Some(position.stage),
                        });
                    }
                }
            })?;
        status.ok_or(CraftError::NoActiveJob(JobKind::Silk))
    }
}
