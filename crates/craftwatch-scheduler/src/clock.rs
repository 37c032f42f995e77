//! Stage clock — pure time arithmetic for both job kinds.
//!
//! Shared by the scheduler tick and the on-demand status commands so both see
//! the same stage boundaries. No I/O, no state.

use chrono::{DateTime, Utc};
use craftwatch_core::SilkStage;
use craftwatch_core::config::{SilkConfig, SteelConfig};

/// Where a running silk cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePosition {
    pub stage: SilkStage,
    pub stage_start: DateTime<Utc>,
    pub next_transition: DateTime<Utc>,
}

/// Result of deriving a silk cycle's stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilkPhase {
    Stage(StagePosition),
    /// The final (adult → egg) boundary has passed.
    CycleComplete { ended_at: DateTime<Utc> },
}

/// Derive the silk stage of a cycle that started at `start`.
///
/// Boundaries are cumulative: larva at `start + egg`, pupa after another
/// `larva`, adult after `pupa`, cycle end after `adult`. Each stage is
/// half-open, `[stage_start, next_transition)`.
pub fn derive_silk_stage(
    config: &SilkConfig,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> SilkPhase {
    let mut stage_start = start;
    for stage in SilkStage::CYCLE {
        let next_transition = stage_start + config.phase_len(stage);
        if now < next_transition {
            return SilkPhase::Stage(StagePosition {
                stage,
                stage_start,
                next_transition,
            });
        }
        stage_start = next_transition;
    }
    SilkPhase::CycleComplete {
        ended_at: stage_start,
    }
}

/// Fuel picture of a running steel job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuelOutlook {
    pub job_end: DateTime<Utc>,
    /// `None` when the last refuel already covers the rest of the job.
    pub fuel_deadline: Option<DateTime<Utc>>,
    /// `now >= job_end`.
    pub finished: bool,
}

/// Derive the job end and the next fuel deadline of a steel job.
pub fn derive_steel_fuel_deadline(
    config: &SteelConfig,
    start: DateTime<Utc>,
    last_refuel: DateTime<Utc>,
    now: DateTime<Utc>,
) -> FuelOutlook {
    let job_end = start + config.total_duration();
    let fuel_deadline = if job_end - last_refuel <= config.fuel_interval() {
        None
    } else {
        Some(last_refuel + config.fuel_interval())
    };
    FuelOutlook {
        job_end,
        fuel_deadline,
        finished: now >= job_end,
    }
}
