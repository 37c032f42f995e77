//! # CraftWatch Core
//!
//! Types shared by the scheduler, the stores and the transports:
//! per-channel job state, the audience model, configuration, the error
//! type and the collaborator traits (`JobStore`, `Notifier`, `Clock`).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::CraftConfig;
pub use error::{CraftError, Result};
pub use traits::{Clock, JobStore, Notifier, SystemClock};
pub use types::{ChannelId, JobKind, SilkStage, SilkState, SteelState, UserId};
