//! # CraftWatch Scheduler
//!
//! Reminder scheduler for two long-running timed jobs per channel:
//! steel (refuel warnings ahead of each fuel deadline) and silk
//! (repeating stage reminders through egg → larva → pupa → adult).
//!
//! ## Architecture
//! ```text
//! spawn_scheduler (tokio interval, 30s)
//!   └── Scheduler::tick(now)
//!         ├── JobStore::active_channels()
//!         ├── per channel, one atomic update_* each:
//!         │     steel → clock::derive_steel_fuel_deadline → warn offsets
//!         │     silk  → clock::derive_silk_stage → stage repeat index
//!         ├── DedupLedger: each occurrence fires at most once
//!         └── Notifier::send (concurrent, time-bounded, best effort)
//!
//! JobCommands (start / refuel / ack / complete / targets)
//!   └── same JobStore, same stage clock
//! ```

pub mod clock;
pub mod commands;
pub mod engine;
pub mod ledger;
pub mod notify;
pub mod persistence;
pub mod store;

pub use clock::{FuelOutlook, SilkPhase, StagePosition, derive_silk_stage, derive_steel_fuel_deadline};
pub use commands::{JobCommands, SilkStatus, SteelStatus};
pub use engine::{Scheduler, spawn_scheduler};
pub use ledger::{DedupKey, DedupLedger};
pub use notify::{Alert, AlertHistory};
pub use persistence::JobDb;
pub use store::MemoryStore;
