//! CraftWatch configuration system.
//!
//! Loaded once at startup and shared immutably for the process lifetime.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CraftError, Result};
use crate::types::SilkStage;

/// Longest configurable span, so timestamp arithmetic cannot overflow.
const MAX_SPAN_MINS: u64 = 366 * 24 * 60;
/// Longest tick, tolerance or send timeout.
const MAX_SCHEDULER_SECS: u64 = 24 * 60 * 60;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CraftConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub steel: SteelConfig,
    #[serde(default)]
    pub silk: SilkConfig,
    #[serde(default)]
    pub messages: MessageConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl CraftConfig {
    /// Load config from the default path (~/.craftwatch/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            let mut config = Self::default();
            config.apply_env();
            Ok(config)
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CraftError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse, normalize and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| CraftError::Config(format!("Failed to parse config: {e}")))?;
        config.apply_env();
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// `DISCORD_TOKEN` overrides the configured bot token.
    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("DISCORD_TOKEN") {
            if !token.trim().is_empty() {
                self.discord.bot_token = token.trim().to_string();
            }
        }
    }

    fn normalize(&mut self) {
        self.steel.warn_offsets_mins.sort_unstable_by(|a, b| b.cmp(a));
        self.steel.warn_offsets_mins.dedup();
    }

    /// Reject configurations the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.tick_interval_secs == 0 {
            return Err(CraftError::Config("scheduler.tick_interval_secs must be > 0".into()));
        }
        if self.scheduler.send_timeout_secs == 0 {
            return Err(CraftError::Config("scheduler.send_timeout_secs must be > 0".into()));
        }
        for (name, secs) in [
            ("tick_interval_secs", self.scheduler.tick_interval_secs),
            ("tolerance_secs", self.scheduler.tolerance_secs),
            ("send_timeout_secs", self.scheduler.send_timeout_secs),
        ] {
            if secs > MAX_SCHEDULER_SECS {
                return Err(CraftError::Config(format!(
                    "scheduler.{name} must be at most {MAX_SCHEDULER_SECS}"
                )));
            }
        }
        if self.steel.total_duration_mins == 0 || self.steel.fuel_interval_mins == 0 {
            return Err(CraftError::Config("steel durations must be > 0".into()));
        }
        if let Some(bad) = self
            .steel
            .warn_offsets_mins
            .iter()
            .find(|o| **o == 0 || **o >= self.steel.fuel_interval_mins)
        {
            return Err(CraftError::Config(format!(
                "steel warn offset {bad}m must be > 0 and below the fuel interval ({}m)",
                self.steel.fuel_interval_mins
            )));
        }
        let silk = &self.silk;
        let spans = [
            ("steel.total_duration_mins", self.steel.total_duration_mins),
            ("steel.fuel_interval_mins", self.steel.fuel_interval_mins),
            ("silk.egg_mins", silk.egg_mins),
            ("silk.larva_mins", silk.larva_mins),
            ("silk.pupa_mins", silk.pupa_mins),
            ("silk.adult_mins", silk.adult_mins),
            ("silk.repeat_larva_mins", silk.repeat_larva_mins),
            ("silk.repeat_pupa_mins", silk.repeat_pupa_mins),
            ("silk.repeat_adult_mins", silk.repeat_adult_mins),
        ];
        if let Some((name, _)) = spans.iter().find(|(_, m)| *m > MAX_SPAN_MINS) {
            return Err(CraftError::Config(format!(
                "{name} must be at most {MAX_SPAN_MINS} minutes"
            )));
        }
        if [silk.egg_mins, silk.larva_mins, silk.pupa_mins, silk.adult_mins].contains(&0) {
            return Err(CraftError::Config("silk phase durations must be > 0".into()));
        }
        if [silk.repeat_larva_mins, silk.repeat_pupa_mins, silk.repeat_adult_mins].contains(&0) {
            return Err(CraftError::Config("silk repeat intervals must be > 0".into()));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the CraftWatch home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".craftwatch")
    }
}

/// Tick cadence and matching tolerance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_tolerance")]
    pub tolerance_secs: u64,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_tick_interval() -> u64 { 30 }
fn default_tolerance() -> u64 { 20 }
fn default_send_timeout() -> u64 { 10 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            tolerance_secs: default_tolerance(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_interval_secs)
    }

    /// Symmetric window around a fire instant that counts as a hit.
    pub fn tolerance(&self) -> Duration {
        Duration::seconds(self.tolerance_secs.min(MAX_SCHEDULER_SECS) as i64)
    }

    pub fn send_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.send_timeout_secs)
    }
}

/// Steel job timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteelConfig {
    #[serde(default = "default_steel_total")]
    pub total_duration_mins: u64,
    #[serde(default = "default_fuel_interval")]
    pub fuel_interval_mins: u64,
    /// Minutes before the fuel deadline at which to warn, descending.
    #[serde(default = "default_warn_offsets")]
    pub warn_offsets_mins: Vec<u64>,
}

fn default_steel_total() -> u64 { 34 * 60 }
fn default_fuel_interval() -> u64 { 7 * 60 + 30 }
fn default_warn_offsets() -> Vec<u64> { vec![180, 120, 60, 30] }

impl Default for SteelConfig {
    fn default() -> Self {
        Self {
            total_duration_mins: default_steel_total(),
            fuel_interval_mins: default_fuel_interval(),
            warn_offsets_mins: default_warn_offsets(),
        }
    }
}

impl SteelConfig {
    pub fn total_duration(&self) -> Duration {
        minutes(self.total_duration_mins)
    }

    pub fn fuel_interval(&self) -> Duration {
        minutes(self.fuel_interval_mins)
    }

    pub fn warn_offsets(&self) -> impl Iterator<Item = Duration> + '_ {
        self.warn_offsets_mins.iter().map(|m| minutes(*m))
    }
}

/// Silk cycle timings. Phase lengths are the time spent *in* each stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilkConfig {
    #[serde(default = "default_egg")]
    pub egg_mins: u64,
    #[serde(default = "default_larva")]
    pub larva_mins: u64,
    #[serde(default = "default_pupa")]
    pub pupa_mins: u64,
    #[serde(default = "default_adult")]
    pub adult_mins: u64,
    #[serde(default = "default_repeat_larva")]
    pub repeat_larva_mins: u64,
    #[serde(default = "default_repeat_pupa")]
    pub repeat_pupa_mins: u64,
    #[serde(default = "default_repeat_adult")]
    pub repeat_adult_mins: u64,
}

fn default_egg() -> u64 { 4 * 60 + 52 }
fn default_larva() -> u64 { 9 * 60 + 44 }
fn default_pupa() -> u64 { 9 * 60 + 44 }
fn default_adult() -> u64 { 5 * 60 + 30 }
fn default_repeat_larva() -> u64 { 30 }
fn default_repeat_pupa() -> u64 { 120 }
fn default_repeat_adult() -> u64 { 60 }

impl Default for SilkConfig {
    fn default() -> Self {
        Self {
            egg_mins: default_egg(),
            larva_mins: default_larva(),
            pupa_mins: default_pupa(),
            adult_mins: default_adult(),
            repeat_larva_mins: default_repeat_larva(),
            repeat_pupa_mins: default_repeat_pupa(),
            repeat_adult_mins: default_repeat_adult(),
        }
    }
}

impl SilkConfig {
    /// How long the cycle stays in `stage`.
    pub fn phase_len(&self, stage: SilkStage) -> Duration {
        match stage {
            SilkStage::Idle => Duration::zero(),
            SilkStage::Egg => minutes(self.egg_mins),
            SilkStage::Larva => minutes(self.larva_mins),
            SilkStage::Pupa => minutes(self.pupa_mins),
            SilkStage::Adult => minutes(self.adult_mins),
        }
    }

    /// Repeat interval for stage reminders. The egg stage has none.
    pub fn repeat_interval(&self, stage: SilkStage) -> Option<Duration> {
        match stage {
            SilkStage::Larva => Some(minutes(self.repeat_larva_mins)),
            SilkStage::Pupa => Some(minutes(self.repeat_pupa_mins)),
            SilkStage::Adult => Some(minutes(self.repeat_adult_mins)),
            SilkStage::Idle | SilkStage::Egg => None,
        }
    }
}

/// Alert texts. Mentions are prepended by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    #[serde(default = "default_steel_refuel")]
    pub steel_refuel: String,
    #[serde(default = "default_silk_larva")]
    pub silk_larva: String,
    #[serde(default = "default_silk_pupa")]
    pub silk_pupa: String,
    #[serde(default = "default_silk_adult")]
    pub silk_adult: String,
}

fn default_steel_refuel() -> String { "Steel furnace needs refuelling!".into() }
fn default_silk_larva() -> String { "The silkworm eggs have hatched.".into() }
fn default_silk_pupa() -> String { "The silkworms have pupated.".into() }
fn default_silk_adult() -> String { "The silkworms have become moths.".into() }

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            steel_refuel: default_steel_refuel(),
            silk_larva: default_silk_larva(),
            silk_pupa: default_silk_pupa(),
            silk_adult: default_silk_adult(),
        }
    }
}

impl MessageConfig {
    pub fn silk_stage(&self, stage: SilkStage) -> Option<&str> {
        match stage {
            SilkStage::Larva => Some(self.silk_larva.as_str()),
            SilkStage::Pupa => Some(self.silk_pupa.as_str()),
            SilkStage::Adult => Some(self.silk_adult.as_str()),
            SilkStage::Idle | SilkStage::Egg => None,
        }
    }
}

/// Discord transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String { "https://discord.com/api/v10".into() }

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_api_base(),
        }
    }
}

/// Where job state lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String { "~/.craftwatch/craftwatch.db".into() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

impl StorageConfig {
    /// `db_path` with `~` expanded.
    pub fn resolved_db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_path).to_string())
    }
}

/// Validated configs stay far below `MAX_SPAN_MINS`; anything larger saturates.
fn minutes(m: u64) -> Duration {
    i64::try_from(m.min(MAX_SPAN_MINS))
        .ok()
        .and_then(Duration::try_minutes)
        .unwrap_or(Duration::zero())
}
