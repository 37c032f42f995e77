//! # CraftWatch Channels
//! Notifier implementations the scheduler delivers through.

pub mod discord;
pub mod log;

pub use discord::DiscordNotifier;
pub use log::LogNotifier;
