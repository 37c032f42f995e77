//! CraftWatch error type.

use crate::types::{ChannelId, JobKind};

/// Errors raised by stores, transports and job commands.
#[derive(Debug, thiserror::Error)]
pub enum CraftError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("notify error: {0}")]
    Notify(String),

    #[error("unknown or unreachable channel: {0}")]
    UnknownChannel(ChannelId),

    #[error("a {0} job is already running in this channel")]
    JobAlreadyActive(JobKind),

    #[error("no active {0} job in this channel")]
    NoActiveJob(JobKind),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CraftError>;
