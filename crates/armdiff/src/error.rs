use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::channel::ChannelId;

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Setup and session errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{role} not found (searched: {})", join_paths(.searched))]
    BinaryNotFound {
        role: ChannelId,
        searched: Vec<PathBuf>,
    },
    #[error("{role} at {} is not an executable file", .path.display())]
    NotExecutable { role: ChannelId, path: PathBuf },
    #[error("input program {} not found", .0.display())]
    InputMissing(PathBuf),
    #[error("failed to launch {role} ({}): {source}", .path.display())]
    Spawn {
        role: ChannelId,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to install interrupt handler: {0}")]
    Signal(#[from] nix::errno::Errno),
    #[error("both simulators are unavailable")]
    AllChannelsDead,
    #[error("interrupted")]
    Interrupted,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure on one simulator channel. Never fatal to the other channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("{channel}: broken pipe, process no longer accepts input")]
    BrokenPipe { channel: ChannelId },
    #[error("{channel}: process exited ({status})")]
    Exited {
        channel: ChannelId,
        status: ExitStatus,
    },
    #[error("{channel}: I/O error: {source}")]
    Io {
        channel: ChannelId,
        #[source]
        source: std::io::Error,
    },
}

impl ChannelError {
    /// Channel the error happened on.
    #[must_use]
    pub const fn channel(&self) -> ChannelId {
        match self {
            Self::BrokenPipe { channel }
            | Self::Exited { channel, .. }
            | Self::Io { channel, .. } => *channel,
        }
    }
}
