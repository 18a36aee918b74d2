//! Session configuration.

use std::time::Duration;

use armdiff_state::DEFAULT_CONTEXT;

use crate::channel::ChannelConfig;

/// Default wait per multiplexed poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Default idle time after which a missing prompt is reported.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Commands replayed by a scripted comparison.
pub const DEFAULT_SCRIPT: [&str; 3] = ["go", "rdump", "quit"];

/// Configuration for a comparison session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Framing and shutdown settings shared by both channels.
    pub channel: ChannelConfig,
    /// Longest a single multiplexed wait may block.
    pub poll_interval: Duration,
    /// Idle time after a command before a channel is reported as silent.
    pub response_timeout: Duration,
    /// Diff the two responses after every interactive command.
    pub compare_each: bool,
    /// Context lines for unified diffs.
    pub context: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            compare_each: true,
            context: DEFAULT_CONTEXT,
        }
    }
}
