//! CLI definitions.

use std::path::PathBuf;
use std::time::Duration;

use armdiff::{ChannelConfig, DEFAULT_CONTEXT, SessionConfig};
use clap::Parser;

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when a scripted comparison finds a divergence.
pub const EXIT_DIVERGED: i32 = 2;

#[derive(Parser)]
#[command(name = "armdiff")]
#[command(about = "Run two ARM simulators side by side and compare their output")]
#[command(version)]
pub struct Cli {
    /// Program loaded by both simulators
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Simulator under test (default: search for `sim`)
    #[arg(long, value_name = "PATH")]
    pub sim: Option<PathBuf>,

    /// Reference simulator (default: search for `ref_sim`)
    #[arg(long, value_name = "PATH")]
    pub ref_sim: Option<PathBuf>,

    /// Replay a command script instead of reading commands from stdin
    #[arg(long)]
    pub batch: bool,

    /// Commands replayed in batch mode
    #[arg(long, value_delimiter = ',', default_value = "go,rdump,quit")]
    pub commands: Vec<String>,

    /// Longest single wait on the simulators, in milliseconds
    #[arg(long, default_value_t = 100)]
    pub poll_ms: u64,

    /// Idle time after a command before a simulator is reported silent
    #[arg(long, default_value_t = 2000)]
    pub timeout_ms: u64,

    /// Time a simulator gets to exit after `quit` before it is killed
    #[arg(long, default_value_t = 1000)]
    pub grace_ms: u64,

    /// Context lines in output diffs
    #[arg(long, default_value_t = DEFAULT_CONTEXT)]
    pub context: usize,

    /// Do not diff the two responses after each interactive command
    #[arg(long)]
    pub no_compare_each: bool,

    /// Print the transcript diff in batch mode even when states match
    #[arg(long)]
    pub show_output: bool,

    /// Show metrics summary after execution
    #[arg(long)]
    pub metrics: bool,

    /// Enable verbose output (sets RUST_LOG=debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress output (only show errors)
    #[arg(short, long, conflicts_with = "verbose")]
    pub silent: bool,
}

impl Cli {
    /// Default tracing directive for the chosen verbosity.
    pub const fn log_directive(&self) -> &'static str {
        if self.verbose {
            "armdiff=debug"
        } else if self.silent {
            "armdiff=error"
        } else {
            "armdiff=info"
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            channel: ChannelConfig {
                grace: Duration::from_millis(self.grace_ms),
                ..ChannelConfig::default()
            },
            poll_interval: Duration::from_millis(self.poll_ms.max(1)),
            response_timeout: Duration::from_millis(self.timeout_ms),
            compare_each: !self.no_compare_each,
            context: self.context,
        }
    }
}
