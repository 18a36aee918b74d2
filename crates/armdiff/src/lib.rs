//! armdiff - differential testing of interactive ARM simulators
//!
//! Drives a candidate simulator and a reference simulator with the same
//! `ARM-SIM>` command stream, shows both outputs labeled as they complete, and
//! compares the machine state each one reports.
//!
//! # Example
//!
//! ```ignore
//! use armdiff::{ReportSink, Session, SessionConfig, locate};
//!
//! let paths = locate::resolve(None, None)?;
//! let mut session = Session::start(&paths, "inputs/addis.x".as_ref(), SessionConfig::default(), ReportSink::stdout())?;
//! let outcome = session.run_script(&["go", "rdump", "quit"])?;
//! println!("{}", outcome.report);
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod framing;
pub mod interrupt;
pub mod locate;
pub mod metrics;
pub mod orchestrator;
pub mod session;
pub mod sink;

pub use armdiff_state::{
    CanonicalState, ComparisonReport, DEFAULT_CONTEXT, Discrepancy, StateKey, diff_states,
    parse_state, unified_diff,
};
pub use channel::{ChannelConfig, ChannelId, Frame, ProcessChannel};
pub use config::SessionConfig;
pub use error::{ChannelError, Error, Result};
pub use framing::{BYE_MARKER, FrameBuffer, Framing, Marker, MarkerKind, PROMPT_MARKER};
pub use locate::SimulatorPaths;
pub use orchestrator::{BroadcastReport, Orchestrator, PollOutcome, Responses};
pub use session::{Control, ScriptOutcome, Session, SessionState, parse_control};
pub use sink::ReportSink;
