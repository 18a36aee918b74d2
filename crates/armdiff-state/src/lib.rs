//! Simulator machine state as reported by an `ARM-SIM>` register dump.
//!
//! This crate turns free-text simulator output into a [`CanonicalState`] and
//! compares two states. It performs no I/O.
//!
//! ```
//! use armdiff_state::{diff_states, parse_state};
//!
//! let reference = parse_state("PC : 0x1000\nX0: 0x5\nFLAG_Z: 1\n");
//! let candidate = parse_state("PC : 0x1000\nX0: 0x6\nFLAG_Z: 1\n");
//!
//! let report = diff_states(&reference, &candidate);
//! assert_eq!(report.len(), 1);
//! assert_eq!(report.iter().next().unwrap().to_string(), "X0: 0x5 vs 0x6");
//! ```

mod compare;
mod parse;
mod state;
mod text_diff;

pub use compare::{ComparisonReport, Discrepancy, diff_states};
pub use parse::parse_state;
pub use state::{CanonicalState, KeyError, NUM_XREGS, StateKey};
pub use text_diff::{DEFAULT_CONTEXT, unified_diff};
