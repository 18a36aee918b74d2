//! Ctrl-C handling.
//!
//! The handler only records the request. Every wait loop in the crate checks
//! [`requested`] at least once per polling interval and unwinds, which lets
//! the owners of the simulator processes tear them down on the way out.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

use crate::error::Result;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_signal: nix::libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install the `SIGINT` handler.
///
/// # Errors
///
/// Returns [`crate::Error::Signal`] if `sigaction` fails.
pub fn install() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
    unsafe { sigaction(Signal::SIGINT, &action) }?;
    Ok(())
}

/// Whether an interrupt has been requested since startup.
#[must_use]
pub fn requested() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Record an interrupt request without a signal.
pub fn request() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}
