//! Interactive comparison.

use armdiff::session::spawn_stdin_reader;
use armdiff::{Error, ReportSink, Session, SimulatorPaths};
use tracing::error;

use crate::cli::{Cli, EXIT_FAILURE, EXIT_SUCCESS};
use crate::terminal;

/// Exit status for a session ended by Ctrl-C.
const EXIT_INTERRUPTED: i32 = 130;

/// Handle the default mode: forward stdin lines to both simulators.
pub fn cmd_interactive(cli: &Cli, paths: &SimulatorPaths) -> i32 {
    let mut session = match Session::start(
        paths,
        &cli.input,
        cli.session_config(),
        ReportSink::stdout(),
    ) {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "failed to start session");
            terminal::error(&e.to_string());
            return EXIT_FAILURE;
        }
    };

    let input = spawn_stdin_reader();
    match session.run_interactive(&input) {
        Ok(()) => {
            terminal::success("both simulators terminated");
            EXIT_SUCCESS
        }
        Err(Error::Interrupted) => {
            terminal::warning("interrupted");
            EXIT_INTERRUPTED
        }
        Err(e) => {
            terminal::error(&e.to_string());
            EXIT_FAILURE
        }
    }
}
