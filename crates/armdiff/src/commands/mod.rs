//! Command implementations.

mod compare;
mod interactive;

use armdiff::{Error, SimulatorPaths, locate};
use tracing::error;

use crate::cli::{Cli, EXIT_FAILURE};
use crate::terminal;

/// Run the mode selected on the command line.
pub fn run_command(cli: &Cli) -> i32 {
    if let Err(e) = armdiff::interrupt::install() {
        error!(error = %e, "continuing without Ctrl-C handling");
    }

    let paths = match locate::resolve(cli.sim.as_deref(), cli.ref_sim.as_deref()) {
        Ok(paths) => paths,
        Err(e) => {
            report_setup_error(&e);
            return EXIT_FAILURE;
        }
    };
    if !cli.input.is_file() {
        report_setup_error(&Error::InputMissing(cli.input.clone()));
        return EXIT_FAILURE;
    }
    log_paths(&paths);

    if cli.batch {
        compare::cmd_compare(cli, &paths)
    } else {
        interactive::cmd_interactive(cli, &paths)
    }
}

fn log_paths(paths: &SimulatorPaths) {
    tracing::info!(
        sim = %paths.candidate.display(),
        ref_sim = %paths.reference.display(),
        "simulators"
    );
}

fn report_setup_error(e: &Error) {
    terminal::error(&e.to_string());
    if matches!(e, Error::BinaryNotFound { .. }) {
        terminal::info("build the simulator first, or pass --sim / --ref-sim");
    }
}
