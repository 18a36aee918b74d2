//! Batch comparison: replay a command script and compare final states.

use armdiff::{Error, ReportSink, ScriptOutcome, Session, SimulatorPaths};
use console::style;
use tracing::{error, info};

use crate::cli::{Cli, EXIT_DIVERGED, EXIT_FAILURE, EXIT_SUCCESS};
use crate::terminal::{self, Spinner};

/// Handle `--batch`.
pub fn cmd_compare(cli: &Cli, paths: &SimulatorPaths) -> i32 {
    info!(commands = ?cli.commands, "replaying script");
    let spinner = Spinner::new(format!(
        "Running {} on both simulators",
        cli.commands.join(", ")
    ));

    let outcome = Session::start(
        paths,
        &cli.input,
        cli.session_config(),
        ReportSink::silent(),
    )
    .and_then(|mut session| session.run_script(&cli.commands));

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(Error::Interrupted) => {
            spinner.finish_with_failure("interrupted");
            return EXIT_FAILURE;
        }
        Err(e) => {
            error!(error = %e, "comparison failed");
            spinner.finish_with_failure(&e.to_string());
            return EXIT_FAILURE;
        }
    };

    if outcome.is_match() {
        spinner.finish_with_success("final states match");
    } else {
        spinner.finish_with_failure("simulators diverged");
    }
    print_outcome(&outcome, cli.show_output);

    if outcome.is_match() {
        EXIT_SUCCESS
    } else {
        EXIT_DIVERGED
    }
}

fn print_outcome(outcome: &ScriptOutcome, show_output: bool) {
    for (command, channel) in &outcome.timed_out {
        terminal::warning(&format!("{channel} did not answer `{command}`"));
    }
    for channel in &outcome.lost {
        terminal::warning(&format!("{channel} stopped accepting commands early"));
    }
    if outcome.reference.is_empty() && outcome.candidate.is_empty() {
        terminal::warning("no register dump found in either transcript; run `rdump`");
    }

    println!("{}", style("==== State comparison ====").bold());
    print!("{}", outcome.report);

    let show_diff = show_output || !outcome.report.is_empty();
    if show_diff && !outcome.transcript_diff.is_empty() {
        println!();
        println!("{}", style("==== Output diff ====").bold());
        print!("{}", outcome.transcript_diff);
    }
}
