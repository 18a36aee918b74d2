//! Comparison session: the operator-facing loop on top of the orchestrator.
//!
//! ```text
//! Idle --command--> Dispatching --sent--> Draining --responses/timeout--> Idle
//!   \                                                                      |
//!    `---- exit/quit/q, interrupt, both channels dead ----> Closed <------'
//! ```

use std::io::BufRead;
use std::path::Path;
use std::thread;
use std::time::Duration;

use armdiff_state::{CanonicalState, ComparisonReport, diff_states, parse_state, unified_diff};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info};

use crate::channel::ChannelId;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::interrupt;
use crate::locate::SimulatorPaths;
use crate::metrics;
use crate::orchestrator::{Orchestrator, Responses};
use crate::sink::ReportSink;

const HELP: &str = "\
Session commands:
  exit, quit, q   terminate both simulators and leave
  :diff           send `rdump` to both and compare the reported state
  :help           show this text
Anything else is sent verbatim to both simulators.
";

/// Where the session is in its command cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for operator input.
    Idle,
    /// Sending a command to both channels.
    Dispatching,
    /// Waiting for both responses.
    Draining,
    /// Both simulators terminated.
    Closed,
}

/// Commands handled by the session instead of being forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Exit,
    Diff,
    Help,
}

/// Classify an operator line. Matching is case-insensitive on the trimmed
/// line.
#[must_use]
pub fn parse_control(line: &str) -> Option<Control> {
    match line.trim().to_ascii_lowercase().as_str() {
        "exit" | "quit" | "q" => Some(Control::Exit),
        ":diff" => Some(Control::Diff),
        ":help" => Some(Control::Help),
        _ => None,
    }
}

/// Everything a scripted comparison produced.
#[derive(Debug)]
pub struct ScriptOutcome {
    /// Final state parsed from the reference transcript.
    pub reference: CanonicalState,
    /// Final state parsed from the candidate transcript.
    pub candidate: CanonicalState,
    /// Structured state differences.
    pub report: ComparisonReport,
    /// Unified diff of the full transcripts, empty if identical.
    pub transcript_diff: String,
    pub reference_transcript: String,
    pub candidate_transcript: String,
    /// `(command, channel)` pairs that produced no complete response.
    pub timed_out: Vec<(String, ChannelId)>,
    /// Channels lost before the script finished.
    pub lost: Vec<ChannelId>,
}

impl ScriptOutcome {
    /// No state discrepancy and no lost channel.
    #[must_use]
    pub fn is_match(&self) -> bool {
        self.report.is_empty() && self.lost.is_empty()
    }
}

/// Read operator lines on a background thread.
///
/// The receiver disconnects at end of input. Reading stdin is the one
/// unbounded wait in the program, so it is kept off the session thread.
#[must_use]
pub fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let spawned = thread::Builder::new()
        .name("operator-input".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tracing::error!("failed to start input reader: {e}");
    }
    rx
}

/// A running differential comparison.
pub struct Session {
    orchestrator: Orchestrator,
    config: SessionConfig,
    state: SessionState,
}

impl Session {
    /// Check the input program and launch both simulators on it.
    ///
    /// # Errors
    ///
    /// [`Error::InputMissing`] if `input` is not a file, or the launch error
    /// of whichever simulator failed to start.
    pub fn start(
        paths: &SimulatorPaths,
        input: &Path,
        config: SessionConfig,
        sink: ReportSink,
    ) -> Result<Self> {
        if !input.is_file() {
            return Err(Error::InputMissing(input.to_path_buf()));
        }
        let orchestrator = Orchestrator::launch(paths, input, &config.channel, sink)?;
        info!(input = %input.display(), "session started");
        Ok(Self {
            orchestrator,
            config,
            state: SessionState::Idle,
        })
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub const fn orchestrator_mut(&mut self) -> &mut Orchestrator {
        &mut self.orchestrator
    }

    #[must_use]
    pub const fn sink(&self) -> &ReportSink {
        self.orchestrator.sink()
    }

    /// Terminate both simulators. Idempotent.
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            self.orchestrator.shutdown();
            self.state = SessionState::Closed;
            debug!("session closed");
        }
    }

    fn interrupted(&mut self) -> Error {
        self.sink().notice(None, "interrupted, terminating both simulators");
        self.close();
        Error::Interrupted
    }

    /// Show both startup banners, up to each simulator's first prompt.
    ///
    /// # Errors
    ///
    /// [`Error::Interrupted`] if interrupted while waiting.
    pub fn await_banner(&mut self) -> Result<Responses> {
        let responses = self.orchestrator.drain_responses(
            "<startup>",
            self.config.poll_interval,
            self.config.response_timeout,
        );
        if responses.interrupted {
            return Err(self.interrupted());
        }
        Ok(responses)
    }

    fn dispatch(&mut self, line: &str, compare: bool) -> Result<Responses> {
        self.state = SessionState::Dispatching;
        self.orchestrator.broadcast(line);
        if self.orchestrator.all_dead() {
            self.close();
            return Ok(Responses::default());
        }

        self.state = SessionState::Draining;
        let responses = self.orchestrator.drain_responses(
            line,
            self.config.poll_interval,
            self.config.response_timeout,
        );
        if responses.interrupted {
            return Err(self.interrupted());
        }

        if compare {
            self.compare_blocks(&responses);
        }
        if self.orchestrator.all_dead() {
            self.sink().notice(None, "both simulators are gone");
            self.close();
        } else {
            self.state = SessionState::Idle;
        }
        Ok(responses)
    }

    fn compare_blocks(&self, responses: &Responses) {
        let (Some(reference), Some(candidate)) = (
            responses.get(ChannelId::Reference),
            responses.get(ChannelId::Candidate),
        ) else {
            return;
        };
        if reference == candidate {
            self.sink().text("✓ outputs are identical\n");
        } else {
            let diff = unified_diff(
                reference,
                candidate,
                ChannelId::Reference.label(),
                ChannelId::Candidate.label(),
                self.config.context,
            );
            self.sink().text(&format!("✗ outputs differ:\n{diff}"));
        }
    }

    /// Handle one operator line.
    ///
    /// Returns the responses for forwarded commands and `None` for session
    /// commands.
    ///
    /// # Errors
    ///
    /// [`Error::Interrupted`] if interrupted while waiting for responses.
    pub fn execute(&mut self, line: &str) -> Result<Option<Responses>> {
        if self.state == SessionState::Closed {
            return Err(Error::AllChannelsDead);
        }
        match parse_control(line) {
            Some(Control::Exit) => {
                self.close();
                Ok(None)
            }
            Some(Control::Help) => {
                self.sink().text(HELP);
                Ok(None)
            }
            Some(Control::Diff) => {
                self.diff_now()?;
                Ok(None)
            }
            None => self.dispatch(line, self.config.compare_each).map(Some),
        }
    }

    /// Ask both simulators for a register dump and compare the states.
    ///
    /// Returns `None` if either simulator did not answer.
    ///
    /// # Errors
    ///
    /// [`Error::Interrupted`] if interrupted while waiting.
    pub fn diff_now(&mut self) -> Result<Option<ComparisonReport>> {
        let responses = self.dispatch("rdump", false)?;
        let (Some(reference), Some(candidate)) = (
            responses.get(ChannelId::Reference),
            responses.get(ChannelId::Candidate),
        ) else {
            self.sink()
                .notice(None, "cannot compare state: both simulators must answer `rdump`");
            return Ok(None);
        };

        let report = diff_states(&parse_state(reference), &parse_state(candidate));
        metrics::record_discrepancies(report.len());
        self.sink().text(&format!("\n==== State comparison ====\n{report}"));
        Ok(Some(report))
    }

    /// Interactive loop: forward operator lines until exit, end of input,
    /// interrupt, or loss of both simulators.
    ///
    /// # Errors
    ///
    /// [`Error::Interrupted`] on Ctrl-C, [`Error::AllChannelsDead`] if both
    /// simulators died. Both simulators are terminated in every case.
    pub fn run_interactive(&mut self, input: &Receiver<String>) -> Result<()> {
        self.await_banner()?;
        self.sink().text(
            "\n=== SIMULATOR COMPARISON TOOL ===\n\
             Both simulators receive every command. Type :help for session commands.\n",
        );

        while self.state != SessionState::Closed {
            self.sink().text("> ");
            if let Some(line) = self.next_line(input)? {
                self.execute(&line)?;
            } else {
                self.close();
            }
        }
        debug!("interactive session finished");
        Ok(())
    }

    /// Wait for the next operator line while keeping late simulator output
    /// flowing. `None` at end of input.
    fn next_line(&mut self, input: &Receiver<String>) -> Result<Option<String>> {
        loop {
            if interrupt::requested() {
                return Err(self.interrupted());
            }
            self.orchestrator.poll_both(Duration::ZERO);
            if self.orchestrator.all_dead() {
                self.sink().notice(None, "both simulators are gone");
                self.close();
                return Err(Error::AllChannelsDead);
            }
            match input.recv_timeout(self.config.poll_interval) {
                Ok(line) => return Ok(Some(line)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }

    /// Replay `commands` on both simulators, then compare final states and
    /// full transcripts.
    ///
    /// Responses are read per channel rather than interleaved. Both
    /// simulators are terminated before this returns.
    ///
    /// # Errors
    ///
    /// [`Error::Interrupted`] if interrupted.
    pub fn run_script<S: AsRef<str>>(&mut self, commands: &[S]) -> Result<ScriptOutcome> {
        let mut timed_out = Vec::new();

        let banner = self
            .orchestrator
            .collect_responses("<startup>", self.config.response_timeout);
        if banner.interrupted {
            return Err(self.interrupted());
        }

        for command in commands {
            let command = command.as_ref();
            if self.orchestrator.all_dead() {
                break;
            }
            self.state = SessionState::Dispatching;
            self.orchestrator.broadcast(command);

            self.state = SessionState::Draining;
            let responses = self
                .orchestrator
                .collect_responses(command, self.config.response_timeout);
            if responses.interrupted {
                return Err(self.interrupted());
            }
            timed_out.extend(
                responses
                    .timed_out
                    .iter()
                    .map(|id| (command.to_string(), *id)),
            );
            self.state = SessionState::Idle;
        }

        let lost: Vec<ChannelId> = ChannelId::ALL
            .into_iter()
            .filter(|id| !self.orchestrator.is_accepting(*id))
            .collect();
        self.close();

        let reference_transcript = self.sink().transcript(ChannelId::Reference);
        let candidate_transcript = self.sink().transcript(ChannelId::Candidate);
        let reference = parse_state(&reference_transcript);
        let candidate = parse_state(&candidate_transcript);
        let report = diff_states(&reference, &candidate);
        metrics::record_discrepancies(report.len());
        let transcript_diff = unified_diff(
            &reference_transcript,
            &candidate_transcript,
            ChannelId::Reference.label(),
            ChannelId::Candidate.label(),
            self.config.context,
        );

        Ok(ScriptOutcome {
            reference,
            candidate,
            report,
            transcript_diff,
            reference_transcript,
            candidate_transcript,
            timed_out,
            lost,
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
