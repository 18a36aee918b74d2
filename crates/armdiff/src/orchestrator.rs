//! Lock-step driver for the two simulator channels.
//!
//! The orchestrator is the sole owner of both [`ProcessChannel`]s. Commands
//! fan out to both before either is read. Output is collected by waiting on
//! both channels' event queues at once, and each completed block goes to the
//! [`ReportSink`] labeled with its channel, in the order blocks complete.

use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

use crossbeam_channel::Select;
use tracing::{debug, info, warn};

use crate::channel::{ChannelConfig, ChannelId, Frame, ProcessChannel};
use crate::error::{ChannelError, Result};
use crate::interrupt;
use crate::locate::SimulatorPaths;
use crate::metrics;
use crate::sink::ReportSink;

struct Slot {
    channel: ProcessChannel,
    /// Still receiving commands.
    accepting: bool,
    /// When the command currently awaiting a response was sent.
    dispatched_at: Option<Instant>,
    /// Commands whose responses timed out and have not shown up yet, oldest
    /// first. The channel answers in order, so its next complete blocks
    /// belong to these before anything sent later.
    owed: VecDeque<String>,
}

/// Outcome of [`Orchestrator::broadcast`].
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<ChannelId>,
    pub failed: Vec<ChannelError>,
}

/// Outcome of one [`Orchestrator::poll_both`] call.
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// Blocks completed during this poll, in emission order.
    pub completed: Vec<(ChannelId, String)>,
    /// Late blocks answering an earlier, timed-out command.
    pub late: Vec<(ChannelId, String)>,
    /// Channels whose output streams closed during this poll.
    pub closed: Vec<ChannelId>,
    /// Channels that produced any data during this poll.
    pub active: Vec<ChannelId>,
}

/// Per-channel responses to one command.
#[derive(Debug, Default)]
pub struct Responses {
    blocks: [Option<String>; 2],
    /// Channels that went silent before completing a response.
    pub timed_out: Vec<ChannelId>,
    /// The wait was cut short by an interrupt.
    pub interrupted: bool,
}

impl Responses {
    #[must_use]
    pub fn get(&self, id: ChannelId) -> Option<&str> {
        self.blocks[id.index()].as_deref()
    }

    fn set(&mut self, id: ChannelId, text: String) {
        let slot = &mut self.blocks[id.index()];
        if slot.is_none() {
            *slot = Some(text);
        }
    }

    /// Both channels answered.
    #[must_use]
    pub const fn complete(&self) -> bool {
        self.blocks[0].is_some() && self.blocks[1].is_some()
    }
}

/// Owner of the candidate and reference channels.
pub struct Orchestrator {
    slots: [Slot; 2],
    sink: ReportSink,
}

impl Orchestrator {
    /// Spawn both simulators on the same input program.
    ///
    /// Both must start; if the reference fails after the candidate started,
    /// the candidate is torn down before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Spawn`] for the first simulator that fails to
    /// launch.
    pub fn launch(
        paths: &SimulatorPaths,
        input: &Path,
        config: &ChannelConfig,
        sink: ReportSink,
    ) -> Result<Self> {
        let candidate = ProcessChannel::spawn(
            ChannelId::Candidate,
            paths.get(ChannelId::Candidate),
            input,
            config.clone(),
        )?;
        let reference = ProcessChannel::spawn(
            ChannelId::Reference,
            paths.get(ChannelId::Reference),
            input,
            config.clone(),
        )?;

        metrics::record_live_channels(2);
        let slot = |channel| Slot {
            channel,
            accepting: true,
            dispatched_at: None,
            owed: VecDeque::new(),
        };
        Ok(Self {
            slots: [slot(candidate), slot(reference)],
            sink,
        })
    }

    #[must_use]
    pub const fn sink(&self) -> &ReportSink {
        &self.sink
    }

    /// Direct access to one channel.
    pub fn channel_mut(&mut self, id: ChannelId) -> &mut ProcessChannel {
        &mut self.slots[id.index()].channel
    }

    /// Commands still waiting for a late response on `id`, oldest first.
    #[must_use]
    pub fn owed(&self, id: ChannelId) -> Vec<String> {
        self.slots[id.index()].owed.iter().cloned().collect()
    }

    /// Channels still receiving commands.
    #[must_use]
    pub fn live_channels(&self) -> Vec<ChannelId> {
        ChannelId::ALL
            .into_iter()
            .filter(|id| self.slots[id.index()].accepting)
            .collect()
    }

    #[must_use]
    pub fn is_accepting(&self, id: ChannelId) -> bool {
        self.slots[id.index()].accepting
    }

    /// Exactly one channel is left.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.live_channels().len() == 1
    }

    /// No channel accepts commands any more.
    #[must_use]
    pub fn all_dead(&self) -> bool {
        self.live_channels().is_empty()
    }

    fn mark_dead(&mut self, id: ChannelId, reason: &str) {
        let slot = &mut self.slots[id.index()];
        if !slot.accepting {
            return;
        }
        slot.accepting = false;
        slot.dispatched_at = None;
        metrics::record_channel_failure(id);
        let live = self.live_channels();
        metrics::record_live_channels(live.len());
        warn!(channel = %id, reason, "channel marked dead");

        let message = match live.first() {
            Some(survivor) => {
                format!("{reason}; continuing single-sided with the {survivor} only")
            }
            None => format!("{reason}; no simulator left"),
        };
        self.sink.notice(Some(id), &message);
    }

    /// Send the same command line to every live channel.
    ///
    /// Output already queued is emitted first, so nothing printed before the
    /// command can be taken for its response. Each send is attempted
    /// regardless of how the other one went. A channel that fails is marked
    /// dead and skipped from then on.
    pub fn broadcast(&mut self, line: &str) -> BroadcastReport {
        self.poll_both(Duration::ZERO);
        metrics::record_command();
        let mut report = BroadcastReport::default();
        for id in ChannelId::ALL {
            let slot = &mut self.slots[id.index()];
            if !slot.accepting {
                continue;
            }
            match slot.channel.send(line) {
                Ok(()) => {
                    slot.dispatched_at = Some(Instant::now());
                    report.delivered.push(id);
                }
                Err(e) => {
                    self.mark_dead(id, &format!("failed to send `{line}`: {e}"));
                    report.failed.push(e);
                }
            }
        }
        debug!(command = line, delivered = report.delivered.len(), "broadcast");
        report
    }

    fn emit(&mut self, id: ChannelId, frame: Frame, outcome: &mut PollOutcome) {
        match frame {
            Frame::Complete(text) => {
                let slot = &mut self.slots[id.index()];
                if let Some(command) = slot.owed.pop_front() {
                    debug!(channel = %id, command, "late response");
                    self.sink
                        .notice(Some(id), &format!("late response to `{command}`"));
                    self.sink.block(id, &text);
                    outcome.late.push((id, text));
                    return;
                }
                let latency = slot.dispatched_at.take().map(|t| t.elapsed());
                metrics::record_block(id, latency);
                self.sink.block(id, &text);
                outcome.completed.push((id, text));
            }
            Frame::Closed(rest) => {
                if !rest.is_empty() {
                    self.sink.block(id, &rest);
                }
                let status = self.slots[id.index()].channel.exit_status();
                let reason = status.map_or_else(
                    || "output closed".to_string(),
                    |s| format!("process exited ({s})"),
                );
                info!(channel = %id, %reason, "channel closed");
                if self.slots[id.index()].accepting {
                    self.mark_dead(id, &reason);
                } else {
                    self.sink.notice(Some(id), &reason);
                }
                outcome.closed.push(id);
            }
            Frame::TimedOut(rest) | Frame::Interrupted(rest) => {
                if !rest.is_empty() {
                    self.sink.block(id, &rest);
                }
            }
        }
    }

    /// Wait up to `timeout` for output from either channel, then drain
    /// whatever is ready on both.
    ///
    /// Waiting uses readiness on both event queues at once, so a silent
    /// channel never delays the other's output by more than one call. The
    /// channel reported ready is drained first.
    pub fn poll_both(&mut self, timeout: Duration) -> PollOutcome {
        let mut outcome = PollOutcome::default();
        let mut open: Vec<ChannelId> = ChannelId::ALL
            .into_iter()
            .filter(|id| !self.slots[id.index()].channel.is_closed())
            .collect();
        if open.is_empty() {
            return outcome;
        }

        let ready = {
            let mut select = Select::new();
            for id in &open {
                select.recv(self.slots[id.index()].channel.events());
            }
            select.ready_timeout(timeout)
        };
        let Ok(first) = ready else {
            return outcome;
        };
        open.rotate_left(first);

        for id in open {
            let channel = &mut self.slots[id.index()].channel;
            let frames = channel.drain_ready();
            if channel.take_activity() {
                outcome.active.push(id);
            }
            for frame in frames {
                self.emit(id, frame, &mut outcome);
            }
        }
        outcome
    }

    /// After a broadcast, multiplex both channels until each live one has
    /// completed a response.
    ///
    /// Every channel has its own idle deadline, restarted only by its own
    /// output, so a chatty channel never hides a silent one. A channel that
    /// stays silent for `idle_timeout` is reported as timed out right away
    /// while the other one keeps being drained. Its response is then owed:
    /// the next block it completes is reported as a late response to
    /// `command`.
    pub fn drain_responses(
        &mut self,
        command: &str,
        poll_interval: Duration,
        idle_timeout: Duration,
    ) -> Responses {
        let mut responses = Responses::default();
        let start = Instant::now();
        let mut pending: Vec<(ChannelId, Instant)> = self
            .live_channels()
            .into_iter()
            .map(|id| (id, start + idle_timeout))
            .collect();

        while !pending.is_empty() {
            if interrupt::requested() {
                responses.interrupted = true;
                break;
            }

            let now = Instant::now();
            let (expired, waiting): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|&(_, deadline)| deadline <= now);
            pending = waiting;
            for (id, _) in expired {
                self.owe(id, command, idle_timeout);
                responses.timed_out.push(id);
            }
            let Some(next_deadline) = pending.iter().map(|&(_, d)| d).min() else {
                break;
            };

            let outcome = self.poll_both(poll_interval.min(next_deadline - now));
            let polled_at = Instant::now();
            for (id, deadline) in &mut pending {
                if outcome.active.contains(id) {
                    *deadline = polled_at + idle_timeout;
                }
            }
            for (id, text) in outcome.completed {
                responses.set(id, text);
                pending.retain(|(p, _)| *p != id);
            }
            pending.retain(|(p, _)| !outcome.closed.contains(p));
        }
        responses
    }

    /// After a broadcast, read each live channel in turn until its framing
    /// marker, without interleaving. Used when transcripts matter more than
    /// live display. Late blocks owed to earlier commands are emitted and
    /// skipped.
    pub fn collect_responses(&mut self, command: &str, idle_timeout: Duration) -> Responses {
        let mut responses = Responses::default();
        'channels: for id in self.live_channels() {
            loop {
                let frame = self.slots[id.index()]
                    .channel
                    .receive_until_marker(idle_timeout);
                let mut outcome = PollOutcome::default();
                match frame {
                    Frame::TimedOut(_) => {
                        self.owe(id, command, idle_timeout);
                        responses.timed_out.push(id);
                    }
                    Frame::Interrupted(_) => responses.interrupted = true,
                    _ => {}
                }
                self.emit(id, frame, &mut outcome);
                for (id, text) in outcome.completed {
                    responses.set(id, text);
                }
                if responses.interrupted {
                    break 'channels;
                }
                if outcome.late.is_empty() {
                    break;
                }
            }
        }
        responses
    }

    /// Record a missing response on `id` and report it.
    fn owe(&mut self, id: ChannelId, command: &str, timeout: Duration) {
        self.slots[id.index()].owed.push_back(command.to_string());
        self.report_timeout(id, command, timeout);
    }

    fn report_timeout(&self, id: ChannelId, command: &str, timeout: Duration) {
        metrics::record_timeout(id);
        warn!(channel = %id, command, ?timeout, "no response");
        self.sink.notice(
            Some(id),
            &format!("no prompt within {} ms after `{command}`", timeout.as_millis()),
        );
    }

    /// Terminate and reap both simulators. Safe to call more than once.
    pub fn shutdown(&mut self) {
        for id in ChannelId::ALL {
            let slot = &mut self.slots[id.index()];
            slot.accepting = false;
            let status = slot.channel.terminate();
            debug!(channel = %id, ?status, "shutdown");
        }
        metrics::record_live_channels(0);
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
