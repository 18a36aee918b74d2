//! One spawned simulator process and its streams.
//!
//! Stdout and stderr are each pumped by a reader thread into a single event
//! queue, so the two streams are merged in arrival order and the owner can
//! wait on the queue with a timeout instead of blocking on a pipe.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::error::{ChannelError, Error, Result};
use crate::framing::{FrameBuffer, Framing};
use crate::interrupt;

/// Grace period for a simulator to exit on its own before it is killed.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 4096;
/// Longest single wait before re-checking for an interrupt.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Which side of the comparison a channel is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// Simulator under test.
    Candidate,
    /// Trusted simulator.
    Reference,
}

impl ChannelId {
    pub const ALL: [Self; 2] = [Self::Candidate, Self::Reference];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Candidate => "your simulator",
            Self::Reference => "reference simulator",
        }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Candidate => 0,
            Self::Reference => 1,
        }
    }

    /// Executable name looked up when no path is given.
    #[must_use]
    pub const fn default_binary(self) -> &'static str {
        match self {
            Self::Candidate => "sim",
            Self::Reference => "ref_sim",
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-channel settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Markers that end a response.
    pub framing: Framing,
    /// Time allowed for a graceful exit before the process is killed.
    pub grace: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            framing: Framing::default(),
            grace: DEFAULT_GRACE,
        }
    }
}

/// Result of waiting for a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text through a framing marker.
    Complete(String),
    /// No data arrived within the timeout; carries what was buffered.
    TimedOut(String),
    /// Both output streams hit EOF; carries the unframed remainder.
    Closed(String),
    /// An interrupt was requested while waiting; carries what was buffered.
    Interrupted(String),
}

#[derive(Debug)]
pub(crate) enum ReaderEvent {
    Data(String),
    Closed,
}

/// Owned handle to one running simulator.
pub struct ProcessChannel {
    id: ChannelId,
    path: PathBuf,
    child: Child,
    stdin: Option<ChildStdin>,
    events: Receiver<ReaderEvent>,
    open_streams: usize,
    closed_reported: bool,
    buffer: FrameBuffer,
    /// Data arrived since the last [`ProcessChannel::take_activity`].
    active: bool,
    config: ChannelConfig,
    exit_status: Option<ExitStatus>,
    terminated: bool,
}

impl ProcessChannel {
    /// Spawn `binary input` with piped stdio.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the process or its reader threads cannot be
    /// started.
    pub fn spawn(id: ChannelId, binary: &Path, input: &Path, config: ChannelConfig) -> Result<Self> {
        let spawn_err = |source| Error::Spawn {
            role: id,
            path: binary.to_path_buf(),
            source,
        };

        let mut child = Command::new(binary)
            .arg(input)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let mut open_streams = 0;
        let mut started = Ok(());
        if let Some(stdout) = stdout {
            started = started.and_then(|()| spawn_reader(id, "stdout", stdout, tx.clone()));
            open_streams += 1;
        }
        if let Some(stderr) = stderr {
            started = started.and_then(|()| spawn_reader(id, "stderr", stderr, tx.clone()));
            open_streams += 1;
        }
        if let Err(e) = started {
            let _ = child.kill();
            let _ = child.wait();
            return Err(spawn_err(e));
        }

        info!(channel = %id, path = %binary.display(), pid = child.id(), "spawned simulator");

        Ok(Self {
            id,
            path: binary.to_path_buf(),
            child,
            stdin,
            events: rx,
            open_streams,
            closed_reported: false,
            buffer: FrameBuffer::new(),
            active: false,
            config,
            exit_status: None,
            terminated: false,
        })
    }

    #[must_use]
    pub const fn id(&self) -> ChannelId {
        self.id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// OS process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Both output streams reached EOF.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.open_streams == 0
    }

    /// Exit status, if the process has exited.
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        if self.exit_status.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exit_status = status,
                Err(e) => warn!(channel = %self.id, "try_wait failed: {e}"),
            }
        }
        self.exit_status
    }

    pub(crate) const fn events(&self) -> &Receiver<ReaderEvent> {
        &self.events
    }

    /// Write one command line and flush.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::BrokenPipe`] once the process has exited or
    /// closed its input, and [`ChannelError::Io`] for other write failures.
    pub fn send(&mut self, line: &str) -> std::result::Result<(), ChannelError> {
        if let Some(status) = self.exit_status() {
            debug!(channel = %self.id, %status, "send after exit");
            self.stdin = None;
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ChannelError::BrokenPipe { channel: self.id });
        };

        let written = stdin
            .write_all(line.as_bytes())
            .and_then(|()| stdin.write_all(b"\n"))
            .and_then(|()| stdin.flush());

        match written {
            Ok(()) => {
                debug!(channel = %self.id, command = line, "sent");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                self.stdin = None;
                Err(ChannelError::BrokenPipe { channel: self.id })
            }
            Err(source) => Err(ChannelError::Io {
                channel: self.id,
                source,
            }),
        }
    }

    fn apply(&mut self, event: ReaderEvent) {
        match event {
            ReaderEvent::Data(text) => {
                self.buffer.push(&text);
                self.active = true;
            }
            ReaderEvent::Closed => self.open_streams = self.open_streams.saturating_sub(1),
        }
    }

    /// Read until a framing marker completes a response, or until no data has
    /// arrived for `timeout`.
    ///
    /// The timeout is an idle timeout: every chunk received restarts it.
    pub fn receive_until_marker(&mut self, timeout: Duration) -> Frame {
        let mut deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.buffer.next_frame(&self.config.framing) {
                return Frame::Complete(frame);
            }
            if self.is_closed() {
                self.closed_reported = true;
                return Frame::Closed(self.buffer.take_partial());
            }
            if interrupt::requested() {
                return Frame::Interrupted(self.buffer.take_partial());
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(channel = %self.id, ?timeout, "receive timed out");
                return Frame::TimedOut(self.buffer.take_partial());
            }

            match self.events.recv_timeout((deadline - now).min(WAIT_SLICE)) {
                Ok(event) => {
                    self.apply(event);
                    deadline = Instant::now() + timeout;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.open_streams = 0,
            }
        }
    }

    /// Consume everything already queued without blocking and return the
    /// frames it completes. A `Closed` frame is returned once, when the last
    /// stream hits EOF.
    pub fn drain_ready(&mut self) -> Vec<Frame> {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.apply(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.open_streams = 0;
                    break;
                }
            }
        }

        let mut frames = Vec::new();
        while let Some(frame) = self.buffer.next_frame(&self.config.framing) {
            frames.push(Frame::Complete(frame));
        }
        if self.is_closed() && !self.closed_reported {
            self.closed_reported = true;
            frames.push(Frame::Closed(self.buffer.take_partial()));
        }
        frames
    }

    /// Whether any output arrived since the previous call.
    pub fn take_activity(&mut self) -> bool {
        std::mem::take(&mut self.active)
    }

    /// Take buffered text that has not been framed yet.
    pub fn take_partial(&mut self) -> String {
        self.buffer.take_partial()
    }

    fn wait_for_exit(&mut self, limit: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + limit;
        loop {
            if let Some(status) = self.exit_status() {
                return Some(status);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Shut the simulator down and reap it.
    ///
    /// Sends `quit` and closes stdin, then escalates to `SIGTERM` and finally
    /// `SIGKILL`, each after half the grace period. Calling it again returns
    /// the recorded status.
    pub fn terminate(&mut self) -> Option<ExitStatus> {
        if self.terminated {
            return self.exit_status;
        }
        self.terminated = true;

        if self.exit_status().is_none() {
            if let Some(mut stdin) = self.stdin.take() {
                let _ = stdin.write_all(b"quit\n").and_then(|()| stdin.flush());
            }
            let half = self.config.grace / 2;
            if self.wait_for_exit(half).is_none() {
                debug!(channel = %self.id, "no exit after quit, sending SIGTERM");
                if let Ok(pid) = i32::try_from(self.child.id()) {
                    let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
                }
                if self.wait_for_exit(half).is_none() {
                    warn!(channel = %self.id, "still running after grace period, killing");
                    let _ = self.child.kill();
                }
            }
        }
        self.stdin = None;

        match self.child.wait() {
            Ok(status) => self.exit_status = Some(status),
            Err(e) => warn!(channel = %self.id, "failed to reap simulator: {e}"),
        }
        info!(channel = %self.id, status = ?self.exit_status, "simulator terminated");
        self.exit_status
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl fmt::Debug for ProcessChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessChannel")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("pid", &self.child.id())
            .field("open_streams", &self.open_streams)
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}

fn spawn_reader<R>(id: ChannelId, stream: &'static str, reader: R, tx: Sender<ReaderEvent>) -> io::Result<()>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{}-{stream}", id.default_binary()))
        .spawn(move || pump(id, stream, reader, &tx))
        .map(drop)
}

fn pump<R: Read>(id: ChannelId, stream: &str, mut reader: R, tx: &Sender<ReaderEvent>) {
    let mut chunk = [0u8; READ_CHUNK];
    let mut pending = Vec::new();
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                let text = decode_available(&mut pending);
                if !text.is_empty() && tx.send(ReaderEvent::Data(text)).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                debug!(channel = %id, stream, "read failed: {e}");
                break;
            }
        }
    }
    if !pending.is_empty() {
        let _ = tx.send(ReaderEvent::Data(String::from_utf8_lossy(&pending).into_owned()));
    }
    let _ = tx.send(ReaderEvent::Closed);
}

/// Decode the valid UTF-8 prefix of `pending`, keeping an incomplete trailing
/// sequence for the next read.
fn decode_available(pending: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(pending) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => pending.len(),
    };
    let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
    pending.drain(..valid);
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_keeps_incomplete_tail() {
        // "é" is 0xC3 0xA9
        let mut pending = vec![b'o', b'k', 0xC3];
        assert_eq!(decode_available(&mut pending), "ok");
        assert_eq!(pending, [0xC3]);
        pending.push(0xA9);
        assert_eq!(decode_available(&mut pending), "é");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_decode_replaces_invalid_bytes() {
        let mut pending = vec![0xFF, b'a'];
        assert_eq!(decode_available(&mut pending), "\u{fffd}a");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_channel_labels() {
        assert_eq!(ChannelId::Candidate.to_string(), "your simulator");
        assert_eq!(ChannelId::Reference.to_string(), "reference simulator");
        assert_eq!(ChannelId::Reference.index(), 1);
        assert_eq!(ChannelId::Candidate.default_binary(), "sim");
    }

    #[test]
    fn test_pump_merges_chunks_and_closes() {
        let (tx, rx) = crossbeam_channel::unbounded();
        pump(ChannelId::Candidate, "stdout", &b"ARM-SIM> "[..], &tx);
        let events: Vec<ReaderEvent> = rx.try_iter().collect();
        assert!(matches!(&events[0], ReaderEvent::Data(t) if t == "ARM-SIM> "));
        assert!(matches!(events[1], ReaderEvent::Closed));
    }
}
