//! Shared report sink.
//!
//! The only place output from both channels meets. Every write takes the lock
//! for a whole block, so one channel's block is never split by the other's.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::Arc;

use console::style;
use parking_lot::Mutex;

use crate::channel::ChannelId;

struct SinkInner {
    out: Box<dyn Write + Send>,
    styled: bool,
    transcripts: [String; 2],
}

impl SinkInner {
    fn header(&self, text: &str) -> String {
        if self.styled {
            style(text).cyan().bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn write(&mut self, text: &str) {
        // A closed console is not worth aborting the comparison over.
        let _ = self.out.write_all(text.as_bytes()).and_then(|()| self.out.flush());
    }
}

/// Cloneable handle to the serialized report output and per-channel
/// transcripts.
#[derive(Clone)]
pub struct ReportSink {
    inner: Arc<Mutex<SinkInner>>,
}

impl ReportSink {
    /// Report to an arbitrary writer, unstyled.
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self::with_style(Box::new(out), false)
    }

    /// Report to stdout, styled when the terminal supports it.
    #[must_use]
    pub fn stdout() -> Self {
        Self::with_style(Box::new(io::stdout()), console::colors_enabled())
    }

    /// Discard live output and only keep transcripts.
    #[must_use]
    pub fn silent() -> Self {
        Self::with_style(Box::new(io::sink()), false)
    }

    fn with_style(out: Box<dyn Write + Send>, styled: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkInner {
                out,
                styled,
                transcripts: [String::new(), String::new()],
            })),
        }
    }

    /// Emit a labeled output block and record it in the channel transcript.
    pub fn block(&self, channel: ChannelId, text: &str) {
        let mut inner = self.inner.lock();
        inner.transcripts[channel.index()].push_str(text);

        let title = format!("=== {} OUTPUT ===", channel.label().to_uppercase());
        let mut rendered = format!("\n{}\n{text}", inner.header(&title));
        if !text.ends_with('\n') {
            rendered.push('\n');
        }
        let _ = writeln!(rendered, "{}", "=".repeat(title.chars().count()));
        inner.write(&rendered);
    }

    /// Emit a note about one channel, or about the session when `channel` is
    /// `None`.
    pub fn notice(&self, channel: Option<ChannelId>, message: &str) {
        let mut inner = self.inner.lock();
        let prefix = channel.map_or_else(|| "[armdiff]".to_string(), |c| format!("[{c}]"));
        let line = if inner.styled {
            format!("{} {message}\n", style(prefix).yellow())
        } else {
            format!("{prefix} {message}\n")
        };
        inner.write(&line);
    }

    /// Emit free text as-is.
    pub fn text(&self, text: &str) {
        self.inner.lock().write(text);
    }

    /// Everything a channel has produced so far.
    #[must_use]
    pub fn transcript(&self, channel: ChannelId) -> String {
        self.inner.lock().transcripts[channel.index()].clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Writer that appends into a shared buffer so tests can inspect output.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(pub(crate) Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_block_is_labeled_and_recorded() {
        let buf = SharedBuffer::default();
        let sink = ReportSink::new(buf.clone());
        sink.block(ChannelId::Reference, "Bye.");
        assert_eq!(
            buf.contents(),
            "\n=== REFERENCE SIMULATOR OUTPUT ===\nBye.\n==================================\n"
        );
        assert_eq!(sink.transcript(ChannelId::Reference), "Bye.");
        assert!(sink.transcript(ChannelId::Candidate).is_empty());
    }

    #[test]
    fn test_notice_prefix() {
        let buf = SharedBuffer::default();
        let sink = ReportSink::new(buf.clone());
        sink.notice(Some(ChannelId::Candidate), "process exited");
        sink.notice(None, "session closed");
        assert_eq!(
            buf.contents(),
            "[your simulator] process exited\n[armdiff] session closed\n"
        );
    }

    #[test]
    fn test_concurrent_blocks_do_not_interleave() {
        let buf = SharedBuffer::default();
        let sink = ReportSink::new(buf.clone());
        let handles: Vec<_> = ChannelId::ALL
            .into_iter()
            .map(|id| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        sink.block(id, "line one\nline two\n");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let out = buf.contents();
        for chunk in out.split("\n=== ").skip(1) {
            assert!(chunk.contains("OUTPUT ===\nline one\nline two\n="));
        }
        assert_eq!(out.matches("line one").count(), 100);
    }
}
