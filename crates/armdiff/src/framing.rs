//! Response framing over a free-text output stream.
//!
//! Simulators never say "response complete"; they print a prompt. A response
//! is everything up to and including the prompt, or through the end of the
//! line that carries a line marker such as `Bye.`.

/// Prompt printed whenever the simulator waits for a command.
pub const PROMPT_MARKER: &str = "ARM-SIM>";
/// Printed once on `quit`, right before the simulator exits.
pub const BYE_MARKER: &str = "Bye.";

/// How far a frame extends past its marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// Ends the frame right after the marker and any spaces that follow it.
    /// Text after that on the same line belongs to the next response.
    Prompt,
    /// Ends the frame at the end of the marker's line.
    Line,
}

/// One framing marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub text: String,
    pub kind: MarkerKind,
}

impl Marker {
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: MarkerKind::Prompt,
        }
    }

    pub fn line(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: MarkerKind::Line,
        }
    }
}

/// Set of markers that end a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framing {
    markers: Vec<Marker>,
}

impl Default for Framing {
    fn default() -> Self {
        Self::new([Marker::prompt(PROMPT_MARKER), Marker::line(BYE_MARKER)])
    }
}

impl Framing {
    pub fn new(markers: impl IntoIterator<Item = Marker>) -> Self {
        Self {
            markers: markers
                .into_iter()
                .filter(|m| !m.text.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Position and kind of the earliest marker in `text`, with the byte
    /// offset just past the marker.
    fn find(&self, text: &str) -> Option<(usize, usize, MarkerKind)> {
        self.markers
            .iter()
            .filter_map(|m| {
                text.find(m.text.as_str())
                    .map(|pos| (pos, pos + m.text.len(), m.kind))
            })
            .min_by_key(|&(pos, _, _)| pos)
    }
}

/// Accumulating output of one channel.
///
/// Only the owning channel appends to it. `scanned` remembers how far marker
/// search already went so each chunk is scanned once, starting from the
/// beginning of its line so a marker split across two reads is still found.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    text: String,
    scanned: usize,
}

impl FrameBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Remove and return the next complete response, if a marker was seen.
    ///
    /// A line marker takes the rest of its line, or the rest of the buffer
    /// if the newline has not arrived yet. A prompt takes only its trailing
    /// spaces, plus the line break if one follows directly.
    pub fn next_frame(&mut self, framing: &Framing) -> Option<String> {
        let line_start = self.text[..self.scanned].rfind('\n').map_or(0, |i| i + 1);
        let Some((_, marker_end, kind)) = framing.find(&self.text[line_start..]) else {
            self.scanned = self.text.len();
            return None;
        };
        let marker_end = line_start + marker_end;
        let rest = &self.text[marker_end..];
        let end = match kind {
            MarkerKind::Line => rest.find('\n').map_or(self.text.len(), |i| marker_end + i + 1),
            MarkerKind::Prompt => {
                let trimmed = rest.trim_start_matches([' ', '\t']);
                let spaces = rest.len() - trimmed.len();
                let newline = if trimmed.starts_with("\r\n") {
                    2
                } else {
                    usize::from(trimmed.starts_with('\n'))
                };
                marker_end + spaces + newline
            }
        };

        let frame: String = self.text.drain(..end).collect();
        self.scanned = 0;
        Some(frame)
    }

    /// Take whatever is buffered without waiting for a marker.
    pub fn take_partial(&mut self) -> String {
        self.scanned = 0;
        std::mem::take(&mut self.text)
    }
}
