//! SSE (Server-Sent Events) demultiplexer.
//!
//! Handles the low-level splitting of decoded text into SSE frames,
//! including buffering partial lines and handling field semantics per the
//! [SSE specification](https://html.spec.whatwg.org/multipage/server-sent-events.html).

use memchr::memchr_iter;

use super::{Demuxer, WireMessage};

/// Incremental SSE line parser.
///
/// Feed it decoded text chunks (potentially split at arbitrary boundaries)
/// and it yields fully-assembled [`WireMessage`]s.
#[derive(Debug, Default)]
pub struct SseDemuxer {
    buffer: String,
    read_offset: usize,
    event_name: Option<String>,
    data_buffer: String,
    has_data: bool,
}

impl SseDemuxer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed decoded text and append complete messages into a caller-provided buffer.
    ///
    /// SSE rules:
    /// - `event:` sets the name for the next frame
    /// - `data:` appends to the data buffer (one leading space stripped);
    ///   multiple `data:` lines are joined with `\n`
    /// - an empty line terminates a frame
    /// - lines starting with `:` are comments, surfaced as [`WireMessage::Comment`]
    /// - `id:`, `retry:` and unknown fields are ignored
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<WireMessage>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let bytes = self.buffer.as_bytes();
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            Self::process_line(
                line,
                &mut self.event_name,
                &mut self.data_buffer,
                &mut self.has_data,
                out,
            );
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    fn process_line(
        line: &str,
        event_name: &mut Option<String>,
        data_buffer: &mut String,
        has_data: &mut bool,
        out: &mut Vec<WireMessage>,
    ) {
        if line.is_empty() {
            if *has_data {
                out.push(WireMessage::Event {
                    data: std::mem::take(data_buffer),
                    name: event_name.take(),
                });
                *has_data = false;
            } else {
                // a frame with only `event:` carries nothing
                *event_name = None;
            }
            return;
        }

        if let Some(comment) = line.strip_prefix(':') {
            out.push(WireMessage::Comment(comment.trim_start().to_owned()));
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if *has_data {
                data_buffer.push('\n');
            } else {
                *has_data = true;
            }
            data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *event_name = Some(value.to_owned());
        }
    }
}

impl Demuxer for SseDemuxer {
    fn demux(&mut self, chunk: &str) -> Vec<WireMessage> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }
}

/// Format an unnamed SSE frame (`data: ...`).
#[must_use]
pub fn data_frame(data: &str) -> String {
    let mut out = String::with_capacity(8 + data.len());
    out.push_str("data: ");
    out.push_str(data);
    out.push_str("\n\n");
    out
}

/// Format a named SSE frame (`event: ...` + `data: ...`).
#[must_use]
pub fn named_frame(event: &str, data: &str) -> String {
    let mut out = String::with_capacity(18 + event.len() + data.len());
    out.push_str("event: ");
    out.push_str(event);
    out.push('\n');
    out.push_str("data: ");
    out.push_str(data);
    out.push_str("\n\n");
    out
}
