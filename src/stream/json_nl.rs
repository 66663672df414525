use memchr::memchr_iter;

use super::{Demuxer, WireMessage};

/// Newline-delimited JSON demultiplexer.
///
/// Every complete non-blank line becomes one unnamed [`WireMessage::Event`].
/// Payloads are not validated here; malformed lines reach the parse function.
#[derive(Debug, Default)]
pub struct JsonNlDemuxer {
    buffer: String,
}

impl JsonNlDemuxer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Demuxer for JsonNlDemuxer {
    fn demux(&mut self, chunk: &str) -> Vec<WireMessage> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();
        let mut line_start = 0usize;
        for line_end in memchr_iter(b'\n', self.buffer.as_bytes()) {
            let line = self.buffer[line_start..line_end].trim();
            if !line.is_empty() {
                out.push(WireMessage::Event {
                    data: line.to_owned(),
                    name: None,
                });
            }
            line_start = line_end + 1;
        }
        self.buffer.drain(..line_start);
        out
    }

    /// The last line of a body may lack its newline.
    fn finish(&mut self) -> Vec<WireMessage> {
        let rest = std::mem::take(&mut self.buffer);
        let line = rest.trim();
        if line.is_empty() {
            return Vec::new();
        }
        vec![WireMessage::Event {
            data: line.to_owned(),
            name: None,
        }]
    }
}
