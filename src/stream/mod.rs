pub mod decoder;
pub mod json_nl;
pub mod sse;

pub use decoder::Utf8ChunkDecoder;
pub use json_nl::JsonNlDemuxer;
pub use sse::SseDemuxer;

use serde::{Deserialize, Serialize};

/// In-band payload some providers send to mark the end of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One discrete message produced by a [`Demuxer`], prior to semantic parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// A data-carrying message, optionally named (SSE `event:` field).
    Event { data: String, name: Option<String> },
    /// A comment / keep-alive line with no payload for the parser.
    Comment(String),
}

impl WireMessage {
    #[must_use]
    pub fn payload_len(&self) -> usize {
        match self {
            WireMessage::Event { data, .. } => data.len(),
            WireMessage::Comment(text) => text.len(),
        }
    }
}

/// Splits decoded response text into wire messages.
///
/// Implementations may buffer partial frames across calls within one
/// invocation. They never fail: malformed framing yields no messages.
pub trait Demuxer: Send {
    fn demux(&mut self, chunk: &str) -> Vec<WireMessage>;

    /// Flush buffered input once the body has closed.
    ///
    /// SSE drops an unterminated trailing event, so the default yields nothing.
    fn finish(&mut self) -> Vec<WireMessage> {
        Vec::new()
    }
}

/// Framing convention of a streamed response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DemuxerFormat {
    /// `text/event-stream` framing.
    Sse,
    /// One JSON document per line.
    JsonNl,
}

impl DemuxerFormat {
    /// Create a fresh demuxer for one invocation.
    #[must_use]
    pub fn create_demuxer(self) -> Box<dyn Demuxer> {
        match self {
            DemuxerFormat::Sse => Box::new(SseDemuxer::new()),
            DemuxerFormat::JsonNl => Box::new(JsonNlDemuxer::new()),
        }
    }
}

/// Whether an event payload is the end-of-stream sentinel.
#[must_use]
pub fn is_done_sentinel(data: &str) -> bool {
    data == DONE_SENTINEL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_selects_demuxer() {
        let mut sse = DemuxerFormat::Sse.create_demuxer();
        assert_eq!(sse.demux("data: a\n\n").len(), 1);
        let mut nl = DemuxerFormat::JsonNl.create_demuxer();
        assert_eq!(nl.demux("{}\n{}\n").len(), 2);
    }

    #[test]
    fn test_done_sentinel_is_exact() {
        assert!(is_done_sentinel("[DONE]"));
        assert!(!is_done_sentinel("[DONE] "));
        assert!(!is_done_sentinel("{\"done\":true}"));
    }
}
