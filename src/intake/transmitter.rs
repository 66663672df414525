use std::collections::VecDeque;
use std::time::{Duration, Instant};

use smallvec::SmallVec;

use crate::protocol::canonical::{GenerationOp, StopReason, Usage};

/// Buffering policy of the [`PartTransmitter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransmitterConfig {
    /// Coalesce consecutive text/reasoning deltas for at most this long.
    /// `None` forwards every delta as it arrives.
    pub throttle: Option<Duration>,
}

impl TransmitterConfig {
    /// Build from a millisecond setting where `0` disables throttling.
    #[must_use]
    pub fn from_throttle_ms(ms: u64) -> Self {
        Self {
            throttle: (ms > 0).then(|| Duration::from_millis(ms)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeltaKind {
    Text,
    Reasoning,
}

#[derive(Debug)]
struct PendingDelta {
    kind: DeltaKind,
    text: String,
}

impl PendingDelta {
    fn into_op(self) -> GenerationOp {
        match self.kind {
            DeltaKind::Text => GenerationOp::TextDelta { text: self.text },
            DeltaKind::Reasoning => GenerationOp::ReasoningDelta { text: self.text },
        }
    }
}

/// Accumulates normalized generation fragments emitted by provider parsers.
///
/// Parsers call the mutation methods; the orchestrator drains the resulting
/// [`GenerationOp`]s after every parse call, in emission order.
#[derive(Debug)]
pub struct PartTransmitter {
    config: TransmitterConfig,
    ready: VecDeque<GenerationOp>,
    pending: Option<PendingDelta>,
    last_flush: Instant,
    open_tool_calls: SmallVec<[usize; 4]>,
    tool_calls_started: usize,
    last_usage: Option<Usage>,
    finish_reason: Option<StopReason>,
    model_name: Option<String>,
}

impl Default for PartTransmitter {
    fn default() -> Self {
        Self::new(TransmitterConfig::default())
    }
}

impl PartTransmitter {
    #[must_use]
    pub fn new(config: TransmitterConfig) -> Self {
        Self {
            config,
            ready: VecDeque::with_capacity(8),
            pending: None,
            last_flush: Instant::now(),
            open_tool_calls: SmallVec::new(),
            tool_calls_started: 0,
            last_usage: None,
            finish_reason: None,
            model_name: None,
        }
    }

    pub fn append_text(&mut self, text: &str) {
        self.push_delta(DeltaKind::Text, text);
    }

    pub fn append_reasoning(&mut self, text: &str) {
        self.push_delta(DeltaKind::Reasoning, text);
    }

    /// Open a tool call at `index`.
    pub fn start_tool_call(&mut self, index: usize, id: impl Into<String>, name: impl Into<String>) {
        if !self.open_tool_calls.contains(&index) {
            self.open_tool_calls.push(index);
        }
        self.tool_calls_started += 1;
        self.push_op(GenerationOp::ToolCallStart {
            index,
            id: id.into(),
            name: name.into(),
        });
    }

    pub fn append_tool_args(&mut self, index: usize, delta: &str) {
        if delta.is_empty() {
            return;
        }
        if !self.open_tool_calls.contains(&index) {
            tracing::debug!(index, "tool arguments for a tool call that is not open");
        }
        self.push_op(GenerationOp::ToolCallArgsDelta {
            index,
            delta: delta.to_owned(),
        });
    }

    /// Close the tool call at `index`; no-op when it is not open.
    pub fn end_tool_call(&mut self, index: usize) {
        let Some(pos) = self.open_tool_calls.iter().position(|open| *open == index) else {
            return;
        };
        self.open_tool_calls.remove(pos);
        self.push_op(GenerationOp::ToolCallEnd { index });
    }

    /// Close every open tool call, in the order they were opened.
    pub fn end_open_tool_calls(&mut self) {
        let open = std::mem::take(&mut self.open_tool_calls);
        for index in open {
            self.push_op(GenerationOp::ToolCallEnd { index });
        }
    }

    pub fn set_finish_reason(&mut self, reason: StopReason) {
        self.finish_reason = Some(reason);
        self.push_op(GenerationOp::FinishReason { reason });
    }

    pub fn set_usage(&mut self, usage: Usage) {
        self.last_usage = Some(usage.clone());
        self.push_op(GenerationOp::Usage(usage));
    }

    /// Report the model that served the request; repeated names are dropped.
    pub fn set_model_name(&mut self, name: &str) {
        if name.is_empty() || self.model_name.as_deref() == Some(name) {
            return;
        }
        self.model_name = Some(name.to_owned());
        self.push_op(GenerationOp::ModelName {
            name: name.to_owned(),
        });
    }

    #[must_use]
    pub fn is_tool_call_open(&self, index: usize) -> bool {
        self.open_tool_calls.contains(&index)
    }

    /// Number of tool calls started so far in this invocation.
    #[must_use]
    pub fn tool_call_count(&self) -> usize {
        self.tool_calls_started
    }

    #[must_use]
    pub fn last_usage(&self) -> Option<&Usage> {
        self.last_usage.as_ref()
    }

    #[must_use]
    pub fn finish_reason(&self) -> Option<StopReason> {
        self.finish_reason
    }

    /// Take every operation that is due for delivery.
    ///
    /// Coalesced deltas stay buffered until the throttle interval elapsed.
    pub fn drain_ready(&mut self) -> Vec<GenerationOp> {
        if let (Some(throttle), Some(_)) = (self.config.throttle, self.pending.as_ref()) {
            if self.last_flush.elapsed() >= throttle {
                self.flush_pending();
            }
        }
        self.ready.drain(..).collect()
    }

    /// Take every operation, including buffered deltas.
    pub fn flush_all(&mut self) -> Vec<GenerationOp> {
        self.flush_pending();
        self.ready.drain(..).collect()
    }

    fn push_delta(&mut self, kind: DeltaKind, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.config.throttle.is_none() {
            self.ready.push_back(
                PendingDelta {
                    kind,
                    text: text.to_owned(),
                }
                .into_op(),
            );
            return;
        }
        match self.pending.as_mut() {
            Some(pending) if pending.kind == kind => pending.text.push_str(text),
            _ => {
                self.flush_pending();
                self.pending = Some(PendingDelta {
                    kind,
                    text: text.to_owned(),
                });
            }
        }
    }

    fn push_op(&mut self, op: GenerationOp) {
        self.flush_pending();
        self.ready.push_back(op);
    }

    fn flush_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.ready.push_back(pending.into_op());
            self.last_flush = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unthrottled_forwards_every_delta() {
        let mut tx = PartTransmitter::default();
        tx.append_text("He");
        tx.append_text("llo");
        tx.append_text("");
        assert_eq!(
            tx.drain_ready(),
            vec![GenerationOp::text_delta("He"), GenerationOp::text_delta("llo")]
        );
        assert!(tx.drain_ready().is_empty());
    }

    #[test]
    fn test_throttle_coalesces_until_flush() {
        let mut tx = PartTransmitter::new(TransmitterConfig::from_throttle_ms(60_000));
        tx.append_text("a");
        tx.append_text("b");
        assert!(tx.drain_ready().is_empty());
        tx.append_text("c");
        assert_eq!(tx.flush_all(), vec![GenerationOp::text_delta("abc")]);
    }

    #[test]
    fn test_throttle_flushes_before_non_delta_op() {
        let mut tx = PartTransmitter::new(TransmitterConfig::from_throttle_ms(60_000));
        tx.append_reasoning("think");
        tx.append_text("x");
        tx.append_text("y");
        tx.set_finish_reason(StopReason::EndOfTurn);
        assert_eq!(
            tx.drain_ready(),
            vec![
                GenerationOp::ReasoningDelta {
                    text: "think".to_owned()
                },
                GenerationOp::text_delta("xy"),
                GenerationOp::FinishReason {
                    reason: StopReason::EndOfTurn
                },
            ]
        );
    }

    #[test]
    fn test_zero_throttle_means_off() {
        assert_eq!(TransmitterConfig::from_throttle_ms(0).throttle, None);
    }

    #[test]
    fn test_tool_call_lifecycle() {
        let mut tx = PartTransmitter::default();
        tx.start_tool_call(0, "call_1", "lookup");
        tx.append_tool_args(0, "{\"q\":");
        tx.append_tool_args(0, "1}");
        assert!(tx.is_tool_call_open(0));
        tx.end_tool_call(0);
        tx.end_tool_call(0);
        assert!(!tx.is_tool_call_open(0));
        let ops = tx.drain_ready();
        assert_eq!(ops.len(), 4);
        assert_eq!(ops[3], GenerationOp::ToolCallEnd { index: 0 });
        assert_eq!(tx.tool_call_count(), 1);
    }

    #[test]
    fn test_end_open_tool_calls_in_open_order() {
        let mut tx = PartTransmitter::default();
        tx.start_tool_call(2, "b", "f");
        tx.start_tool_call(0, "a", "g");
        let _ = tx.drain_ready();
        tx.end_open_tool_calls();
        assert_eq!(
            tx.drain_ready(),
            vec![
                GenerationOp::ToolCallEnd { index: 2 },
                GenerationOp::ToolCallEnd { index: 0 }
            ]
        );
    }

    #[test]
    fn test_model_name_deduplicated_and_usage_remembered() {
        let mut tx = PartTransmitter::default();
        tx.set_model_name("m-1");
        tx.set_model_name("m-1");
        tx.set_usage(Usage {
            input_tokens: Some(3),
            output_tokens: Some(4),
            total_tokens: Some(7),
        });
        assert_eq!(tx.drain_ready().len(), 2);
        assert_eq!(tx.last_usage().and_then(|u| u.total_tokens), Some(7));
    }
}
