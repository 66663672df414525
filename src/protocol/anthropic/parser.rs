use crate::dispatch::ChatGenerateParse;
use crate::error::ParseError;
use crate::intake::PartTransmitter;
use crate::protocol::canonical::Usage;
use crate::protocol::mapping::anthropic_stop_to_canonical;

use super::{
    AnthropicContentBlock, AnthropicDelta, AnthropicResponse, AnthropicStreamEvent, AnthropicUsage,
};

/// Parser for Anthropic Messages responses.
///
/// Streaming payloads carry their event type both in the SSE `event:` field
/// and in the JSON `type` field; the JSON field is authoritative.
#[derive(Debug, Clone, Copy)]
pub struct AnthropicParser {
    streaming: bool,
}

impl AnthropicParser {
    #[must_use]
    pub fn new(streaming: bool) -> Self {
        Self { streaming }
    }
}

impl ChatGenerateParse for AnthropicParser {
    fn parse(
        &self,
        tx: &mut PartTransmitter,
        payload: &str,
        event_name: Option<&str>,
    ) -> Result<(), ParseError> {
        if !self.streaming {
            return parse_response(tx, serde_json::from_str(payload)?);
        }
        match serde_json::from_str::<AnthropicStreamEvent>(payload) {
            Ok(event) => parse_stream_event(tx, event),
            Err(_) if event_name == Some("error") => {
                Err(ParseError::Upstream(payload.trim().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_stream_event(tx: &mut PartTransmitter, event: AnthropicStreamEvent) -> Result<(), ParseError> {
    match event {
        AnthropicStreamEvent::MessageStart { message } => {
            if let Some(model) = message.model.as_deref() {
                tx.set_model_name(model);
            }
            if let Some(usage) = message.usage.as_ref() {
                let usage = merge_usage(tx.last_usage(), usage);
                tx.set_usage(usage);
            }
        }
        AnthropicStreamEvent::ContentBlockStart {
            index,
            content_block,
        } => match content_block {
            AnthropicContentBlock::Text { text } => tx.append_text(&text),
            AnthropicContentBlock::Thinking { thinking } => tx.append_reasoning(&thinking),
            AnthropicContentBlock::ToolUse { id, name, input } => {
                tx.start_tool_call(index, id, name);
                // Streams announce an empty input object and send arguments as deltas.
                if input.as_object().is_some_and(|obj| !obj.is_empty()) {
                    tx.append_tool_args(index, &input.to_string());
                }
            }
            AnthropicContentBlock::Other => {}
        },
        AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
            AnthropicDelta::TextDelta { text } => tx.append_text(&text),
            AnthropicDelta::ThinkingDelta { thinking } => tx.append_reasoning(&thinking),
            AnthropicDelta::InputJsonDelta { partial_json } => {
                tx.append_tool_args(index, &partial_json);
            }
            AnthropicDelta::Other => {}
        },
        AnthropicStreamEvent::ContentBlockStop { index } => tx.end_tool_call(index),
        AnthropicStreamEvent::MessageDelta { delta, usage } => {
            tx.end_open_tool_calls();
            if let Some(stop_reason) = delta.stop_reason.as_deref() {
                tx.set_finish_reason(anthropic_stop_to_canonical(stop_reason));
            }
            if let Some(usage) = usage.as_ref() {
                let usage = merge_usage(tx.last_usage(), usage);
                tx.set_usage(usage);
            }
        }
        AnthropicStreamEvent::MessageStop
        | AnthropicStreamEvent::Ping
        | AnthropicStreamEvent::Unknown => {}
        AnthropicStreamEvent::Error { error } => {
            return Err(ParseError::Upstream(error.describe()));
        }
    }
    Ok(())
}

fn parse_response(tx: &mut PartTransmitter, response: AnthropicResponse) -> Result<(), ParseError> {
    if let Some(error) = response.error.as_ref() {
        return Err(ParseError::Upstream(error.describe()));
    }
    if response.type_.as_deref() == Some("error") {
        return Err(ParseError::Upstream("unspecified error".to_string()));
    }
    if let Some(model) = response.model.as_deref() {
        tx.set_model_name(model);
    }

    let mut tool_index = 0;
    for block in response.content {
        match block {
            AnthropicContentBlock::Text { text } => tx.append_text(&text),
            AnthropicContentBlock::Thinking { thinking } => tx.append_reasoning(&thinking),
            AnthropicContentBlock::ToolUse { id, name, input } => {
                tx.start_tool_call(tool_index, id, name);
                tx.append_tool_args(tool_index, &input.to_string());
                tx.end_tool_call(tool_index);
                tool_index += 1;
            }
            AnthropicContentBlock::Other => {}
        }
    }

    if let Some(stop_reason) = response.stop_reason.as_deref() {
        tx.set_finish_reason(anthropic_stop_to_canonical(stop_reason));
    }
    if let Some(usage) = response.usage.as_ref() {
        tx.set_usage(merge_usage(None, usage));
    }
    Ok(())
}

/// Anthropic reports input tokens at message start and output tokens at the end.
fn merge_usage(previous: Option<&Usage>, update: &AnthropicUsage) -> Usage {
    let input_tokens = update
        .input_tokens
        .or_else(|| previous.and_then(|u| u.input_tokens));
    let output_tokens = update
        .output_tokens
        .or_else(|| previous.and_then(|u| u.output_tokens));
    Usage {
        input_tokens,
        output_tokens,
        total_tokens: Some(
            input_tokens
                .unwrap_or(0)
                .saturating_add(output_tokens.unwrap_or(0)),
        ),
    }
}
