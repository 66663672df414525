use crate::dispatch::ChatGenerateParse;
use crate::error::ParseError;
use crate::intake::PartTransmitter;
use crate::protocol::canonical::{StopReason, Usage};
use crate::protocol::mapping::gemini_stop_to_canonical;
use crate::util::next_call_id;

use super::GeminiResponse;

/// Parser for Gemini `generateContent` responses.
///
/// A streamed chunk and a whole response share one shape, so a single
/// code path serves both modes.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiParser;

impl GeminiParser {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ChatGenerateParse for GeminiParser {
    fn parse(
        &self,
        tx: &mut PartTransmitter,
        payload: &str,
        _event_name: Option<&str>,
    ) -> Result<(), ParseError> {
        let response: GeminiResponse = serde_json::from_str(payload)?;
        parse_response(tx, response)
    }
}

fn parse_response(tx: &mut PartTransmitter, response: GeminiResponse) -> Result<(), ParseError> {
    if let Some(error) = response.error.as_ref() {
        return Err(ParseError::Upstream(error.describe()));
    }
    if let Some(model) = response.model_version.as_deref() {
        tx.set_model_name(model);
    }

    if response.candidates.is_empty() {
        if let Some(reason) = response
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
        {
            tracing::debug!(reason, "prompt blocked by provider");
            tx.set_finish_reason(StopReason::ContentFilter);
        }
    }

    // Only the first candidate is surfaced.
    if let Some(candidate) = response.candidates.into_iter().find(|c| c.index.unwrap_or(0) == 0) {
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(text) = part.text.as_deref() {
                if part.thought == Some(true) {
                    tx.append_reasoning(text);
                } else {
                    tx.append_text(text);
                }
            }
            // Function calls arrive whole.
            if let Some(call) = part.function_call {
                let index = tx.tool_call_count();
                tx.start_tool_call(index, next_call_id(), call.name);
                let args = if call.args.is_null() {
                    "{}".to_string()
                } else {
                    call.args.to_string()
                };
                tx.append_tool_args(index, &args);
                tx.end_tool_call(index);
            }
        }

        if let Some(finish_reason) = candidate.finish_reason.as_deref() {
            let mut reason = gemini_stop_to_canonical(finish_reason);
            if reason == StopReason::EndOfTurn && tx.tool_call_count() > 0 {
                reason = StopReason::ToolCalls;
            }
            tx.set_finish_reason(reason);
        }
    }

    if let Some(usage) = response.usage_metadata {
        let output_tokens = match (usage.candidates_token_count, usage.thoughts_token_count) {
            (Some(candidates), Some(thoughts)) => Some(candidates.saturating_add(thoughts)),
            (candidates, thoughts) => candidates.or(thoughts),
        };
        tx.set_usage(Usage {
            input_tokens: usage.prompt_token_count,
            output_tokens,
            total_tokens: usage.total_token_count,
        });
    }
    Ok(())
}
