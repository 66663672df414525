use crate::dispatch::ChatGenerateParse;
use crate::error::ParseError;
use crate::intake::PartTransmitter;
use crate::protocol::canonical::{StopReason, Usage};
use crate::protocol::mapping::ollama_stop_to_canonical;
use crate::util::next_call_id;

use super::OllamaChatResponse;

/// Parser for Ollama `/api/chat` lines and whole responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct OllamaParser;

impl OllamaParser {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ChatGenerateParse for OllamaParser {
    fn parse(
        &self,
        tx: &mut PartTransmitter,
        payload: &str,
        _event_name: Option<&str>,
    ) -> Result<(), ParseError> {
        let response: OllamaChatResponse = serde_json::from_str(payload)?;
        if let Some(error) = response.error {
            return Err(ParseError::Upstream(error));
        }
        if let Some(model) = response.model.as_deref() {
            tx.set_model_name(model);
        }

        if let Some(message) = response.message {
            if let Some(thinking) = message.thinking.as_deref() {
                tx.append_reasoning(thinking);
            }
            tx.append_text(&message.content);
            for call in message.tool_calls.unwrap_or_default() {
                let index = tx.tool_call_count();
                tx.start_tool_call(index, next_call_id(), call.function.name);
                let args = if call.function.arguments.is_null() {
                    "{}".to_string()
                } else {
                    call.function.arguments.to_string()
                };
                tx.append_tool_args(index, &args);
                tx.end_tool_call(index);
            }
        }

        if response.done {
            let mut reason =
                ollama_stop_to_canonical(response.done_reason.as_deref().unwrap_or("stop"));
            if reason == StopReason::EndOfTurn && tx.tool_call_count() > 0 {
                reason = StopReason::ToolCalls;
            }
            tx.set_finish_reason(reason);
            if response.prompt_eval_count.is_some() || response.eval_count.is_some() {
                tx.set_usage(Usage {
                    input_tokens: response.prompt_eval_count,
                    output_tokens: response.eval_count,
                    total_tokens: Some(
                        response
                            .prompt_eval_count
                            .unwrap_or(0)
                            .saturating_add(response.eval_count.unwrap_or(0)),
                    ),
                });
            }
        }
        Ok(())
    }
}
