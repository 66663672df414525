use serde_json::Value;

use crate::dispatch::ChatGenerateParse;
use crate::error::ParseError;
use crate::intake::PartTransmitter;
use crate::protocol::canonical::Usage;
use crate::protocol::mapping::openai_stop_to_canonical;

use super::{OpenAiChatResponse, OpenAiStreamChunk, OpenAiUsage};

/// Parser for `OpenAI` Chat Completions responses.
#[derive(Debug, Clone, Copy)]
pub struct OpenAiChatParser {
    streaming: bool,
}

impl OpenAiChatParser {
    #[must_use]
    pub fn new(streaming: bool) -> Self {
        Self { streaming }
    }
}

impl ChatGenerateParse for OpenAiChatParser {
    fn parse(
        &self,
        tx: &mut PartTransmitter,
        payload: &str,
        _event_name: Option<&str>,
    ) -> Result<(), ParseError> {
        if self.streaming {
            parse_stream_chunk(tx, serde_json::from_str(payload)?)
        } else {
            parse_response(tx, serde_json::from_str(payload)?)
        }
    }
}

fn parse_stream_chunk(tx: &mut PartTransmitter, chunk: OpenAiStreamChunk) -> Result<(), ParseError> {
    if let Some(error) = chunk.error {
        return Err(ParseError::Upstream(error.describe()));
    }
    if let Some(model) = chunk.model.as_deref() {
        tx.set_model_name(model);
    }

    // Only the first choice is surfaced.
    for choice in chunk.choices.into_iter().filter(|choice| choice.index == 0) {
        let delta = choice.delta;
        if let Some(reasoning) = delta.reasoning_content.as_deref() {
            tx.append_reasoning(reasoning);
        }
        if let Some(content) = delta.content.as_deref() {
            tx.append_text(content);
        }
        if let Some(refusal) = delta.refusal.as_deref() {
            tx.append_text(refusal);
        }

        for tc in delta.tool_calls.unwrap_or_default() {
            let index = tc.index as usize;
            let (name, arguments) = match tc.function {
                Some(function) => (function.name, function.arguments),
                None => (None, None),
            };
            if let Some(id) = tc.id {
                tx.start_tool_call(index, id, name.unwrap_or_default());
            }
            if let Some(arguments) = arguments.as_deref() {
                tx.append_tool_args(index, arguments);
            }
        }

        if let Some(finish_reason) = choice.finish_reason.as_deref() {
            tx.end_open_tool_calls();
            tx.set_finish_reason(openai_stop_to_canonical(finish_reason));
        }
    }

    if let Some(usage) = chunk.usage {
        tx.set_usage(convert_usage(&usage));
    }
    Ok(())
}

fn parse_response(tx: &mut PartTransmitter, response: OpenAiChatResponse) -> Result<(), ParseError> {
    if let Some(error) = response.error {
        return Err(ParseError::Upstream(error.describe()));
    }
    if let Some(model) = response.model.as_deref() {
        tx.set_model_name(model);
    }
    let Some(choice) = response.choices.into_iter().find(|choice| choice.index == 0) else {
        return Err(ParseError::Schema("response has no choices".to_string()));
    };

    let message = choice.message;
    if let Some(reasoning) = message.reasoning_content.as_deref() {
        tx.append_reasoning(reasoning);
    }
    match message.content {
        Some(Value::String(text)) => tx.append_text(&text),
        Some(Value::Array(parts)) => {
            for part in &parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    tx.append_text(text);
                }
            }
        }
        _ => {}
    }
    if let Some(refusal) = message.refusal.as_deref() {
        tx.append_text(refusal);
    }

    for (index, tc) in message.tool_calls.unwrap_or_default().into_iter().enumerate() {
        tx.start_tool_call(index, tc.id, tc.function.name);
        tx.append_tool_args(index, &tc.function.arguments);
        tx.end_tool_call(index);
    }

    if let Some(finish_reason) = choice.finish_reason.as_deref() {
        tx.set_finish_reason(openai_stop_to_canonical(finish_reason));
    }
    if let Some(usage) = response.usage {
        tx.set_usage(convert_usage(&usage));
    }
    Ok(())
}

fn convert_usage(usage: &OpenAiUsage) -> Usage {
    let total_tokens = usage.total_tokens.or_else(|| {
        usage
            .prompt_tokens
            .zip(usage.completion_tokens)
            .map(|(input, output)| input.saturating_add(output))
    });
    Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        total_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{GenerationOp, StopReason};

    fn parse_stream(payloads: &[&str]) -> Vec<GenerationOp> {
        let parser = OpenAiChatParser::new(true);
        let mut tx = PartTransmitter::default();
        for payload in payloads {
            parser.parse(&mut tx, payload, None).unwrap();
        }
        tx.flush_all()
    }

    #[test]
    fn test_stream_text_and_finish() {
        let ops = parse_stream(&[
            r#"{"id":"c1","model":"gpt-4o","choices":[{"index":0,"delta":{"role":"assistant","content":""}}]}"#,
            r#"{"id":"c1","model":"gpt-4o","choices":[{"index":0,"delta":{"content":"Hello"}}]}"#,
            r#"{"id":"c1","model":"gpt-4o","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
            r#"{"id":"c1","model":"gpt-4o","choices":[],"usage":{"prompt_tokens":5,"completion_tokens":1,"total_tokens":6}}"#,
        ]);
        assert_eq!(
            ops,
            vec![
                GenerationOp::ModelName {
                    name: "gpt-4o".to_string()
                },
                GenerationOp::text_delta("Hello"),
                GenerationOp::FinishReason {
                    reason: StopReason::EndOfTurn
                },
                GenerationOp::Usage(Usage {
                    input_tokens: Some(5),
                    output_tokens: Some(1),
                    total_tokens: Some(6),
                }),
            ]
        );
    }

    #[test]
    fn test_stream_tool_call_fragments_close_on_finish() {
        let ops = parse_stream(&[
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"get_weather","arguments":""}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"city\":"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"Paris\"}"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
        ]);
        assert_eq!(
            ops,
            vec![
                GenerationOp::ToolCallStart {
                    index: 0,
                    id: "call_1".to_string(),
                    name: "get_weather".to_string()
                },
                GenerationOp::ToolCallArgsDelta {
                    index: 0,
                    delta: "{\"city\":".to_string()
                },
                GenerationOp::ToolCallArgsDelta {
                    index: 0,
                    delta: "\"Paris\"}".to_string()
                },
                GenerationOp::ToolCallEnd { index: 0 },
                GenerationOp::FinishReason {
                    reason: StopReason::ToolCalls
                },
            ]
        );
    }

    #[test]
    fn test_stream_in_band_error() {
        let parser = OpenAiChatParser::new(true);
        let mut tx = PartTransmitter::default();
        let err = parser
            .parse(
                &mut tx,
                r#"{"error":{"message":"Rate limit reached","type":"rate_limit_error"}}"#,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, ParseError::Upstream(ref m) if m.contains("Rate limit reached")));
    }

    #[test]
    fn test_stream_invalid_json() {
        let parser = OpenAiChatParser::new(true);
        let mut tx = PartTransmitter::default();
        assert!(matches!(
            parser.parse(&mut tx, "{not json", None),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn test_whole_body_response() {
        let parser = OpenAiChatParser::new(false);
        let mut tx = PartTransmitter::default();
        parser
            .parse(
                &mut tx,
                r#"{"id":"c","object":"chat.completion","model":"gpt-4o","choices":[{"index":0,"message":{"role":"assistant","content":"Hi there","tool_calls":[{"id":"call_9","type":"function","function":{"name":"f","arguments":"{}"}}]},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":3,"completion_tokens":2}}"#,
                None,
            )
            .unwrap();
        let ops = tx.flush_all();
        assert_eq!(ops[1], GenerationOp::text_delta("Hi there"));
        assert_eq!(ops[4], GenerationOp::ToolCallEnd { index: 0 });
        assert_eq!(
            ops.last(),
            Some(&GenerationOp::Usage(Usage {
                input_tokens: Some(3),
                output_tokens: Some(2),
                total_tokens: Some(5),
            }))
        );
    }

    #[test]
    fn test_whole_body_without_choices_is_schema_error() {
        let parser = OpenAiChatParser::new(false);
        let mut tx = PartTransmitter::default();
        assert!(matches!(
            parser.parse(&mut tx, r#"{"choices":[]}"#, None),
            Err(ParseError::Schema(_))
        ));
    }

    #[test]
    fn test_derived_total_saturates() {
        let usage = convert_usage(&OpenAiUsage {
            prompt_tokens: Some(u64::MAX),
            completion_tokens: Some(1),
            total_tokens: None,
        });
        assert_eq!(usage.total_tokens, Some(u64::MAX));
    }
}
