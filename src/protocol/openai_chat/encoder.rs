use serde_json::Value;

use crate::error::DispatchError;
use crate::protocol::canonical::{
    CanonicalMessage, CanonicalPart, CanonicalRole, ChatGenerateRequest, ModelSelector,
    ToolChoice, ToolDeclaration,
};
use crate::protocol::mapping::canonical_role_to_openai;

use super::{
    OpenAiChatRequest, OpenAiMessage, OpenAiStop, OpenAiStreamOptions, OpenAiTool, OpenAiToolCall,
    OpenAiToolCallFunction, OpenAiToolChoice, OpenAiToolChoiceFunction,
    OpenAiToolChoiceFunctionCall, OpenAiToolFunction,
};

/// Encode a generation request into the `OpenAI` Chat Completions wire format.
///
/// # Errors
///
/// Returns [`DispatchError::Prepare`] when a message cannot be encoded.
pub fn encode_openai_chat_request(
    request: &ChatGenerateRequest,
    model: &ModelSelector,
    streaming: bool,
) -> Result<OpenAiChatRequest, DispatchError> {
    let mut messages: Vec<OpenAiMessage> = Vec::with_capacity(
        request.messages.len() + usize::from(request.system_message.is_some()),
    );

    if let Some(system) = request.system_message.as_deref().filter(|s| !s.is_empty()) {
        messages.push(OpenAiMessage {
            role: "system".to_string(),
            content: Some(Value::String(system.to_string())),
            ..OpenAiMessage::default()
        });
    }

    for msg in &request.messages {
        if msg.role == CanonicalRole::Tool {
            encode_tool_results(msg, &mut messages)?;
        } else {
            messages.push(encode_message(msg));
        }
    }

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(request.tools.iter().map(encode_tool).collect())
    };
    let tool_choice = encode_tool_choice(&request.tool_choice, &request.tools);

    let stop = model.stop_sequences.as_ref().and_then(|stops| match stops.len() {
        0 => None,
        1 => Some(OpenAiStop::Single(stops[0].clone())),
        _ => Some(OpenAiStop::Multi(stops.clone())),
    });

    Ok(OpenAiChatRequest {
        model: model.id.clone(),
        messages,
        tools,
        tool_choice,
        stream: streaming.then_some(true),
        stream_options: streaming.then_some(OpenAiStreamOptions {
            include_usage: Some(true),
        }),
        temperature: model.temperature,
        max_tokens: model.max_output_tokens,
        top_p: model.top_p,
        stop,
    })
}

fn encode_message(msg: &CanonicalMessage) -> OpenAiMessage {
    let role = canonical_role_to_openai(msg.role).to_string();

    let mut text_parts: Vec<&str> = Vec::new();
    let mut image_parts: Vec<Value> = Vec::new();
    let mut tool_calls: Vec<OpenAiToolCall> = Vec::new();

    for part in &msg.parts {
        match part {
            CanonicalPart::Text { text } => text_parts.push(text),
            CanonicalPart::ImageUrl { url, detail } => {
                let mut img_obj = serde_json::json!({"url": url});
                if let Some(d) = detail {
                    img_obj["detail"] = Value::String(d.clone());
                }
                image_parts.push(serde_json::json!({
                    "type": "image_url",
                    "image_url": img_obj,
                }));
            }
            CanonicalPart::ToolCall {
                id,
                name,
                arguments,
            } => tool_calls.push(OpenAiToolCall {
                id: id.clone(),
                type_: "function".to_string(),
                function: OpenAiToolCallFunction {
                    name: name.clone(),
                    arguments: arguments.clone(),
                },
            }),
            CanonicalPart::ToolResult { .. } => {}
        }
    }

    let content = if image_parts.is_empty() {
        (!text_parts.is_empty()).then(|| Value::String(text_parts.concat()))
    } else {
        let mut arr: Vec<Value> = text_parts
            .iter()
            .map(|t| serde_json::json!({"type": "text", "text": t}))
            .collect();
        arr.extend(image_parts);
        Some(Value::Array(arr))
    };

    OpenAiMessage {
        role,
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    }
}

/// Each tool result becomes its own `tool` message.
fn encode_tool_results(
    msg: &CanonicalMessage,
    out: &mut Vec<OpenAiMessage>,
) -> Result<(), DispatchError> {
    let before = out.len();
    for part in &msg.parts {
        if let CanonicalPart::ToolResult {
            tool_call_id,
            content,
        } = part
        {
            out.push(OpenAiMessage {
                role: "tool".to_string(),
                content: Some(Value::String(content.clone())),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
            });
        }
    }
    if out.len() == before {
        return Err(DispatchError::Prepare(
            "tool message without a tool result".to_string(),
        ));
    }
    Ok(())
}

fn encode_tool(tool: &ToolDeclaration) -> OpenAiTool {
    OpenAiTool {
        type_: "function".to_string(),
        function: OpenAiToolFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: (!tool.parameters.is_null()).then(|| tool.parameters.clone()),
        },
    }
}

fn encode_tool_choice(choice: &ToolChoice, tools: &[ToolDeclaration]) -> Option<OpenAiToolChoice> {
    if tools.is_empty() {
        return None;
    }
    Some(match choice {
        ToolChoice::Auto => OpenAiToolChoice::Mode("auto".to_string()),
        ToolChoice::None => OpenAiToolChoice::Mode("none".to_string()),
        ToolChoice::Required => OpenAiToolChoice::Mode("required".to_string()),
        ToolChoice::Specific(name) => OpenAiToolChoice::Function(OpenAiToolChoiceFunctionCall {
            type_: "function".to_string(),
            function: OpenAiToolChoiceFunction { name: name.clone() },
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_encode_simple_streaming() {
        let mut request = ChatGenerateRequest::from_user_text("What is 2+2?");
        request.system_message = Some("Be concise.".to_string());
        let mut model = ModelSelector::new("gpt-4o");
        model.stop_sequences = Some(vec!["END".to_string()]);

        let wire = encode_openai_chat_request(&request, &model, true).unwrap();
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "What is 2+2?");
        assert_eq!(json["stream"], true);
        assert_eq!(json["stream_options"]["include_usage"], true);
        assert_eq!(json["stop"], "END");
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn test_non_streaming_omits_stream_fields() {
        let request = ChatGenerateRequest::from_user_text("hi");
        let wire = encode_openai_chat_request(&request, &ModelSelector::new("m"), false).unwrap();
        let json = serde_json::to_value(&wire).unwrap();
        assert!(json.get("stream").is_none());
        assert!(json.get("stream_options").is_none());
    }

    #[test]
    fn test_encode_tool_calls_and_results() {
        let request = ChatGenerateRequest {
            messages: vec![
                CanonicalMessage::user_text("weather?"),
                CanonicalMessage {
                    role: CanonicalRole::Assistant,
                    parts: smallvec![CanonicalPart::ToolCall {
                        id: "call_1".to_string(),
                        name: "get_weather".to_string(),
                        arguments: "{\"city\":\"Paris\"}".to_string(),
                    }],
                },
                CanonicalMessage {
                    role: CanonicalRole::Tool,
                    parts: smallvec![CanonicalPart::ToolResult {
                        tool_call_id: "call_1".to_string(),
                        content: "sunny".to_string(),
                    }],
                },
            ],
            tools: vec![ToolDeclaration {
                name: "get_weather".to_string(),
                description: None,
                parameters: serde_json::json!({"type": "object"}),
            }],
            tool_choice: ToolChoice::Specific("get_weather".to_string()),
            ..ChatGenerateRequest::default()
        };
        let wire = encode_openai_chat_request(&request, &ModelSelector::new("m"), false).unwrap();
        let tc = wire.messages[1].tool_calls.as_ref().unwrap();
        assert_eq!(tc[0].function.arguments, "{\"city\":\"Paris\"}");
        assert_eq!(wire.messages[2].role, "tool");
        assert_eq!(wire.messages[2].tool_call_id.as_deref(), Some("call_1"));

        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["tool_choice"]["function"]["name"], "get_weather");
    }

    #[test]
    fn test_image_parts_use_content_array() {
        let request = ChatGenerateRequest {
            messages: vec![CanonicalMessage {
                role: CanonicalRole::User,
                parts: smallvec![
                    CanonicalPart::text("describe"),
                    CanonicalPart::ImageUrl {
                        url: "https://example.com/cat.png".to_string(),
                        detail: Some("low".to_string()),
                    },
                ],
            }],
            ..ChatGenerateRequest::default()
        };
        let wire = encode_openai_chat_request(&request, &ModelSelector::new("m"), false).unwrap();
        let content = wire.messages[0].content.as_ref().unwrap();
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["image_url"]["detail"], "low");
    }

    #[test]
    fn test_tool_message_without_result_is_rejected() {
        let request = ChatGenerateRequest {
            messages: vec![CanonicalMessage {
                role: CanonicalRole::Tool,
                parts: smallvec![CanonicalPart::text("orphan")],
            }],
            ..ChatGenerateRequest::default()
        };
        assert!(matches!(
            encode_openai_chat_request(&request, &ModelSelector::new("m"), false),
            Err(DispatchError::Prepare(_))
        ));
    }
}
