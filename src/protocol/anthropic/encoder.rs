use serde_json::{json, Value};

use crate::error::DispatchError;
use crate::protocol::anthropic::{AnthropicMessage, AnthropicRequest, AnthropicTool};
use crate::protocol::canonical::{
    CanonicalPart, CanonicalRole, ChatGenerateRequest, ModelSelector, ToolChoice, ToolDeclaration,
};
use crate::protocol::mapping::canonical_role_to_anthropic;
use crate::util::split_data_url;

/// `max_tokens` is mandatory for Anthropic.
const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Encode a generation request into the Anthropic Messages API wire format.
///
/// # Errors
///
/// Returns [`DispatchError::Prepare`] when tool call arguments are not valid
/// JSON or the conversation has no non-system message.
pub fn encode_anthropic_request(
    request: &ChatGenerateRequest,
    model: &ModelSelector,
    streaming: bool,
) -> Result<AnthropicRequest, DispatchError> {
    // --- system ---
    let mut system_parts: Vec<String> = Vec::new();
    if let Some(system) = request.system_message.as_deref().filter(|s| !s.is_empty()) {
        system_parts.push(system.to_string());
    }

    // --- messages ---
    let mut messages: Vec<AnthropicMessage> = Vec::with_capacity(request.messages.len());
    for msg in &request.messages {
        if msg.role == CanonicalRole::System {
            system_parts.push(msg.joined_text());
            continue;
        }

        let role = canonical_role_to_anthropic(msg.role);
        let content = encode_parts(msg.role, &msg.parts)?;
        if content.is_empty() {
            continue;
        }
        // Consecutive same-role turns are merged.
        match messages.last_mut() {
            Some(last) if last.role == role => last.content.extend(content),
            _ => messages.push(AnthropicMessage {
                role: role.to_string(),
                content,
            }),
        }
    }
    if messages.is_empty() {
        return Err(DispatchError::Prepare(
            "Anthropic requires at least one non-system message".to_string(),
        ));
    }

    // --- tools ---
    let tools = (!request.tools.is_empty()).then(|| {
        request
            .tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: if t.parameters.is_null() {
                    json!({"type": "object"})
                } else {
                    t.parameters.clone()
                },
            })
            .collect()
    });

    Ok(AnthropicRequest {
        model: model.id.clone(),
        max_tokens: model.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
        messages,
        tools,
        tool_choice: encode_tool_choice(&request.tool_choice, &request.tools),
        stream: streaming.then_some(true),
        temperature: model.temperature,
        top_p: model.top_p,
        stop_sequences: model.stop_sequences.clone().filter(|s| !s.is_empty()),
    })
}

/// Encode parts into Anthropic content blocks.
fn encode_parts(role: CanonicalRole, parts: &[CanonicalPart]) -> Result<Vec<Value>, DispatchError> {
    let mut blocks = Vec::with_capacity(parts.len());
    // Anthropic requires `tool_result` blocks to come first in a user message.
    if matches!(role, CanonicalRole::User | CanonicalRole::Tool) {
        for part in parts {
            if matches!(part, CanonicalPart::ToolResult { .. }) {
                encode_part(part, &mut blocks)?;
            }
        }
        for part in parts {
            if !matches!(part, CanonicalPart::ToolResult { .. }) {
                encode_part(part, &mut blocks)?;
            }
        }
    } else {
        for part in parts {
            encode_part(part, &mut blocks)?;
        }
    }
    Ok(blocks)
}

fn encode_part(part: &CanonicalPart, blocks: &mut Vec<Value>) -> Result<(), DispatchError> {
    match part {
        CanonicalPart::Text { text } => {
            if !text.is_empty() {
                blocks.push(json!({"type": "text", "text": text}));
            }
        }
        CanonicalPart::ToolCall {
            id,
            name,
            arguments,
        } => {
            let input: Value = if arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(arguments).map_err(|e| {
                    DispatchError::Prepare(format!("invalid arguments for tool call '{id}': {e}"))
                })?
            };
            blocks.push(json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": input,
            }));
        }
        CanonicalPart::ToolResult {
            tool_call_id,
            content,
        } => blocks.push(json!({
            "type": "tool_result",
            "tool_use_id": tool_call_id,
            "content": content,
        })),
        CanonicalPart::ImageUrl { url, .. } => {
            let source = match split_data_url(url) {
                Some((media_type, data)) => json!({
                    "type": "base64",
                    "media_type": media_type,
                    "data": data,
                }),
                None => json!({"type": "url", "url": url}),
            };
            blocks.push(json!({"type": "image", "source": source}));
        }
    }
    Ok(())
}

fn encode_tool_choice(choice: &ToolChoice, tools: &[ToolDeclaration]) -> Option<Value> {
    if tools.is_empty() {
        return None;
    }
    Some(match choice {
        ToolChoice::Auto => json!({"type": "auto"}),
        ToolChoice::None => json!({"type": "none"}),
        ToolChoice::Required => json!({"type": "any"}),
        ToolChoice::Specific(name) => json!({"type": "tool", "name": name}),
    })
}
