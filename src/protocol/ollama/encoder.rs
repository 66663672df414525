use crate::error::DispatchError;
use crate::protocol::canonical::{
    CanonicalMessage, CanonicalPart, CanonicalRole, ChatGenerateRequest, ModelSelector,
};
use crate::protocol::mapping::canonical_role_to_openai;
use crate::util::split_data_url;

use super::{
    OllamaChatMessage, OllamaChatRequest, OllamaFunction, OllamaFunctionCall, OllamaOptions,
    OllamaTool, OllamaToolCall,
};

/// Encode a generation request into an Ollama `/api/chat` body.
///
/// Ollama ignores `tool_choice`; tools are always offered in auto mode.
///
/// # Errors
///
/// Returns [`DispatchError::Prepare`] for remote image URLs (Ollama accepts
/// inline base64 only) and invalid tool call arguments.
pub fn encode_ollama_request(
    request: &ChatGenerateRequest,
    model: &ModelSelector,
    streaming: bool,
) -> Result<OllamaChatRequest, DispatchError> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = request.system_message.as_deref().filter(|s| !s.is_empty()) {
        messages.push(OllamaChatMessage {
            role: "system".to_string(),
            content: system.to_string(),
            ..OllamaChatMessage::default()
        });
    }
    for msg in &request.messages {
        encode_message(msg, &mut messages)?;
    }

    let tools = (!request.tools.is_empty()).then(|| {
        request
            .tools
            .iter()
            .map(|tool| OllamaTool {
                tool_type: "function".to_string(),
                function: OllamaFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone().unwrap_or_default(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect()
    });

    let options = OllamaOptions {
        temperature: model.temperature,
        top_p: model.top_p,
        num_predict: model.max_output_tokens,
        stop: model.stop_sequences.clone().filter(|s| !s.is_empty()),
    };
    let has_options = options.temperature.is_some()
        || options.top_p.is_some()
        || options.num_predict.is_some()
        || options.stop.is_some();

    Ok(OllamaChatRequest {
        model: model.id.clone(),
        messages,
        tools,
        stream: streaming,
        options: has_options.then_some(options),
    })
}

fn encode_message(
    msg: &CanonicalMessage,
    out: &mut Vec<OllamaChatMessage>,
) -> Result<(), DispatchError> {
    if msg.role == CanonicalRole::Tool {
        for part in &msg.parts {
            if let CanonicalPart::ToolResult { content, .. } = part {
                out.push(OllamaChatMessage {
                    role: "tool".to_string(),
                    content: content.clone(),
                    ..OllamaChatMessage::default()
                });
            }
        }
        return Ok(());
    }

    let mut content = String::new();
    let mut images = Vec::new();
    let mut tool_calls = Vec::new();
    for part in &msg.parts {
        match part {
            CanonicalPart::Text { text } => content.push_str(text),
            CanonicalPart::ImageUrl { url, .. } => {
                let Some((_, data)) = split_data_url(url) else {
                    return Err(DispatchError::Prepare(
                        "Ollama accepts inline base64 images only".to_string(),
                    ));
                };
                images.push(data.to_string());
            }
            CanonicalPart::ToolCall {
                id,
                name,
                arguments,
            } => {
                let arguments = if arguments.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(arguments).map_err(|e| {
                        DispatchError::Prepare(format!(
                            "invalid arguments for tool call '{id}': {e}"
                        ))
                    })?
                };
                tool_calls.push(OllamaToolCall {
                    function: OllamaFunctionCall {
                        name: name.clone(),
                        arguments,
                    },
                });
            }
            CanonicalPart::ToolResult { .. } => {}
        }
    }

    out.push(OllamaChatMessage {
        role: canonical_role_to_openai(msg.role).to_string(),
        content,
        images: (!images.is_empty()).then_some(images),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        thinking: None,
    });
    Ok(())
}
