use rustc_hash::FxHashMap;

use crate::error::DispatchError;
use crate::protocol::canonical::{
    CanonicalPart, CanonicalRole, ChatGenerateRequest, ModelSelector, ToolChoice,
};
use crate::protocol::gemini::{
    GeminiBlob, GeminiContent, GeminiFileData, GeminiFunctionCall, GeminiFunctionCallingConfig,
    GeminiFunctionDeclaration, GeminiFunctionResponse, GeminiGenerationConfig, GeminiPart,
    GeminiRequest, GeminiToolConfig, GeminiToolDeclaration,
};
use crate::protocol::mapping::canonical_role_to_gemini;
use crate::util::split_data_url;

/// Encode a generation request into a Gemini `generateContent` body.
///
/// Streaming is selected by the endpoint, not the body.
///
/// # Errors
///
/// Returns [`DispatchError::Prepare`] when tool call arguments are invalid
/// JSON or no content remains after lifting system messages.
pub fn encode_gemini_request(
    request: &ChatGenerateRequest,
    model: &ModelSelector,
) -> Result<GeminiRequest, DispatchError> {
    // --- system instruction ---
    let mut system_parts: Vec<GeminiPart> = Vec::new();
    if let Some(system) = request.system_message.as_deref().filter(|s| !s.is_empty()) {
        system_parts.push(GeminiPart::text(system));
    }

    // functionResponse parts are keyed by function name, not call id.
    let mut call_id_to_name: FxHashMap<&str, &str> = FxHashMap::default();
    for msg in &request.messages {
        for part in &msg.parts {
            if let CanonicalPart::ToolCall { id, name, .. } = part {
                call_id_to_name.insert(id, name);
            }
        }
    }

    // --- contents ---
    let mut contents = Vec::with_capacity(request.messages.len());
    for msg in &request.messages {
        if msg.role == CanonicalRole::System {
            system_parts.push(GeminiPart::text(msg.joined_text()));
            continue;
        }

        let mut parts = Vec::with_capacity(msg.parts.len());
        for part in &msg.parts {
            match part {
                CanonicalPart::Text { text } => parts.push(GeminiPart::text(text.clone())),
                CanonicalPart::ToolCall {
                    id,
                    name,
                    arguments,
                } => {
                    let args: serde_json::Value = if arguments.trim().is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(arguments).map_err(|e| {
                            DispatchError::Prepare(format!(
                                "invalid arguments for tool call '{id}': {e}"
                            ))
                        })?
                    };
                    parts.push(GeminiPart {
                        function_call: Some(GeminiFunctionCall {
                            name: name.clone(),
                            args,
                        }),
                        ..GeminiPart::default()
                    });
                }
                CanonicalPart::ToolResult {
                    tool_call_id,
                    content,
                } => {
                    let name = call_id_to_name
                        .get(tool_call_id.as_str())
                        .map_or_else(|| tool_call_id.clone(), |name| (*name).to_string());
                    let response: serde_json::Value = serde_json::from_str(content)
                        .ok()
                        .filter(serde_json::Value::is_object)
                        .unwrap_or_else(|| serde_json::json!({ "result": content }));
                    parts.push(GeminiPart {
                        function_response: Some(GeminiFunctionResponse { name, response }),
                        ..GeminiPart::default()
                    });
                }
                CanonicalPart::ImageUrl { url, .. } => {
                    parts.push(match split_data_url(url) {
                        Some((mime_type, data)) => GeminiPart {
                            inline_data: Some(GeminiBlob {
                                mime_type: mime_type.to_string(),
                                data: data.to_string(),
                            }),
                            ..GeminiPart::default()
                        },
                        None => GeminiPart {
                            file_data: Some(GeminiFileData {
                                mime_type: None,
                                file_uri: url.clone(),
                            }),
                            ..GeminiPart::default()
                        },
                    });
                }
            }
        }

        if !parts.is_empty() {
            contents.push(GeminiContent {
                role: Some(canonical_role_to_gemini(msg.role).to_string()),
                parts,
            });
        }
    }
    if contents.is_empty() {
        return Err(DispatchError::Prepare(
            "Gemini requires at least one non-system message".to_string(),
        ));
    }

    // --- tools ---
    let tools = (!request.tools.is_empty()).then(|| {
        vec![GeminiToolDeclaration {
            function_declarations: request
                .tools
                .iter()
                .map(|tool| GeminiFunctionDeclaration {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: (!tool.parameters.is_null()).then(|| tool.parameters.clone()),
                })
                .collect(),
        }]
    });

    // --- tool config ---
    let tool_config = if request.tools.is_empty() {
        None
    } else {
        match &request.tool_choice {
            ToolChoice::Auto => None,
            ToolChoice::None => Some(calling_config("NONE", None)),
            ToolChoice::Required => Some(calling_config("ANY", None)),
            ToolChoice::Specific(name) => Some(calling_config("ANY", Some(vec![name.clone()]))),
        }
    };

    // --- generation config ---
    let generation_config = GeminiGenerationConfig {
        temperature: model.temperature,
        top_p: model.top_p,
        max_output_tokens: model.max_output_tokens,
        stop_sequences: model.stop_sequences.clone().filter(|s| !s.is_empty()),
    };

    Ok(GeminiRequest {
        contents,
        tools,
        tool_config,
        system_instruction: (!system_parts.is_empty()).then(|| GeminiContent {
            role: None,
            parts: system_parts,
        }),
        generation_config: (!generation_config.is_empty()).then_some(generation_config),
    })
}

fn calling_config(mode: &str, allowed: Option<Vec<String>>) -> GeminiToolConfig {
    GeminiToolConfig {
        function_calling_config: Some(GeminiFunctionCallingConfig {
            mode: Some(mode.to_string()),
            allowed_function_names: allowed,
        }),
    }
}
