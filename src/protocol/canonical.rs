use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Canonical message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    EndOfTurn,
    ToolCalls,
    MaxTokens,
    ContentFilter,
}

impl StopReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::EndOfTurn => "end-of-turn",
            StopReason::ToolCalls => "tool-calls",
            StopReason::MaxTokens => "max-tokens",
            StopReason::ContentFilter => "content-filter",
        }
    }
}

/// Tool choice specification.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    Specific(String),
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// A single part of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalPart {
    Text {
        text: String,
    },
    ImageUrl {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    ToolCall {
        id: String,
        name: String,
        /// JSON-encoded arguments object.
        arguments: String,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

impl CanonicalPart {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        CanonicalPart::Text { text: text.into() }
    }
}

/// A single message in the canonical conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub role: CanonicalRole,
    pub parts: SmallVec<[CanonicalPart; 1]>,
}

impl CanonicalMessage {
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: CanonicalRole::User,
            parts: smallvec::smallvec![CanonicalPart::text(text)],
        }
    }

    /// Concatenated text of all text parts.
    #[must_use]
    pub fn joined_text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let CanonicalPart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }
}

/// A tool's function declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// The provider-agnostic generation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatGenerateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    pub messages: Vec<CanonicalMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDeclaration>,
    #[serde(default)]
    pub tool_choice: ToolChoice,
}

impl ChatGenerateRequest {
    /// Single-turn request with one user message.
    #[must_use]
    pub fn from_user_text(text: impl Into<String>) -> Self {
        Self {
            messages: vec![CanonicalMessage::user_text(text)],
            ..Self::default()
        }
    }
}

/// Model selection and sampling parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSelector {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

impl ModelSelector {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// A normalized generation operation forwarded by the part transmitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum GenerationOp {
    TextDelta {
        text: String,
    },
    ReasoningDelta {
        text: String,
    },
    ToolCallStart {
        index: usize,
        id: String,
        name: String,
    },
    ToolCallArgsDelta {
        index: usize,
        delta: String,
    },
    ToolCallEnd {
        index: usize,
    },
    FinishReason {
        reason: StopReason,
    },
    Usage(Usage),
    ModelName {
        name: String,
    },
}

impl GenerationOp {
    #[must_use]
    pub fn text_delta(text: impl Into<String>) -> Self {
        GenerationOp::TextDelta { text: text.into() }
    }
}
