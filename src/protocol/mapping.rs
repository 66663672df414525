use super::canonical::{CanonicalRole, StopReason};

// ---------------------------------------------------------------------------
// Role mappings (outbound)
// ---------------------------------------------------------------------------

#[must_use]
pub fn canonical_role_to_openai(role: CanonicalRole) -> &'static str {
    match role {
        CanonicalRole::System => "system",
        CanonicalRole::User => "user",
        CanonicalRole::Assistant => "assistant",
        CanonicalRole::Tool => "tool",
    }
}

#[must_use]
pub fn canonical_role_to_anthropic(role: CanonicalRole) -> &'static str {
    match role {
        // system is top-level in Anthropic; tool results travel in user turns
        CanonicalRole::System | CanonicalRole::User | CanonicalRole::Tool => "user",
        CanonicalRole::Assistant => "assistant",
    }
}

#[must_use]
pub fn canonical_role_to_gemini(role: CanonicalRole) -> &'static str {
    match role {
        CanonicalRole::System | CanonicalRole::User => "user",
        CanonicalRole::Assistant => "model",
        CanonicalRole::Tool => "function",
    }
}

// ---------------------------------------------------------------------------
// Stop reason mappings (inbound)
// ---------------------------------------------------------------------------

#[must_use]
pub fn openai_stop_to_canonical(s: &str) -> StopReason {
    match s {
        "tool_calls" | "function_call" => StopReason::ToolCalls,
        "length" => StopReason::MaxTokens,
        "content_filter" => StopReason::ContentFilter,
        _ => StopReason::EndOfTurn,
    }
}

#[must_use]
pub fn anthropic_stop_to_canonical(s: &str) -> StopReason {
    match s {
        "tool_use" => StopReason::ToolCalls,
        "max_tokens" => StopReason::MaxTokens,
        "refusal" => StopReason::ContentFilter,
        _ => StopReason::EndOfTurn,
    }
}

#[must_use]
pub fn gemini_stop_to_canonical(s: &str) -> StopReason {
    match s {
        "MAX_TOKENS" => StopReason::MaxTokens,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
            StopReason::ContentFilter
        }
        _ => StopReason::EndOfTurn,
    }
}

#[must_use]
pub fn ollama_stop_to_canonical(s: &str) -> StopReason {
    match s {
        "length" => StopReason::MaxTokens,
        _ => StopReason::EndOfTurn,
    }
}
