//! Outbound request construction: provider access, request descriptors and
//! the per-dialect adapter selection.

pub mod endpoint;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, ParseError};
use crate::intake::PartTransmitter;
use crate::protocol::canonical::{ChatGenerateRequest, ModelSelector};
use crate::protocol::{anthropic, gemini, ollama, openai_chat};
use crate::stream::DemuxerFormat;

/// Wire dialect spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
}

impl Dialect {
    /// Name used as prefix of user-facing messages.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Dialect::OpenAi => "OpenAI",
            Dialect::Anthropic => "Anthropic",
            Dialect::Gemini => "Gemini",
            Dialect::Ollama => "Ollama",
        }
    }

    /// Public API root used when no base URL is configured.
    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Dialect::OpenAi => "https://api.openai.com/v1",
            Dialect::Anthropic => "https://api.anthropic.com/v1",
            Dialect::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Dialect::Ollama => "http://127.0.0.1:11434",
        }
    }

    #[must_use]
    pub fn requires_api_key(self) -> bool {
        !matches!(self, Dialect::Ollama)
    }

    /// Framing of this dialect's streamed responses.
    #[must_use]
    pub fn stream_format(self) -> DemuxerFormat {
        match self {
            Dialect::OpenAi | Dialect::Anthropic | Dialect::Gemini => DemuxerFormat::Sse,
            Dialect::Ollama => DemuxerFormat::JsonNl,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Everything needed to reach one provider account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAccess {
    pub dialect: Dialect,
    pub api_key: String,
    pub base_url: Option<String>,
    pub api_version: Option<String>,
    pub extra_headers: Vec<(String, String)>,
}

impl ProviderAccess {
    #[must_use]
    pub fn new(dialect: Dialect, api_key: impl Into<String>) -> Self {
        Self {
            dialect,
            api_key: api_key.into(),
            base_url: None,
            api_version: None,
            extra_headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Configured base URL without trailing slashes, or the dialect default.
    #[must_use]
    pub fn effective_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| self.dialect.default_base_url())
            .trim_end_matches('/')
    }

    /// Whether the endpoint is user-operated rather than the provider's public API.
    #[must_use]
    pub fn is_custom_endpoint(&self) -> bool {
        self.dialect == Dialect::Ollama
            || self.effective_base_url() != self.dialect.default_base_url()
    }
}

/// Immutable outbound request descriptor.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub url: url::Url,
    pub method: http::Method,
    pub headers: http::HeaderMap,
    pub body: bytes::Bytes,
}

impl DispatchRequest {
    /// Body as text, for debug echoing.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Parse function of one adapter.
///
/// Called once per wire message while streaming, or once with the whole body
/// otherwise. Implementations keep no state between calls; accumulation state
/// lives in the [`PartTransmitter`].
pub trait ChatGenerateParse: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ParseError`] when the payload is malformed or carries a
    /// provider-reported error.
    fn parse(
        &self,
        tx: &mut PartTransmitter,
        payload: &str,
        event_name: Option<&str>,
    ) -> Result<(), ParseError>;
}

/// A ready-to-send request and the means to interpret its response.
pub struct Dispatch {
    pub request: DispatchRequest,
    /// `None` when the adapter cannot stream.
    pub demuxer_format: Option<DemuxerFormat>,
    pub parser: Box<dyn ChatGenerateParse>,
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("request", &self.request)
            .field("demuxer_format", &self.demuxer_format)
            .finish_non_exhaustive()
    }
}

/// Builds the provider-specific [`Dispatch`] of one invocation.
pub trait DispatchBuilder: Send + Sync {
    /// Pure construction; performs no I/O.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] when the access, model or request cannot be
    /// turned into a valid outbound request.
    fn build(
        &self,
        access: &ProviderAccess,
        model: &ModelSelector,
        request: &ChatGenerateRequest,
        streaming: bool,
    ) -> Result<Dispatch, DispatchError>;
}

/// Default builder selecting the adapter by [`ProviderAccess::dialect`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DialectDispatchBuilder;

impl DispatchBuilder for DialectDispatchBuilder {
    fn build(
        &self,
        access: &ProviderAccess,
        model: &ModelSelector,
        request: &ChatGenerateRequest,
        streaming: bool,
    ) -> Result<Dispatch, DispatchError> {
        let dialect = access.dialect;
        if dialect.requires_api_key() && access.api_key.trim().is_empty() {
            return Err(DispatchError::Prepare(format!(
                "missing API key for {dialect}"
            )));
        }
        if model.id.trim().is_empty() {
            return Err(DispatchError::Prepare("model id is empty".to_string()));
        }
        if request.messages.is_empty() {
            return Err(DispatchError::Prepare(
                "request has no messages".to_string(),
            ));
        }

        let url = endpoint::request_url(access, &model.id, streaming)?;
        let headers = endpoint::provider_headers(access)?;

        let (body, parser): (Vec<u8>, Box<dyn ChatGenerateParse>) = match dialect {
            Dialect::OpenAi => {
                let wire = openai_chat::encoder::encode_openai_chat_request(
                    request, model, streaming,
                )?;
                (
                    serialize_body(&wire)?,
                    Box::new(openai_chat::parser::OpenAiChatParser::new(streaming)),
                )
            }
            Dialect::Anthropic => {
                let wire = anthropic::encoder::encode_anthropic_request(request, model, streaming)?;
                (
                    serialize_body(&wire)?,
                    Box::new(anthropic::parser::AnthropicParser::new(streaming)),
                )
            }
            Dialect::Gemini => {
                let wire = gemini::encoder::encode_gemini_request(request, model)?;
                (
                    serialize_body(&wire)?,
                    Box::new(gemini::parser::GeminiParser::new()),
                )
            }
            Dialect::Ollama => {
                let wire = ollama::encoder::encode_ollama_request(request, model, streaming)?;
                (
                    serialize_body(&wire)?,
                    Box::new(ollama::parser::OllamaParser::new()),
                )
            }
        };

        Ok(Dispatch {
            request: DispatchRequest {
                url,
                method: http::Method::POST,
                headers,
                body: bytes::Bytes::from(body),
            },
            demuxer_format: Some(dialect.stream_format()),
            parser,
        })
    }
}

fn serialize_body<T: Serialize>(wire: &T) -> Result<Vec<u8>, DispatchError> {
    serde_json::to_vec(wire)
        .map_err(|e| DispatchError::Prepare(format!("failed to serialize request body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_endpoint_detection() {
        let public = ProviderAccess::new(Dialect::OpenAi, "sk");
        assert!(!public.is_custom_endpoint());

        let trailing = ProviderAccess::new(Dialect::OpenAi, "sk")
            .with_base_url("https://api.openai.com/v1/");
        assert!(!trailing.is_custom_endpoint());

        let proxy =
            ProviderAccess::new(Dialect::OpenAi, "sk").with_base_url("http://localhost:8080/v1");
        assert!(proxy.is_custom_endpoint());

        assert!(ProviderAccess::new(Dialect::Ollama, "").is_custom_endpoint());
    }

    #[test]
    fn test_builder_rejects_missing_key() {
        let err = DialectDispatchBuilder
            .build(
                &ProviderAccess::new(Dialect::Anthropic, "  "),
                &ModelSelector::new("claude-sonnet-4-5"),
                &ChatGenerateRequest::from_user_text("hi"),
                true,
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Prepare(_)));
    }

    #[test]
    fn test_builder_rejects_empty_model() {
        let err = DialectDispatchBuilder
            .build(
                &ProviderAccess::new(Dialect::OpenAi, "sk"),
                &ModelSelector::new(""),
                &ChatGenerateRequest::from_user_text("hi"),
                false,
            )
            .unwrap_err();
        assert!(err.to_string().contains("model id is empty"));
    }

    #[test]
    fn test_builder_selects_stream_format_by_dialect() {
        let request = ChatGenerateRequest::from_user_text("hi");
        let openai = DialectDispatchBuilder
            .build(
                &ProviderAccess::new(Dialect::OpenAi, "sk"),
                &ModelSelector::new("gpt-4o"),
                &request,
                true,
            )
            .unwrap();
        assert_eq!(openai.demuxer_format, Some(DemuxerFormat::Sse));
        assert_eq!(openai.request.method, http::Method::POST);
        let body: serde_json::Value = serde_json::from_slice(&openai.request.body).unwrap();
        assert_eq!(body["stream"], true);

        let ollama = DialectDispatchBuilder
            .build(
                &ProviderAccess::new(Dialect::Ollama, ""),
                &ModelSelector::new("llama3"),
                &request,
                true,
            )
            .unwrap();
        assert_eq!(ollama.demuxer_format, Some(DemuxerFormat::JsonNl));
        assert_eq!(
            ollama.request.url.as_str(),
            "http://127.0.0.1:11434/api/chat"
        );
    }

    #[test]
    fn test_dialect_serde() {
        let dialect: Dialect = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(dialect, Dialect::OpenAi);
        assert_eq!(serde_json::to_string(&Dialect::Gemini).unwrap(), "\"gemini\"");
    }
}
