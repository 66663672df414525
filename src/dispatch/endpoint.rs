use http::{HeaderMap, HeaderName, HeaderValue};

use crate::error::DispatchError;

use super::{Dialect, ProviderAccess};

const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// Build the target URL of a generation request.
///
/// # Errors
///
/// Returns [`DispatchError::Prepare`] when the resulting URL does not parse.
pub fn request_url(
    access: &ProviderAccess,
    model: &str,
    stream: bool,
) -> Result<url::Url, DispatchError> {
    let base = access.effective_base_url();
    let raw = match access.dialect {
        Dialect::OpenAi => format!("{base}/chat/completions"),
        Dialect::Anthropic => format!("{base}/messages"),
        Dialect::Gemini => {
            let model = model.trim().trim_start_matches("models/");
            if stream {
                format!("{base}/models/{model}:streamGenerateContent?alt=sse")
            } else {
                format!("{base}/models/{model}:generateContent")
            }
        }
        Dialect::Ollama => format!("{base}/api/chat"),
    };
    url::Url::parse(&raw)
        .map_err(|e| DispatchError::Prepare(format!("invalid endpoint URL '{raw}': {e}")))
}

/// Build content-type, authentication and extra headers for a provider.
///
/// # Errors
///
/// Returns [`DispatchError::Prepare`] when a header name or value is invalid.
pub fn provider_headers(access: &ProviderAccess) -> Result<HeaderMap, DispatchError> {
    let key = access.api_key.trim();

    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    match access.dialect {
        Dialect::OpenAi => {
            headers.insert(
                http::header::AUTHORIZATION,
                header_value(&format!("Bearer {key}"), "authorization")?,
            );
        }
        Dialect::Anthropic => {
            headers.insert("x-api-key", header_value(key, "x-api-key")?);
            let version = access
                .api_version
                .as_deref()
                .unwrap_or(DEFAULT_ANTHROPIC_VERSION);
            headers.insert(
                "anthropic-version",
                header_value(version, "anthropic-version")?,
            );
        }
        Dialect::Gemini => {
            headers.insert("x-goog-api-key", header_value(key, "x-goog-api-key")?);
        }
        Dialect::Ollama => {
            if !key.is_empty() {
                headers.insert(
                    http::header::AUTHORIZATION,
                    header_value(&format!("Bearer {key}"), "authorization")?,
                );
            }
        }
    }

    for (name, value) in &access.extra_headers {
        let header_name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| DispatchError::Prepare(format!("invalid header name '{name}': {e}")))?;
        headers.insert(header_name, header_value(value, name)?);
    }

    Ok(headers)
}

fn header_value(value: &str, name: &str) -> Result<HeaderValue, DispatchError> {
    HeaderValue::from_str(value)
        .map_err(|_| DispatchError::Prepare(format!("invalid value for header '{name}'")))
}
