use std::time::Duration;

use futures_util::StreamExt;

use crate::config::TransportConfig;
use crate::dispatch::DispatchRequest;
use crate::error::DispatchError;

use super::{DispatchResponse, DispatchTransport};

fn build_reqwest_client(config: &TransportConfig) -> Result<reqwest::Client, DispatchError> {
    let pool_idle_timeout =
        (config.pool_idle_timeout_secs > 0).then(|| Duration::from_secs(config.pool_idle_timeout_secs));

    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(config.timeout_secs));

    let proxy_url = config
        .proxy
        .as_deref()
        .map(str::trim)
        .filter(|proxy| !proxy.is_empty());
    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| DispatchError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !config.use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| DispatchError::Config(format!("Failed to build HTTP client: {err}")))
}

/// Map a reqwest failure onto the dispatch error taxonomy.
pub(crate) fn map_reqwest_error(err: &reqwest::Error) -> DispatchError {
    if err.is_timeout() {
        return DispatchError::Timeout(err.to_string());
    }
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    DispatchError::Transport(message)
}

/// reqwest-backed transport with a shared connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with connection pooling and timeouts from the given config.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Config`] when the proxy URL is invalid or the
    /// TLS backend cannot be initialized.
    pub fn new(config: &TransportConfig) -> Result<Self, DispatchError> {
        Ok(Self {
            client: build_reqwest_client(config)?,
        })
    }
}

#[async_trait::async_trait]
impl DispatchTransport for HttpTransport {
    async fn execute(&self, request: &DispatchRequest) -> Result<DispatchResponse, DispatchError> {
        tracing::debug!(
            method = %request.method,
            url = %request.url,
            body_len = request.body.len(),
            "sending dispatch request"
        );
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .body(request.body.clone())
            .send()
            .await
            .map_err(|err| map_reqwest_error(&err))?;

        let status = response.status();
        tracing::debug!(status = status.as_u16(), "dispatch response headers received");
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| map_reqwest_error(&err)));
        Ok(DispatchResponse {
            status,
            body: Box::pin(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_with_defaults() {
        assert!(HttpTransport::new(&TransportConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_proxy_is_config_error() {
        let config = TransportConfig {
            proxy: Some("::not a proxy::".to_string()),
            ..TransportConfig::default()
        };
        assert!(matches!(
            HttpTransport::new(&config),
            Err(DispatchError::Config(_))
        ));
    }

    #[test]
    fn test_blank_proxy_is_ignored() {
        let config = TransportConfig {
            proxy: Some("   ".to_string()),
            ..TransportConfig::default()
        };
        assert!(HttpTransport::new(&config).is_ok());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let transport = HttpTransport::new(&TransportConfig::default()).unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let request = DispatchRequest {
            url: url::Url::parse(&format!("http://{addr}/v1/chat/completions")).unwrap(),
            method: http::Method::POST,
            headers: http::HeaderMap::new(),
            body: bytes::Bytes::from_static(b"{}"),
        };
        let err = transport.execute(&request).await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)), "{err:?}");
    }
}
