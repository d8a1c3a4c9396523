use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::ProxyError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, ProxyError> {
    // No total timeout on the client: streamed bodies may legitimately run
    // longer than `server.timeout`. Deadlines are applied per request.
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none());

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| ProxyError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| ProxyError::Config(format!("Failed to build HTTP client: {err}")))
}

/// HTTP client for the upstream provider. Built once at startup and shared
/// through the application state.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Build the pooled client from the server settings and optional proxy.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Config`] when the proxy URL is rejected or the
    /// client cannot be built.
    pub fn new(config: &ServerConfig, proxy_url: Option<&str>) -> Result<Self, ProxyError> {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };
        let proxy_url = proxy_url.map(str::trim).filter(|proxy| !proxy.is_empty());
        let client = build_reqwest_client(
            config.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            config.http_use_env_proxy,
            proxy_url,
        )?;
        Ok(Self {
            client,
            timeout: Duration::from_secs(config.timeout),
        })
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn build_request(
        url: &url::Url,
        headers: &http::HeaderMap,
        body: bytes::Bytes,
    ) -> reqwest::Request {
        let mut request = reqwest::Request::new(http::Method::POST, url.clone());
        *request.headers_mut() = headers.clone();
        *request.body_mut() = Some(reqwest::Body::from(body));
        request
    }

    /// Send a non-streaming request. The whole exchange, body included, must
    /// finish within `server.timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Transport`] when the request cannot be sent or
    /// times out.
    pub async fn send_request(
        &self,
        url: &url::Url,
        headers: &http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, ProxyError> {
        let mut request = Self::build_request(url, headers, body);
        *request.timeout_mut() = Some(self.timeout);
        self.client
            .execute(request)
            .await
            .map_err(|err| transport_error(&err))
    }

    /// Send a streaming request. Only the wait for response headers is
    /// bounded by `server.timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Transport`] when the request cannot be sent or
    /// no response headers arrive in time.
    pub async fn send_stream(
        &self,
        url: &url::Url,
        headers: &http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, ProxyError> {
        let request = Self::build_request(url, headers, body);
        match tokio::time::timeout(self.timeout, self.client.execute(request)).await {
            Ok(result) => result.map_err(|err| transport_error(&err)),
            Err(_) => Err(ProxyError::Transport(format!(
                "upstream did not respond within {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

fn transport_error(err: &reqwest::Error) -> ProxyError {
    if err.is_timeout() {
        return ProxyError::Transport(format!("upstream request timed out: {err}"));
    }
    ProxyError::Transport(err.to_string())
}
