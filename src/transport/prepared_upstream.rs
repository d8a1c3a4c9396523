use crate::config::UpstreamConfig;
use crate::error::ProxyError;

/// Upstream request metadata computed once at startup.
#[derive(Debug, Clone)]
pub struct PreparedUpstream {
    chat_url: url::Url,
    static_headers: http::HeaderMap,
    has_api_key: bool,
}

impl PreparedUpstream {
    /// # Errors
    ///
    /// Returns [`ProxyError::Config`] when the chat completions URL cannot be
    /// built from `base_url`.
    pub fn new(upstream: &UpstreamConfig) -> Result<Self, ProxyError> {
        let base = upstream.base_url.trim().trim_end_matches('/');
        let chat_url = url::Url::parse(&format!("{base}/chat/completions")).map_err(|err| {
            ProxyError::Config(format!("invalid upstream base_url '{base}': {err}"))
        })?;
        let api_key = upstream
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty());
        Ok(Self {
            chat_url,
            static_headers: Self::build_provider_headers(api_key),
            has_api_key: api_key.is_some(),
        })
    }

    #[must_use]
    pub fn chat_url(&self) -> &url::Url {
        &self.chat_url
    }

    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.has_api_key
    }

    /// Headers for one upstream request. Without a configured key the
    /// client's `Authorization` header is forwarded as-is.
    #[must_use]
    pub fn request_headers(&self, client_headers: &http::HeaderMap) -> http::HeaderMap {
        let mut headers = self.static_headers.clone();
        if !self.has_api_key {
            if let Some(auth) = client_headers.get(http::header::AUTHORIZATION) {
                headers.insert(http::header::AUTHORIZATION, auth.clone());
            }
        }
        headers
    }

    fn build_provider_headers(api_key: Option<&str>) -> http::HeaderMap {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        if let Some(key) = api_key {
            if let Ok(mut val) = http::HeaderValue::from_str(&format!("Bearer {key}")) {
                val.set_sensitive(true);
                headers.insert(http::header::AUTHORIZATION, val);
            }
        }
        headers
    }
}
