mod request_id;

use crate::config::AppConfig;
use crate::error::ProxyError;
use crate::tags::{ExtractorLimits, ToolStreaming};
use crate::transport::{HttpTransport, PreparedUpstream};
use crate::util::format_request_seq_hex;

use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
///
/// Read-only after startup; per-response parsing state lives in the request
/// futures, never here.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    pub upstream: PreparedUpstream,
    request_ids: RequestIdGenerator,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, transport: HttpTransport, upstream: PreparedUpstream) -> Self {
        Self {
            config,
            transport,
            upstream,
            request_ids: RequestIdGenerator::new(),
        }
    }

    /// Build the transport and prepared upstream from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Config`] when the HTTP client or upstream URL
    /// cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Self, ProxyError> {
        let transport = HttpTransport::new(&config.server, config.upstream.proxy.as_deref())?;
        let upstream = PreparedUpstream::new(&config.upstream)?;
        Ok(Self::new(config, transport, upstream))
    }

    pub fn next_request_seq(&self) -> u64 {
        self.request_ids.next_seq()
    }

    /// Opaque request id used in logs.
    #[must_use]
    pub fn request_uuid(&self, request_seq: u64) -> uuid::Uuid {
        self.request_ids.request_uuid(request_seq)
    }

    /// Completion id used when the upstream stream carries none.
    #[must_use]
    pub fn fallback_completion_id(&self, request_seq: u64) -> String {
        format_request_seq_hex("chatcmpl-", request_seq)
    }

    #[must_use]
    pub fn extractor_limits(&self) -> ExtractorLimits {
        self.config.features.extractor_limits()
    }

    #[must_use]
    pub fn tool_streaming(&self) -> ToolStreaming {
        self.config.features.tool_streaming()
    }
}
