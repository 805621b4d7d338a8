//! TTS (Text-to-Speech) client.

use super::types::{AudioOutput, SynthesisRequest};
use crate::transport::{HttpTransport, SpeechTransport};
use crate::{Error, ErrorContext, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Client for text-to-speech synthesis over a pluggable transport.
#[derive(Clone)]
pub struct SynthesisClient {
    transport: Arc<dyn SpeechTransport>,
}

impl SynthesisClient {
    pub fn new(transport: Arc<dyn SpeechTransport>) -> Self {
        Self { transport }
    }

    pub fn builder() -> SynthesisClientBuilder {
        SynthesisClientBuilder::new()
    }

    /// Synthesize one request. Errors are already classified by the transport.
    pub async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioOutput> {
        if request.text.trim().is_empty() {
            return Err(Error::validation_with_context(
                "cannot synthesize empty text",
                ErrorContext::new().with_source("synthesis_client"),
            ));
        }
        debug!(
            transport = self.transport.name(),
            voice = request.voice.as_str(),
            model = request.model.as_str(),
            chars = request.text.len(),
            "synthesizing"
        );
        let data = self.transport.send(request).await?;
        Ok(AudioOutput {
            data,
            format: request.format,
        })
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }
}

pub struct SynthesisClientBuilder {
    transport: Option<Arc<dyn SpeechTransport>>,
    api_key: Option<String>,
    base_url: Option<String>,
    endpoint_path: Option<String>,
    timeout: Duration,
}

impl SynthesisClientBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            api_key: None,
            base_url: None,
            endpoint_path: None,
            timeout: Duration::from_secs(60),
        }
    }
    /// Use a custom transport; the HTTP settings below are then ignored.
    pub fn transport(mut self, transport: Arc<dyn SpeechTransport>) -> Self {
        self.transport = Some(transport);
        self
    }
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
    pub fn endpoint_path(mut self, path: impl Into<String>) -> Self {
        self.endpoint_path = Some(path.into());
        self
    }
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<SynthesisClient> {
        if let Some(transport) = self.transport {
            return Ok(SynthesisClient::new(transport));
        }
        let mut http = HttpTransport::builder().timeout(self.timeout);
        if let Some(key) = self.api_key {
            http = http.api_key(key);
        }
        if let Some(url) = self.base_url {
            http = http.base_url(url);
        }
        if let Some(path) = self.endpoint_path {
            http = http.endpoint_path(path);
        }
        Ok(SynthesisClient::new(Arc::new(http.build()?)))
    }
}

impl Default for SynthesisClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
