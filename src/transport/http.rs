use super::SpeechTransport;
use crate::error_code::StandardErrorCode;
use crate::tts::SynthesisRequest;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use bytes::Bytes;
use keyring::Entry;
use reqwest::header::HeaderMap;
use reqwest::Proxy;
use std::env;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_ENDPOINT_PATH: &str = "/v1/audio/speech";
const KEYRING_SERVICE: &str = "speech-cache";

/// Transport for OpenAI-compatible `/v1/audio/speech` endpoints.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpTransport {
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::new()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn classify(status: u16, headers: &HeaderMap, body: &[u8]) -> Error {
        let body_str = String::from_utf8_lossy(body).into_owned();
        let retry_after_ms = retry_after_ms(headers);
        let remaining = header_u64(headers, "x-ratelimit-remaining-requests");
        let err = Error::from_status(status, body_str.clone(), retry_after_ms, remaining);

        // A 429 can also mean the account is out of credit; retrying will not help.
        match provider_code(&body_str).and_then(|c| StandardErrorCode::from_provider_code(&c)) {
            Some(StandardErrorCode::QuotaExhausted) => Error::Remote {
                status,
                code: StandardErrorCode::QuotaExhausted,
                message: body_str,
                retryable: false,
            },
            _ => err,
        }
    }
}

#[async_trait]
impl SpeechTransport for HttpTransport {
    async fn send(&self, request: &SynthesisRequest) -> Result<Bytes> {
        let body = serde_json::json!({
            "model": request.model.as_str(),
            "input": request.text,
            "voice": request.voice.as_str(),
            "speed": request.speed,
            "response_format": request.format.extension(),
        });
        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let details = if e.is_timeout() { "timeout" } else { "connect" };
                Error::network_with_context(
                    format!("TTS request failed: {}", e),
                    ErrorContext::new()
                        .with_details(details)
                        .with_source("http_transport"),
                )
            })?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(|e| {
            Error::network_with_context(
                format!("Failed to read TTS response: {}", e),
                ErrorContext::new().with_source("http_transport"),
            )
        })?;
        debug!(
            http_status = status.as_u16(),
            bytes = bytes.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "speech request finished"
        );
        if !status.is_success() {
            return Err(Self::classify(status.as_u16(), &headers, &bytes));
        }
        Ok(bytes)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// `retry-after-ms`, then `retry-after` (seconds), then the provider's
/// `x-ratelimit-reset-requests` duration (e.g. `1s`, `250ms`, `1m30s`).
fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    if let Some(ms) = header_u64(headers, "retry-after-ms") {
        return Some(ms);
    }
    if let Some(secs) = header_u64(headers, "retry-after") {
        return Some(secs.saturating_mul(1000));
    }
    headers
        .get("x-ratelimit-reset-requests")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_reset_duration)
        .map(|d| d.as_millis() as u64)
}

pub(crate) fn parse_reset_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(secs) = raw.parse::<f64>() {
        return (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs));
    }
    let mut total = Duration::ZERO;
    let mut number = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let value: f64 = number.parse().ok()?;
        number.clear();
        let unit = if c == 'm' && chars.peek() == Some(&'s') {
            chars.next();
            0.001
        } else {
            match c {
                'h' => 3600.0,
                'm' => 60.0,
                's' => 1.0,
                _ => return None,
            }
        };
        total += Duration::from_secs_f64(value * unit);
    }
    if !number.is_empty() {
        return None;
    }
    Some(total)
}

fn provider_code(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = json.get("error")?;
    error
        .get("code")
        .and_then(|v| v.as_str())
        .or_else(|| error.get("type").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}

/// Look up an API key: OS keyring first, then `<PROVIDER>_API_KEY`.
pub fn resolve_api_key(provider_id: &str) -> Option<String> {
    if let Ok(entry) = Entry::new(KEYRING_SERVICE, provider_id) {
        if let Ok(key) = entry.get_password() {
            return Some(key);
        }
    }
    let env_var = format!("{}_API_KEY", provider_id.to_uppercase().replace('-', "_"));
    env::var(env_var).ok().filter(|k| !k.is_empty())
}

pub struct HttpTransportBuilder {
    provider_id: String,
    api_key: Option<String>,
    base_url: Option<String>,
    endpoint_path: Option<String>,
    timeout: Duration,
    proxy_url: Option<String>,
}

impl HttpTransportBuilder {
    pub fn new() -> Self {
        Self {
            provider_id: "openai".to_string(),
            api_key: None,
            base_url: None,
            endpoint_path: None,
            timeout: Duration::from_secs(60),
            proxy_url: env::var("SPEECH_PROXY_URL").ok(),
        }
    }
    pub fn provider_id(mut self, id: impl Into<String>) -> Self {
        self.provider_id = id.into();
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
    pub fn proxy_url(mut self, url: impl Into<String>) -> Self {
        self.proxy_url = Some(url.into());
        self
    }

    pub fn build(self) -> Result<HttpTransport> {
        let api_key = self
            .api_key
            .or_else(|| resolve_api_key(&self.provider_id))
            .ok_or_else(|| {
                Error::configuration(format!(
                    "API key required for provider '{}' (keyring or {}_API_KEY)",
                    self.provider_id,
                    self.provider_id.to_uppercase()
                ))
            })?;
        let base_url = self.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        url::Url::parse(&base_url)
            .map_err(|e| Error::configuration(format!("invalid base URL '{}': {}", base_url, e)))?;
        let endpoint_path = self
            .endpoint_path
            .unwrap_or_else(|| DEFAULT_ENDPOINT_PATH.to_string());
        let endpoint_path = if endpoint_path.starts_with('/') {
            endpoint_path
        } else {
            format!("/{}", endpoint_path)
        };

        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if let Some(proxy_url) = &self.proxy_url {
            let proxy = Proxy::all(proxy_url)
                .map_err(|e| Error::configuration(format!("invalid proxy URL: {}", e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| Error::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpTransport {
            client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), endpoint_path),
            api_key,
        })
    }
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}
