//! Shared fixtures: a mock speech endpoint and scripted services.

use mockito::{Matcher, Mock, Server, ServerGuard};
use speech_cache::transport::{HttpTransport, ScriptedTransport};
use speech_cache::{SpeechCache, SpeechCacheBuilder};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const SPEECH_PATH: &str = "/v1/audio/speech";
pub const API_KEY: &str = "sk-test";

/// Test fixture that manages a mock speech server
pub struct MockServerFixture {
    pub server: ServerGuard,
    pub base_url: String,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let base_url = server.url();
        Self { server, base_url }
    }

    pub fn transport(&self) -> HttpTransport {
        HttpTransport::builder()
            .api_key(API_KEY)
            .base_url(self.base_url.clone())
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    /// Successful synthesis returning `audio`, expected to be hit `hits` times.
    pub async fn mock_audio(&mut self, audio: &[u8], hits: usize) -> Mock {
        self.server
            .mock("POST", SPEECH_PATH)
            .match_header("authorization", format!("Bearer {}", API_KEY).as_str())
            .with_status(200)
            .with_header("content-type", "audio/mpeg")
            .with_body(audio)
            .expect(hits)
            .create_async()
            .await
    }

    pub async fn mock_audio_for(&mut self, input: &str, audio: &[u8]) -> Mock {
        self.server
            .mock("POST", SPEECH_PATH)
            .match_body(Matcher::PartialJson(serde_json::json!({ "input": input })))
            .with_status(200)
            .with_header("content-type", "audio/mpeg")
            .with_body(audio)
            .create_async()
            .await
    }

    pub async fn mock_error(&mut self, status: usize, headers: &[(&str, &str)], body: &str) -> Mock {
        let mut mock = self.server.mock("POST", SPEECH_PATH).with_status(status);
        for (name, value) in headers {
            mock = mock.with_header(*name, *value);
        }
        mock.with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }
}

/// Service over a scripted transport with no pacing.
pub async fn scripted_service(dir: &Path, transport: Arc<ScriptedTransport>) -> SpeechCache {
    scripted_builder(dir, transport).build().await.unwrap()
}

pub fn scripted_builder(dir: &Path, transport: Arc<ScriptedTransport>) -> SpeechCacheBuilder {
    SpeechCache::builder()
        .cache_dir(dir)
        .transport(transport)
        .min_interval(Duration::ZERO)
}
