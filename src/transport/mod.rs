//! Outbound synthesis transports.
//!
//! A transport does exactly one thing: send a [`SynthesisRequest`] and return
//! the audio bytes or a classified [`crate::Error`]. Retry, pacing and caching
//! live above this seam, so switching providers or HTTP stacks never touches
//! them.

mod http;
mod scripted;

pub use http::{resolve_api_key, HttpTransport, HttpTransportBuilder, DEFAULT_BASE_URL, DEFAULT_ENDPOINT_PATH};
pub use scripted::ScriptedTransport;

use crate::tts::SynthesisRequest;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

#[async_trait]
pub trait SpeechTransport: Send + Sync {
    async fn send(&self, request: &SynthesisRequest) -> Result<Bytes>;

    fn name(&self) -> &'static str {
        "custom"
    }
}
