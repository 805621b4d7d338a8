use super::SpeechTransport;
use crate::tts::SynthesisRequest;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = Arc<dyn Fn(usize, &SynthesisRequest) -> Result<Bytes> + Send + Sync>;

/// In-process transport driven by a script, for tests and offline demos.
///
/// Queued outcomes are consumed first; after that the responder decides.
/// The default responder echoes the request text back as the audio payload.
pub struct ScriptedTransport {
    queued: Mutex<VecDeque<Result<Bytes>>>,
    responder: Responder,
    calls: AtomicUsize,
    requests: Mutex<Vec<SynthesisRequest>>,
    latency: Duration,
}

impl ScriptedTransport {
    pub fn echo() -> Self {
        Self::new(|_, req| Ok(Bytes::from(req.text.clone().into_bytes())))
    }

    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(usize, &SynthesisRequest) -> Result<Bytes> + Send + Sync + 'static,
    {
        Self {
            queued: Mutex::new(VecDeque::new()),
            responder: Arc::new(responder),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    /// Fail every request whose text contains `needle` with the given status.
    pub fn failing_on(needle: impl Into<String>, status: u16) -> Self {
        let needle = needle.into();
        Self::new(move |_, req| {
            if req.text.contains(&needle) {
                Err(Error::from_status(status, "scripted failure", None, None))
            } else {
                Ok(Bytes::from(req.text.clone().into_bytes()))
            }
        })
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push(&self, outcome: Result<Bytes>) {
        if let Ok(mut q) = self.queued.lock() {
            q.push_back(outcome);
        }
    }

    pub fn push_status(&self, status: u16) {
        self.push(Err(Error::from_status(status, "scripted failure", None, None)));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SpeechTransport for ScriptedTransport {
    async fn send(&self, request: &SynthesisRequest) -> Result<Bytes> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut r) = self.requests.lock() {
            r.push(request.clone());
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let queued = self.queued.lock().ok().and_then(|mut q| q.pop_front());
        match queued {
            Some(outcome) => outcome,
            None => (self.responder)(call, request),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
