//! Cache key generation.

use crate::tts::{AudioFormat, SynthesisRequest, TtsModel, Voice, VoiceOptions};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
    pub voice: Option<String>,
    pub model: Option<String>,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            voice: None,
            model: None,
        }
    }
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Collapse whitespace so that visually identical narration hashes identically.
pub fn normalize_text(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Derives content-addressed keys from synthesis parameters.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyGenerator {
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self { salt: None }
    }

    /// Namespace keys, e.g. per provider account. An empty salt is ignored.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        let salt = salt.into();
        self.salt = if salt.is_empty() { None } else { Some(salt) };
        self
    }

    pub fn generate(&self, request: &SynthesisRequest) -> CacheKey {
        let mut parts: BTreeMap<&str, String> = BTreeMap::new();
        parts.insert("text", normalize_text(&request.text));
        parts.insert("voice", request.voice.as_str().to_string());
        parts.insert("model", request.model.as_str().to_string());
        parts.insert("speed", format!("{:.2}", crate::tts::clamp_speed(request.speed)));
        parts.insert("format", request.format.extension().to_string());
        if let Some(ref s) = self.salt {
            parts.insert("salt", s.clone());
        }
        // BTreeMap of strings always serializes.
        let canonical = serde_json::to_string(&parts).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        CacheKey::new(hash)
            .with_voice(request.voice.as_str())
            .with_model(request.model.as_str())
    }

    /// Key for (text, voice, model, speed) with the default audio format.
    pub fn compute_key(&self, text: &str, voice: Voice, model: TtsModel, speed: f32) -> CacheKey {
        let request = VoiceOptions::new()
            .with_voice(voice)
            .with_model(model)
            .with_speed(speed)
            .with_format(AudioFormat::default())
            .request(text);
        self.generate(&request)
    }
}
