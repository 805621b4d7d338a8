//! TTS (Text-to-Speech) types.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_SPEED: f32 = 0.25;
pub const MAX_SPEED: f32 = 4.0;
pub const DEFAULT_SPEED: f32 = 1.0;

/// Audio output from TTS.
#[derive(Debug, Clone)]
pub struct AudioOutput {
    pub data: bytes::Bytes,
    pub format: AudioFormat,
}

/// Supported audio formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Opus,
    Aac,
    Flac,
    Wav,
    Pcm,
}

impl AudioFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Opus => "audio/opus",
            Self::Aac => "audio/aac",
            Self::Flac => "audio/flac",
            Self::Wav => "audio/wav",
            Self::Pcm => "audio/pcm",
        }
    }

    /// File extension used for cached files.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Opus => "opus",
            Self::Aac => "aac",
            Self::Flac => "flac",
            Self::Wav => "wav",
            Self::Pcm => "pcm",
        }
    }

    /// Unknown formats fall back to mp3.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "opus" => Self::Opus,
            "aac" => Self::Aac,
            "flac" => Self::Flac,
            "wav" => Self::Wav,
            "pcm" => Self::Pcm,
            _ => Self::Mp3,
        }
    }
}

/// Voices offered by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    #[default]
    Alloy,
    Echo,
    Fable,
    Onyx,
    Nova,
    Shimmer,
}

impl Voice {
    pub const ALL: [Voice; 6] = [
        Voice::Alloy,
        Voice::Echo,
        Voice::Fable,
        Voice::Onyx,
        Voice::Nova,
        Voice::Shimmer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Echo => "echo",
            Self::Fable => "fable",
            Self::Onyx => "onyx",
            Self::Nova => "nova",
            Self::Shimmer => "shimmer",
        }
    }

    /// Unrecognized names silently fall back to the baseline voice.
    pub fn parse(s: &str) -> Self {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == wanted)
            .unwrap_or_default()
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synthesis models offered by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TtsModel {
    #[default]
    #[serde(rename = "tts-1")]
    Tts1,
    #[serde(rename = "tts-1-hd")]
    Tts1Hd,
}

impl TtsModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tts1 => "tts-1",
            Self::Tts1Hd => "tts-1-hd",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "tts-1-hd" => Self::Tts1Hd,
            _ => Self::Tts1,
        }
    }
}

impl fmt::Display for TtsModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp a requested speed into the provider's accepted range.
pub fn clamp_speed(speed: f32) -> f32 {
    if !speed.is_finite() {
        return DEFAULT_SPEED;
    }
    speed.clamp(MIN_SPEED, MAX_SPEED)
}

/// Caller-facing synthesis options.
///
/// Values are accepted as given and normalized when a request is built, so an
/// out-of-range speed never turns into an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceOptions {
    pub voice: Voice,
    pub model: TtsModel,
    pub speed: f32,
    pub format: AudioFormat,
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self {
            voice: Voice::default(),
            model: TtsModel::default(),
            speed: DEFAULT_SPEED,
            format: AudioFormat::default(),
        }
    }
}

impl VoiceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from loosely-typed strings, defaulting anything unknown.
    pub fn from_names(voice: &str, model: &str, speed: f32) -> Self {
        Self {
            voice: Voice::parse(voice),
            model: TtsModel::parse(model),
            speed: clamp_speed(speed),
            format: AudioFormat::default(),
        }
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.voice = voice;
        self
    }

    pub fn with_model(mut self, model: TtsModel) -> Self {
        self.model = model;
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }

    pub fn request(&self, text: impl Into<String>) -> SynthesisRequest {
        SynthesisRequest {
            text: text.into(),
            voice: self.voice,
            model: self.model,
            speed: clamp_speed(self.speed),
            format: self.format,
        }
    }
}

/// Everything that determines the synthesized bytes, and therefore the cache key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: Voice,
    pub model: TtsModel,
    pub speed: f32,
    pub format: AudioFormat,
}
