//! TTS (text-to-speech) request types and the synthesis client.

mod client;
mod types;

pub use client::{SynthesisClient, SynthesisClientBuilder};
pub use types::{
    clamp_speed, AudioFormat, AudioOutput, SynthesisRequest, TtsModel, Voice, VoiceOptions,
    DEFAULT_SPEED, MAX_SPEED, MIN_SPEED,
};
