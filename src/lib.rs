//! # speech-cache
//!
//! Text-to-speech caching and synthesis pipeline for narration-driven apps.
//!
//! Narration is expensive to synthesize and rarely changes, so every request
//! is addressed by a digest of what shapes the audio (text, voice, model,
//! speed, format) and served from the cheapest tier that has it:
//!
//! 1. the local on-disk store ([`cache::LocalAudioStore`]),
//! 2. an optional shared remote tier ([`cache::RemoteCacheTier`]),
//! 3. the provider, through a single paced FIFO queue with retry and backoff
//!    ([`resilience::retry::RetryScheduler`]).
//!
//! Concurrent requests for the same key share one resolution
//! ([`coalesce::RequestCoalescer`]); sequences of steps can be warmed ahead of
//! playback with progress and cancellation ([`preload`]).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use speech_cache::{SpeechCache, VoiceOptions};
//! use speech_cache::tts::Voice;
//!
//! #[tokio::main]
//! async fn main() -> speech_cache::Result<()> {
//!     let cache = SpeechCache::builder()
//!         .cache_dir("/tmp/narration")
//!         .api_key("sk-...")
//!         .build()
//!         .await?;
//!
//!     let audio = cache
//!         .synthesize_and_get("Take a deep breath", &VoiceOptions::new().with_voice(Voice::Nova))
//!         .await?;
//!     println!("play {}", audio);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Cache keys, local store, remote tier, metrics |
//! | [`tts`] | Voice options, synthesis requests, the synthesis client |
//! | [`transport`] | Provider transports and error classification |
//! | [`resilience`] | Request queue, pacing, retry, failure ceiling |
//! | [`coalesce`] | At most one in-flight resolution per key |
//! | [`preload`] | Ordered narration preload with progress |
//! | [`service`] | [`SpeechCache`], the service object tying it together |
//! | [`config`] | YAML/env configuration |

pub mod cache;
pub mod coalesce;
pub mod config;
pub mod error_code;
pub mod preload;
pub mod resilience;
pub mod service;
pub mod transport;
pub mod tts;

pub use cache::{AudioLocation, CacheKey, CacheMetrics, CacheStats};
pub use config::SpeechCacheConfig;
pub use error_code::StandardErrorCode;
pub use preload::{
    CancelHandle, FailurePolicy, NarrationStep, PreloadJob, PreloadProgress, PreloadReport,
    PreloadState,
};
pub use service::{SpeechCache, SpeechCacheBuilder};
pub use tts::VoiceOptions;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
