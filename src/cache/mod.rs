//! Content-addressed audio caching.
//!
//! Synthesized narration is looked up by a digest of everything that shapes
//! the audio, so identical requests hit the cache across sessions and, via the
//! remote tier, across devices.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheKeyGenerator`] | SHA-256 key over normalized (text, voice, model, speed, format) |
//! | [`LocalAudioStore`] | On-disk files plus a persisted JSON index, self-healing |
//! | [`RemoteCacheTier`] | Optional shared tier: object storage + metadata records |
//! | [`CacheMetrics`] | Hit/miss counters |
//!
//! ```rust
//! use speech_cache::cache::CacheKeyGenerator;
//! use speech_cache::tts::{TtsModel, Voice};
//!
//! let keys = CacheKeyGenerator::new();
//! let a = keys.compute_key("Take a deep breath", Voice::Nova, TtsModel::Tts1, 1.0);
//! let b = keys.compute_key("Take a deep breath", Voice::Nova, TtsModel::Tts1, 1.0);
//! assert_eq!(a, b);
//! ```

mod key;
mod local;
mod location;
mod metrics;
pub mod remote;

pub use key::{normalize_text, CacheKey, CacheKeyGenerator};
pub use location::AudioLocation;
pub use local::{CacheEntry, CacheStats, LocalAudioStore, RepairReport};
pub(crate) use local::now_ms;
pub(crate) use metrics::AtomicMetrics;
pub use metrics::CacheMetrics;
pub use remote::{
    HttpObjectStore, MemoryMetadataStore, MemoryObjectStore, MetadataStore, ObjectMetadataStore,
    ObjectStore, ObjectStoreCache, RemoteCacheTier, RemoteMetadata,
};
