//! The speech cache service: one injected object owning the whole pipeline.
//!
//! `synthesize_and_get` resolves a request in this order, inside a per-key
//! coalescing slot: local store, remote tier, then synthesis through the
//! retry scheduler, writing the result back to both tiers.

use crate::cache::{
    AtomicMetrics, AudioLocation, CacheKey, CacheKeyGenerator, CacheMetrics, CacheStats,
    HttpObjectStore, LocalAudioStore, ObjectMetadataStore, ObjectStoreCache, RemoteCacheTier,
    RemoteMetadata,
};
use crate::coalesce::RequestCoalescer;
use crate::config::SpeechCacheConfig;
use crate::preload::{PreloadJob, PreloadOrchestrator, PreloadProgress, PreloadReport, StepResolver};
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::queue::QueueSnapshot;
use crate::resilience::rate_limiter::RateLimiterConfig;
use crate::resilience::retry::{RetryConfig, RetryScheduler};
use crate::transport::{HttpTransport, SpeechTransport};
use crate::tts::{SynthesisClient, SynthesisRequest, VoiceOptions};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct Pipeline {
    local: LocalAudioStore,
    remote: Option<Arc<dyn RemoteCacheTier>>,
    scheduler: RetryScheduler,
    metrics: AtomicMetrics,
}

impl Pipeline {
    async fn resolve(&self, key: CacheKey, request: SynthesisRequest) -> Result<AudioLocation> {
        if let Some(path) = self.local.get(&key).await? {
            AtomicMetrics::incr(&self.metrics.local_hits);
            debug!(cache_key = %key, "local hit");
            return Ok(AudioLocation::Local(path));
        }

        if let Some(remote) = &self.remote {
            match remote.get(&key).await {
                Ok(Some(url)) => {
                    AtomicMetrics::incr(&self.metrics.remote_hits);
                    debug!(cache_key = %key, tier = remote.name(), "remote hit");
                    return Ok(AudioLocation::Remote(url));
                }
                Ok(None) => {}
                Err(e) => warn!(cache_key = %key, error = %e, "remote lookup failed, treating as miss"),
            }
        }

        AtomicMetrics::incr(&self.metrics.misses);
        let audio = match self.scheduler.synthesize(&request).await {
            Ok(audio) => audio,
            Err(e) => {
                AtomicMetrics::incr(&self.metrics.errors);
                return Err(e);
            }
        };
        AtomicMetrics::incr(&self.metrics.synthesized);

        let path = self.local.put(&key, &audio.data, audio.format).await?;
        info!(cache_key = %key, bytes = audio.data.len(), "synthesized and cached");

        if let Some(remote) = &self.remote {
            let metadata = RemoteMetadata {
                key: key.hash.clone(),
                object_path: String::new(),
                voice: request.voice.as_str().to_string(),
                model: request.model.as_str().to_string(),
                speed: request.speed,
                format: audio.format,
                size_bytes: audio.data.len() as u64,
                created_at_ms: crate::cache::now_ms(),
            };
            if let Err(e) = remote.put(&key, audio.data.clone(), metadata).await {
                warn!(cache_key = %key, error = %e, "remote upload failed");
            }
        }
        Ok(AudioLocation::Local(path))
    }
}

pub struct SpeechCache {
    pipeline: Arc<Pipeline>,
    coalescer: RequestCoalescer<AudioLocation>,
    keys: CacheKeyGenerator,
    default_options: VoiceOptions,
    max_age: Duration,
}

impl SpeechCache {
    pub fn builder() -> SpeechCacheBuilder {
        SpeechCacheBuilder::new()
    }

    pub fn key_for(&self, text: &str, options: &VoiceOptions) -> CacheKey {
        self.keys.generate(&options.request(text))
    }

    /// Audio for `text`, from cache when possible.
    ///
    /// Concurrent calls for the same key share one resolution and at most one
    /// provider call.
    pub async fn synthesize_and_get(&self, text: &str, options: &VoiceOptions) -> Result<AudioLocation> {
        if text.trim().is_empty() {
            return Err(Error::validation_with_context(
                "cannot synthesize empty text",
                ErrorContext::new().with_source("speech_cache"),
            ));
        }
        let request = options.request(text);
        let key = self.keys.generate(&request);
        let pipeline = Arc::clone(&self.pipeline);
        let slot = key.hash.clone();
        self.coalescer
            .run_or_join(&slot, move || async move { pipeline.resolve(key, request).await })
            .await
    }

    /// Same as [`synthesize_and_get`](Self::synthesize_and_get) with the configured default voice.
    pub async fn speak(&self, text: &str) -> Result<AudioLocation> {
        let options = self.default_options.clone();
        self.synthesize_and_get(text, &options).await
    }

    pub async fn preload<F>(&self, job: &PreloadJob, on_progress: F) -> Result<PreloadReport>
    where
        F: FnMut(&PreloadProgress) + Send,
    {
        PreloadOrchestrator::new(self).run(job, on_progress).await
    }

    /// Remove every locally cached file. The remote tier is left alone.
    pub async fn clear_cache(&self) -> Result<usize> {
        let removed = self.pipeline.local.clear().await?;
        info!(removed, "local cache cleared");
        Ok(removed)
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.pipeline.local.stats().await
    }

    pub async fn evict_expired(&self) -> Result<usize> {
        self.pipeline.local.evict_older_than(self.max_age).await
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.pipeline.metrics.snapshot(self.coalescer.joined() as u64)
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.pipeline.scheduler.queue_snapshot()
    }

    /// Resume synthesis after the provider rejected the API key.
    pub fn reset_credentials(&self) {
        self.pipeline.scheduler.reset_credentials();
        info!("credentials reset; synthesis resumed");
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.pipeline.local.dir().to_path_buf()
    }

    pub fn default_options(&self) -> &VoiceOptions {
        &self.default_options
    }
}

#[async_trait]
impl StepResolver for SpeechCache {
    async fn resolve(&self, text: &str, options: &VoiceOptions) -> Result<AudioLocation> {
        self.synthesize_and_get(text, options).await
    }
}

pub struct SpeechCacheBuilder {
    config: SpeechCacheConfig,
    transport: Option<Arc<dyn SpeechTransport>>,
    api_key: Option<String>,
    remote: Option<Arc<dyn RemoteCacheTier>>,
}

impl SpeechCacheBuilder {
    pub fn new() -> Self {
        Self::from_config(SpeechCacheConfig::default())
    }

    pub fn from_config(config: SpeechCacheConfig) -> Self {
        Self {
            config,
            transport: None,
            api_key: None,
            remote: None,
        }
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.config.max_age_secs = max_age.as_secs();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Replace the HTTP provider transport (tests, offline use, other providers).
    pub fn transport(mut self, transport: Arc<dyn SpeechTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn remote_tier(mut self, tier: Arc<dyn RemoteCacheTier>) -> Self {
        self.remote = Some(tier);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.config.min_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn key_salt(mut self, salt: impl Into<String>) -> Self {
        self.config.key_salt = Some(salt.into());
        self
    }

    pub fn default_options(mut self, options: VoiceOptions) -> Self {
        self.config.voice = options;
        self
    }

    /// Open the local store (repairing drift), evict expired entries and
    /// start the request queue. Must run inside a Tokio runtime.
    pub async fn build(self) -> Result<SpeechCache> {
        let config = self.config;
        config.validate()?;

        let local = LocalAudioStore::open(&config.cache_dir).await?;
        let evicted = local.evict_older_than(config.max_age()).await?;
        if evicted > 0 {
            info!(evicted, max_age_secs = config.max_age_secs, "evicted expired audio");
        }

        let transport: Arc<dyn SpeechTransport> = match self.transport {
            Some(t) => t,
            None => {
                let provider = &config.provider;
                let mut http = HttpTransport::builder()
                    .provider_id(provider.provider_id.clone())
                    .timeout(Duration::from_secs(provider.timeout_secs));
                if let Some(key) = self.api_key {
                    http = http.api_key(key);
                }
                if let Some(url) = &provider.base_url {
                    http = http.base_url(url.clone());
                }
                if let Some(path) = &provider.endpoint_path {
                    http = http.endpoint_path(path.clone());
                }
                Arc::new(http.build()?)
            }
        };

        let remote = match self.remote {
            Some(tier) => Some(tier),
            None => match &config.remote {
                Some(rc) => {
                    let mut store = HttpObjectStore::new(
                        &rc.base_url,
                        rc.token.clone(),
                        Duration::from_secs(config.provider.timeout_secs),
                    )?;
                    if let Some(public) = &rc.public_base_url {
                        store = store.with_public_base_url(public)?;
                    }
                    let store = Arc::new(store);
                    let tier = ObjectStoreCache::new(Arc::clone(&store), ObjectMetadataStore::new(store))
                        .with_prefix(rc.prefix.clone());
                    Some(Arc::new(tier) as Arc<dyn RemoteCacheTier>)
                }
                None => None,
            },
        };

        let scheduler = RetryScheduler::new(
            SynthesisClient::new(transport),
            config.retry.clone(),
            RateLimiterConfig::new().with_min_interval(config.min_interval()),
            CircuitBreakerConfig::new().with_failure_threshold(config.failure_threshold),
        );

        let keys = match &config.key_salt {
            Some(salt) => CacheKeyGenerator::new().with_salt(salt.clone()),
            None => CacheKeyGenerator::new(),
        };

        info!(
            cache_dir = %config.cache_dir.display(),
            remote = remote.as_ref().map(|r| r.name()).unwrap_or("none"),
            "speech cache ready"
        );
        Ok(SpeechCache {
            pipeline: Arc::new(Pipeline {
                local,
                remote,
                scheduler,
                metrics: AtomicMetrics::default(),
            }),
            coalescer: RequestCoalescer::new(),
            keys,
            default_options: config.voice.clone(),
            max_age: config.max_age(),
        })
    }
}

impl Default for SpeechCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}
