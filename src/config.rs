//! Service configuration.
//!
//! Loaded from YAML, then overridden by `SPEECH_*` environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SPEECH_CACHE_DIR` | `cache_dir` |
//! | `SPEECH_CACHE_MAX_AGE_SECS` | `max_age_secs` |
//! | `SPEECH_MIN_INTERVAL_MS` | `min_interval_ms` |
//! | `SPEECH_BASE_URL` | `provider.base_url` |
//! | `SPEECH_TIMEOUT_SECS` | `provider.timeout_secs` |
//! | `SPEECH_REMOTE_URL` | `remote.base_url` |
//! | `SPEECH_REMOTE_TOKEN` | `remote.token` |
//!
//! `cache_dir` defaults to `<platform cache dir>/speech-cache`.

use crate::resilience::retry::RetryConfig;
use crate::tts::VoiceOptions;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

/// `<platform cache dir>/speech-cache`, e.g. `~/.cache/speech-cache` on Linux.
/// Falls back to the temp dir only when the platform reports no cache dir.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("speech-cache")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Used for keyring lookup and the `<PROVIDER>_API_KEY` variable.
    pub provider_id: String,
    pub base_url: Option<String>,
    pub endpoint_path: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_id: "openai".to_string(),
            base_url: None,
            endpoint_path: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_remote_prefix")]
    pub prefix: String,
}

fn default_remote_prefix() -> String {
    "tts-audio".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechCacheConfig {
    pub cache_dir: PathBuf,
    /// Entries older than this are evicted at startup and by `evict_expired`.
    pub max_age_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_salt: Option<String>,
    pub min_interval_ms: u64,
    pub failure_threshold: u32,
    pub retry: RetryConfig,
    pub provider: ProviderConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,
    pub voice: VoiceOptions,
}

impl Default for SpeechCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_age_secs: DEFAULT_MAX_AGE_SECS,
            key_salt: None,
            min_interval_ms: 1000,
            failure_threshold: 5,
            retry: RetryConfig::default(),
            provider: ProviderConfig::default(),
            remote: None,
            voice: VoiceOptions::default(),
        }
    }
}

impl SpeechCacheConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::configuration(format!("failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source; empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("SPEECH_CACHE_DIR") {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(v) = get("SPEECH_CACHE_MAX_AGE_SECS") {
            self.max_age_secs = parse_number("SPEECH_CACHE_MAX_AGE_SECS", &v)?;
        }
        if let Some(v) = get("SPEECH_MIN_INTERVAL_MS") {
            self.min_interval_ms = parse_number("SPEECH_MIN_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("SPEECH_BASE_URL") {
            self.provider.base_url = Some(v);
        }
        if let Some(v) = get("SPEECH_TIMEOUT_SECS") {
            self.provider.timeout_secs = parse_number("SPEECH_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("SPEECH_REMOTE_URL") {
            match self.remote.as_mut() {
                Some(remote) => remote.base_url = v,
                None => {
                    self.remote = Some(RemoteConfig {
                        base_url: v,
                        public_base_url: None,
                        token: None,
                        prefix: default_remote_prefix(),
                    })
                }
            }
        }
        if let Some(v) = get("SPEECH_REMOTE_TOKEN") {
            if let Some(remote) = self.remote.as_mut() {
                remote.token = Some(v);
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(base) = &self.provider.base_url {
            check_url("provider.base_url", base)?;
        }
        if let Some(remote) = &self.remote {
            check_url("remote.base_url", &remote.base_url)?;
            if let Some(public) = &remote.public_base_url {
                check_url("remote.public_base_url", public)?;
            }
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::configuration(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        Ok(())
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| Error::Configuration {
        message: format!("{} must be a non-negative integer, got '{}'", name, value),
        context: ErrorContext::new().with_source("config"),
    })
}

fn check_url(field: &str, value: &str) -> Result<()> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| Error::configuration(format!("invalid {} '{}': {}", field, value, e)))
}
