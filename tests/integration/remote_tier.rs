//! Remote tier behavior as seen through the service.

use crate::mock_server::{scripted_builder, MockServerFixture};
use async_trait::async_trait;
use bytes::Bytes;
use mockito::Matcher;
use speech_cache::cache::{
    CacheKey, CacheKeyGenerator, HttpObjectStore, MemoryMetadataStore, MemoryObjectStore,
    ObjectMetadataStore, ObjectStore, ObjectStoreCache, RemoteCacheTier, RemoteMetadata,
};
use speech_cache::config::RemoteConfig;
use speech_cache::transport::ScriptedTransport;
use speech_cache::tts::{AudioFormat, TtsModel, Voice};
use speech_cache::{AudioLocation, Error, SpeechCacheBuilder, SpeechCacheConfig, VoiceOptions};
use std::sync::Arc;
use std::time::Duration;

const BUCKET: &str = "https://cdn.example.com/narration";

fn shared_tier(objects: Arc<MemoryObjectStore>) -> Arc<dyn RemoteCacheTier> {
    Arc::new(ObjectStoreCache::new(objects, MemoryMetadataStore::new()))
}

#[tokio::test]
async fn test_second_device_hits_remote_tier() {
    let objects = Arc::new(MemoryObjectStore::new(BUCKET));
    let tier = shared_tier(Arc::clone(&objects));
    let options = VoiceOptions::new();

    let device_a = tempfile::tempdir().unwrap();
    let transport_a = Arc::new(ScriptedTransport::echo());
    let cache_a = scripted_builder(device_a.path(), Arc::clone(&transport_a))
        .remote_tier(Arc::clone(&tier))
        .build()
        .await
        .unwrap();
    let local = cache_a.synthesize_and_get("You are stronger than you think", &options).await.unwrap();
    assert!(local.is_local());
    assert_eq!(objects.len(), 1);

    let device_b = tempfile::tempdir().unwrap();
    let transport_b = Arc::new(ScriptedTransport::echo());
    let cache_b = scripted_builder(device_b.path(), Arc::clone(&transport_b))
        .remote_tier(tier)
        .build()
        .await
        .unwrap();
    let remote = cache_b.synthesize_and_get("You are stronger than you think", &options).await.unwrap();

    let key = cache_b.key_for("You are stronger than you think", &options);
    assert_eq!(
        remote,
        AudioLocation::Remote(format!("{}/tts-audio/{}.mp3", BUCKET, key))
    );
    assert_eq!(transport_b.calls(), 0);
    assert_eq!(cache_b.metrics().remote_hits, 1);
}

#[tokio::test]
async fn test_dangling_metadata_falls_through_to_synthesis() {
    let objects = Arc::new(MemoryObjectStore::new(BUCKET));
    let tier = shared_tier(Arc::clone(&objects));
    let options = VoiceOptions::new();

    let seed_dir = tempfile::tempdir().unwrap();
    let seed = scripted_builder(seed_dir.path(), Arc::new(ScriptedTransport::echo()))
        .remote_tier(Arc::clone(&tier))
        .build()
        .await
        .unwrap();
    seed.synthesize_and_get("Let the noise fade", &options).await.unwrap();

    let key = seed.key_for("Let the noise fade", &options);
    objects
        .delete(&format!("tts-audio/{}.mp3", key))
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::echo());
    let cache = scripted_builder(dir.path(), Arc::clone(&transport))
        .remote_tier(tier)
        .build()
        .await
        .unwrap();
    let location = cache.synthesize_and_get("Let the noise fade", &options).await.unwrap();
    assert!(location.is_local());
    assert_eq!(transport.calls(), 1);
    // Re-uploaded after synthesis.
    assert_eq!(objects.len(), 1);
}

struct UnreachableTier;

#[async_trait]
impl RemoteCacheTier for UnreachableTier {
    async fn get(&self, _key: &CacheKey) -> speech_cache::Result<Option<String>> {
        Err(Error::network("remote tier unreachable"))
    }

    async fn put(&self, _key: &CacheKey, _bytes: Bytes, _metadata: RemoteMetadata) -> speech_cache::Result<String> {
        Err(Error::network("remote tier unreachable"))
    }

    fn name(&self) -> &'static str {
        "unreachable"
    }
}

#[tokio::test]
async fn test_remote_failures_never_fail_the_caller() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::echo());
    let cache = scripted_builder(dir.path(), Arc::clone(&transport))
        .remote_tier(Arc::new(UnreachableTier))
        .build()
        .await
        .unwrap();

    let location = cache
        .synthesize_and_get("Stay with the breath", &VoiceOptions::new())
        .await
        .unwrap();
    assert!(location.is_local());
    assert_eq!(transport.calls(), 1);
    assert_eq!(cache.metrics().errors, 0);
}

const BUCKET_TOKEN: &str = "bucket-token";

type HttpTier = ObjectStoreCache<Arc<HttpObjectStore>, ObjectMetadataStore<Arc<HttpObjectStore>>>;

fn http_tier(fixture: &MockServerFixture, token: Option<&str>) -> HttpTier {
    let store = Arc::new(
        HttpObjectStore::new(
            &format!("{}/bucket", fixture.base_url),
            token.map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap(),
    );
    ObjectStoreCache::new(Arc::clone(&store), ObjectMetadataStore::new(store))
}

fn record_for(key: &CacheKey) -> RemoteMetadata {
    RemoteMetadata {
        key: key.hash.clone(),
        object_path: format!("tts-audio/{}.mp3", key.hash),
        voice: "nova".to_string(),
        model: "tts-1".to_string(),
        speed: 1.0,
        format: AudioFormat::Mp3,
        size_bytes: 9,
        created_at_ms: 1_700_000_000_000,
    }
}

fn narration_key(text: &str) -> CacheKey {
    CacheKeyGenerator::new().compute_key(text, Voice::Nova, TtsModel::Tts1, 1.0)
}

#[tokio::test]
async fn test_http_tier_put_then_get_with_bearer_token() {
    let mut fixture = MockServerFixture::new().await;
    let key = narration_key("Notice five things you can see");
    let object_path = format!("/bucket/tts-audio/{}.mp3", key.hash);
    let meta_path = format!("/bucket/meta/{}.json", key.hash);
    let bearer = format!("Bearer {}", BUCKET_TOKEN);

    let put_object = fixture
        .server
        .mock("PUT", object_path.as_str())
        .match_header("authorization", bearer.as_str())
        .match_header("content-type", "audio/mpeg")
        .match_body("ID3-audio")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let put_meta = fixture
        .server
        .mock("PUT", meta_path.as_str())
        .match_header("authorization", bearer.as_str())
        .match_body(Matcher::PartialJson(serde_json::json!({
            "key": key.hash,
            "object_path": format!("tts-audio/{}.mp3", key.hash),
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let tier = http_tier(&fixture, Some(BUCKET_TOKEN));
    let mut metadata = record_for(&key);
    metadata.key.clear();
    metadata.object_path.clear();
    let url = tier
        .put(&key, Bytes::from_static(b"ID3-audio"), metadata)
        .await
        .unwrap();
    let expected = format!("{}{}", fixture.base_url, object_path);
    assert_eq!(url, expected);
    put_object.assert_async().await;
    put_meta.assert_async().await;

    let get_meta = fixture
        .server
        .mock("GET", meta_path.as_str())
        .match_header("authorization", bearer.as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::to_string(&record_for(&key)).unwrap())
        .expect(1)
        .create_async()
        .await;
    let head_object = fixture
        .server
        .mock("HEAD", object_path.as_str())
        .match_header("authorization", bearer.as_str())
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    assert_eq!(tier.get(&key).await.unwrap(), Some(expected));
    get_meta.assert_async().await;
    head_object.assert_async().await;
}

#[tokio::test]
async fn test_http_tier_missing_object_drops_record() {
    let mut fixture = MockServerFixture::new().await;
    let key = narration_key("Relax your shoulders");
    let meta_path = format!("/bucket/meta/{}.json", key.hash);

    fixture
        .server
        .mock("GET", meta_path.as_str())
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body(serde_json::to_string(&record_for(&key)).unwrap())
        .create_async()
        .await;
    let head = fixture
        .server
        .mock("HEAD", format!("/bucket/tts-audio/{}.mp3", key.hash).as_str())
        .with_status(404)
        .expect(1)
        .create_async()
        .await;
    let delete_meta = fixture
        .server
        .mock("DELETE", meta_path.as_str())
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let tier = http_tier(&fixture, None);
    assert_eq!(tier.get(&key).await.unwrap(), None);
    head.assert_async().await;
    delete_meta.assert_async().await;
}

#[tokio::test]
async fn test_http_tier_unknown_record_and_server_errors() {
    let mut fixture = MockServerFixture::new().await;
    let missing = narration_key("Never uploaded");
    let flaky = narration_key("Bucket is down");

    fixture
        .server
        .mock("GET", format!("/bucket/meta/{}.json", missing.hash).as_str())
        .with_status(404)
        .create_async()
        .await;
    fixture
        .server
        .mock("GET", format!("/bucket/meta/{}.json", flaky.hash).as_str())
        .with_status(200)
        .with_body(serde_json::to_string(&record_for(&flaky)).unwrap())
        .create_async()
        .await;
    fixture
        .server
        .mock("HEAD", format!("/bucket/tts-audio/{}.mp3", flaky.hash).as_str())
        .with_status(503)
        .create_async()
        .await;
    let delete = fixture
        .server
        .mock("DELETE", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let tier = http_tier(&fixture, None);
    assert_eq!(tier.get(&missing).await.unwrap(), None);
    let err = tier.get(&flaky).await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    // An unavailable bucket says nothing about the record, so it is kept.
    delete.assert_async().await;
}

#[tokio::test]
async fn test_configured_remote_tier_serves_second_device() {
    let mut fixture = MockServerFixture::new().await;
    let options = VoiceOptions::new().with_voice(Voice::Nova);
    let text = "Let your breath slow down";

    let dir = tempfile::tempdir().unwrap();
    let config = SpeechCacheConfig {
        cache_dir: dir.path().to_path_buf(),
        min_interval_ms: 0,
        remote: Some(RemoteConfig {
            base_url: format!("{}/bucket", fixture.base_url),
            public_base_url: Some(BUCKET.to_string()),
            token: Some(BUCKET_TOKEN.to_string()),
            prefix: "tts-audio".to_string(),
        }),
        ..SpeechCacheConfig::default()
    };
    let transport = Arc::new(ScriptedTransport::echo());
    let cache = SpeechCacheBuilder::from_config(config)
        .transport(transport.clone())
        .build()
        .await
        .unwrap();
    let key = cache.key_for(text, &options);

    let bearer = format!("Bearer {}", BUCKET_TOKEN);
    fixture
        .server
        .mock("GET", format!("/bucket/meta/{}.json", key.hash).as_str())
        .match_header("authorization", bearer.as_str())
        .with_status(200)
        .with_body(serde_json::to_string(&record_for(&key)).unwrap())
        .create_async()
        .await;
    fixture
        .server
        .mock("HEAD", format!("/bucket/tts-audio/{}.mp3", key.hash).as_str())
        .match_header("authorization", bearer.as_str())
        .with_status(200)
        .create_async()
        .await;

    let location = cache.synthesize_and_get(text, &options).await.unwrap();
    assert_eq!(
        location,
        AudioLocation::Remote(format!("{}/tts-audio/{}.mp3", BUCKET, key.hash))
    );
    assert_eq!(transport.calls(), 0);
    assert_eq!(cache.metrics().remote_hits, 1);
}
