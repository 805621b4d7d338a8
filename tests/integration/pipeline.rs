//! End-to-end behavior of `SpeechCache::synthesize_and_get`.

use crate::mock_server::{scripted_builder, scripted_service, MockServerFixture};
use speech_cache::transport::ScriptedTransport;
use speech_cache::tts::{AudioFormat, Voice, VoiceOptions};
use speech_cache::{AudioLocation, Error, SpeechCache};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_take_a_deep_breath_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let mut fixture = MockServerFixture::new().await;
    // One call for the first request, one after the cache is cleared.
    let mock = fixture.mock_audio(b"ID3-breath", 2).await;

    let cache = SpeechCache::builder()
        .cache_dir(dir.path())
        .transport(Arc::new(fixture.transport()))
        .min_interval(Duration::ZERO)
        .build()
        .await
        .unwrap();
    let options = VoiceOptions::new().with_voice(Voice::Nova);

    let first = cache
        .synthesize_and_get("Take a deep breath", &options)
        .await
        .unwrap();
    let second = cache
        .synthesize_and_get("Take a deep breath", &options)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(cache.metrics().local_hits, 1);

    let path = first.as_path().unwrap().to_path_buf();
    assert_eq!(tokio::fs::read(&path).await.unwrap(), b"ID3-breath");
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp3"));

    assert_eq!(cache.clear_cache().await.unwrap(), 1);
    assert!(!path.exists());
    let third = cache
        .synthesize_and_get("Take a deep breath", &options)
        .await
        .unwrap();
    assert_eq!(third, first);
    mock.assert_async().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_coalesce_into_one_call() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::echo().with_latency(Duration::from_millis(200)));
    let cache = Arc::new(scripted_service(dir.path(), Arc::clone(&transport)).await);

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .synthesize_and_get("Visualize the finish line", &VoiceOptions::new())
                    .await
            })
        })
        .collect();
    let mut locations = Vec::new();
    for task in tasks {
        locations.push(task.await.unwrap().unwrap());
    }

    assert_eq!(transport.calls(), 1);
    assert!(locations.windows(2).all(|w| w[0] == w[1]));
    let metrics = cache.metrics();
    assert_eq!(metrics.synthesized, 1);
    assert_eq!(metrics.coalesced, 9);
}

#[tokio::test]
async fn test_each_option_gets_its_own_entry() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::echo());
    let cache = scripted_service(dir.path(), Arc::clone(&transport)).await;

    let text = "Shoulders down, jaw loose";
    let variants = [
        VoiceOptions::new(),
        VoiceOptions::new().with_voice(Voice::Shimmer),
        VoiceOptions::new().with_speed(1.5),
        VoiceOptions::new().with_format(AudioFormat::Wav),
    ];
    for options in &variants {
        cache.synthesize_and_get(text, options).await.unwrap();
    }
    // Out-of-range speed clamps to 4.0, a distinct key from the ones above.
    cache
        .synthesize_and_get(text, &VoiceOptions::new().with_speed(9.0))
        .await
        .unwrap();
    cache
        .synthesize_and_get(text, &VoiceOptions::new().with_speed(4.0))
        .await
        .unwrap();

    assert_eq!(transport.calls(), 5);
    assert_eq!(cache.cache_stats().await.entry_count, 5);
}

#[tokio::test]
async fn test_deleted_file_is_resynthesized() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::echo());
    let cache = scripted_service(dir.path(), Arc::clone(&transport)).await;
    let options = VoiceOptions::new();

    let location = cache.synthesize_and_get("Unclench your fists", &options).await.unwrap();
    tokio::fs::remove_file(location.as_path().unwrap()).await.unwrap();

    let again = cache.synthesize_and_get("Unclench your fists", &options).await.unwrap();
    assert_eq!(again, location);
    assert!(again.as_path().unwrap().exists());
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let options = VoiceOptions::new();
    let first = {
        let transport = Arc::new(ScriptedTransport::echo());
        let cache = scripted_service(dir.path(), transport).await;
        cache.synthesize_and_get("Picture the podium", &options).await.unwrap()
    };

    let transport = Arc::new(ScriptedTransport::echo());
    let cache = scripted_service(dir.path(), Arc::clone(&transport)).await;
    let second = cache.synthesize_and_get("Picture the podium", &options).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(transport.calls(), 0);
    assert_eq!(cache.metrics().local_hits, 1);
}

#[tokio::test]
async fn test_expired_entries_evicted_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let options = VoiceOptions::new();
    let location = {
        let cache = scripted_service(dir.path(), Arc::new(ScriptedTransport::echo())).await;
        cache.synthesize_and_get("Yesterday's mantra", &options).await.unwrap()
    };

    // Age the entry by rewriting its creation time in the persisted index.
    let index_path = dir.path().join("index.json");
    let mut index: serde_json::Value =
        serde_json::from_slice(&tokio::fs::read(&index_path).await.unwrap()).unwrap();
    for entry in index["entries"].as_object_mut().unwrap().values_mut() {
        entry["created_at_ms"] = serde_json::json!(1_000u64);
    }
    tokio::fs::write(&index_path, serde_json::to_vec(&index).unwrap()).await.unwrap();

    let transport = Arc::new(ScriptedTransport::echo());
    let cache = scripted_builder(dir.path(), Arc::clone(&transport))
        .max_age(Duration::from_secs(7 * 24 * 3600))
        .build()
        .await
        .unwrap();
    assert_eq!(cache.cache_stats().await.entry_count, 0);
    assert!(!location.as_path().unwrap().exists());

    cache.synthesize_and_get("Yesterday's mantra", &options).await.unwrap();
    assert_eq!(transport.calls(), 1);
    assert_eq!(cache.evict_expired().await.unwrap(), 0);
}

#[tokio::test]
async fn test_rejected_key_halts_until_reset() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::echo());
    transport.push_status(401);
    let cache = scripted_service(dir.path(), Arc::clone(&transport)).await;
    let options = VoiceOptions::new();

    let err = cache.synthesize_and_get("one", &options).await.unwrap_err();
    assert!(err.is_fatal());
    let err = cache.synthesize_and_get("two", &options).await.unwrap_err();
    assert!(matches!(err.root(), Error::Authentication { .. }));
    assert_eq!(transport.calls(), 1);

    cache.reset_credentials();
    let location = cache.synthesize_and_get("two", &options).await.unwrap();
    assert!(matches!(location, AudioLocation::Local(_)));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_requests_are_retried_through_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::echo());
    transport.push_status(429);
    transport.push_status(429);
    let cache = scripted_service(dir.path(), Arc::clone(&transport)).await;

    let location = cache
        .synthesize_and_get("Breathe in for four", &VoiceOptions::new())
        .await
        .unwrap();
    assert!(location.is_local());
    assert_eq!(transport.calls(), 3);
    assert_eq!(cache.metrics().errors, 0);
}
