//! Preloading narration sequences through the full pipeline.

use crate::mock_server::{scripted_service, MockServerFixture};
use speech_cache::resilience::retry::RetryConfig;
use speech_cache::transport::ScriptedTransport;
use speech_cache::{
    FailurePolicy, NarrationStep, PreloadJob, PreloadState, SpeechCache, StandardErrorCode,
    VoiceOptions,
};
use std::sync::Arc;
use std::time::Duration;

fn session_steps() -> Vec<NarrationStep> {
    vec![
        NarrationStep::new("intro", "Find a comfortable position"),
        NarrationStep::new("breath", "Take a deep breath"),
        NarrationStep::new("scan", "Notice any tension in your shoulders"),
        NarrationStep::new("visualize", "Picture yourself crossing the line"),
        NarrationStep::new("close", "When you are ready, open your eyes"),
    ]
}

#[tokio::test]
async fn test_partial_preload_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let mut fixture = MockServerFixture::new().await;
    let mut mocks = Vec::new();
    for step in session_steps() {
        // No mock for the third step: the server answers 501.
        if step.id != "scan" {
            mocks.push(fixture.mock_audio_for(&step.text, step.id.as_bytes()).await);
        }
    }

    let cache = SpeechCache::builder()
        .cache_dir(dir.path())
        .transport(Arc::new(fixture.transport()))
        .min_interval(Duration::ZERO)
        .retry(RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        })
        .build()
        .await
        .unwrap();

    let job = PreloadJob::new(session_steps(), VoiceOptions::new());
    let mut progress = Vec::new();
    let report = cache.preload(&job, |p| progress.push(p.fraction)).await.unwrap();

    assert_eq!(report.state, PreloadState::Completed);
    assert_eq!(report.locations.len(), 4);
    assert!(report.location("scan").is_none());
    assert!(report.is_partial());
    assert_eq!(report.progress, 1.0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].step_id, "scan");
    assert_eq!(report.failures[0].code, StandardErrorCode::ServerError);
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(progress.last(), Some(&1.0));

    let intro = report.location("intro").unwrap().as_path().unwrap();
    assert_eq!(tokio::fs::read(intro).await.unwrap(), b"intro");
    for mock in mocks {
        mock.assert_async().await;
    }
}

#[tokio::test]
async fn test_preloaded_steps_play_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::echo());
    let cache = scripted_service(dir.path(), Arc::clone(&transport)).await;
    let options = VoiceOptions::new();

    let job = PreloadJob::new(session_steps(), options.clone());
    let report = cache.preload(&job, |_| {}).await.unwrap();
    assert!(!report.is_partial());
    assert_eq!(transport.calls(), 5);

    for step in session_steps() {
        let location = cache.synthesize_and_get(&step.text, &options).await.unwrap();
        assert_eq!(Some(&location), report.location(&step.id));
    }
    assert_eq!(transport.calls(), 5);
    assert_eq!(cache.metrics().local_hits, 5);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_preload_keeps_cache_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::echo().with_latency(Duration::from_millis(100)));
    let cache = scripted_service(dir.path(), Arc::clone(&transport)).await;

    let job = PreloadJob::new(session_steps(), VoiceOptions::new());
    let handle = job.cancel_handle();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.cancel();
    });
    let report = cache.preload(&job, |_| {}).await.unwrap();
    canceller.await.unwrap();

    assert_eq!(report.state, PreloadState::Cancelled);
    assert_eq!(report.locations.len(), 2);
    assert_eq!(job.state(), PreloadState::Cancelled);

    // The step in flight at cancellation still lands in the cache.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(transport.calls(), 3);
    assert_eq!(cache.cache_stats().await.entry_count, 3);
}

#[tokio::test]
async fn test_abort_policy_marks_job_failed() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::failing_on("tension", 400));
    let cache = scripted_service(dir.path(), Arc::clone(&transport)).await;

    let job = PreloadJob::new(session_steps(), VoiceOptions::new()).with_policy(FailurePolicy::Abort);
    let report = cache.preload(&job, |_| {}).await.unwrap();
    assert_eq!(report.state, PreloadState::Failed);
    assert_eq!(report.locations.len(), 2);
    assert_eq!(transport.calls(), 3);
}
