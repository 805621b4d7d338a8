//! HTTP transport against a mock speech endpoint.

use crate::mock_server::MockServerFixture;
use mockito::Matcher;
use speech_cache::transport::{HttpTransport, SpeechTransport};
use speech_cache::tts::{AudioFormat, TtsModel, Voice, VoiceOptions};
use speech_cache::{Error, StandardErrorCode};

#[tokio::test]
async fn test_success_returns_audio_bytes_and_sends_expected_body() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", "/v1/audio/speech")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "model": "tts-1-hd",
            "input": "Take a deep breath",
            "voice": "nova",
            "response_format": "opus",
        })))
        .with_status(200)
        .with_body(b"OggS-audio")
        .expect(1)
        .create_async()
        .await;

    let request = VoiceOptions::new()
        .with_voice(Voice::Nova)
        .with_model(TtsModel::Tts1Hd)
        .with_format(AudioFormat::Opus)
        .request("Take a deep breath");
    let bytes = fixture.transport().send(&request).await.unwrap();
    assert_eq!(&bytes[..], b"OggS-audio");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unauthorized_is_fatal() {
    let mut fixture = MockServerFixture::new().await;
    fixture
        .mock_error(401, &[], r#"{"error":{"message":"Incorrect API key provided"}}"#)
        .await;

    let err = fixture
        .transport()
        .send(&VoiceOptions::new().request("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Authentication { status: 401, .. }));
    assert!(err.is_fatal());
    assert_eq!(err.standard_code(), StandardErrorCode::Authentication);
}

#[tokio::test]
async fn test_rate_limit_reads_quota_headers() {
    let mut fixture = MockServerFixture::new().await;
    fixture
        .mock_error(
            429,
            &[
                ("x-ratelimit-remaining-requests", "0"),
                ("x-ratelimit-reset-requests", "1m30s"),
            ],
            r#"{"error":{"code":"rate_limit_exceeded","message":"Rate limit reached"}}"#,
        )
        .await;

    let err = fixture
        .transport()
        .send(&VoiceOptions::new().request("hello"))
        .await
        .unwrap_err();
    match err {
        Error::RateLimited {
            status,
            retry_after_ms,
            remaining,
            ..
        } => {
            assert_eq!(status, 429);
            assert_eq!(retry_after_ms, Some(90_000));
            assert_eq!(remaining, Some(0));
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
}

#[tokio::test]
async fn test_insufficient_quota_is_not_retryable() {
    let mut fixture = MockServerFixture::new().await;
    fixture
        .mock_error(
            429,
            &[],
            r#"{"error":{"code":"insufficient_quota","message":"You exceeded your current quota"}}"#,
        )
        .await;

    let err = fixture
        .transport()
        .send(&VoiceOptions::new().request("hello"))
        .await
        .unwrap_err();
    assert!(!err.is_rate_limited());
    assert!(!err.is_retryable());
    assert_eq!(err.standard_code(), StandardErrorCode::QuotaExhausted);
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let mut fixture = MockServerFixture::new().await;
    fixture.mock_error(503, &[], r#"{"error":{"message":"overloaded"}}"#).await;

    let err = fixture
        .transport()
        .send(&VoiceOptions::new().request("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Remote { status: 503, .. }));
    assert!(err.is_retryable());
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_bad_request_is_not_retryable() {
    let mut fixture = MockServerFixture::new().await;
    fixture.mock_error(400, &[], r#"{"error":{"message":"input too long"}}"#).await;

    let err = fixture
        .transport()
        .send(&VoiceOptions::new().request("hello"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let transport = HttpTransport::builder()
        .api_key("sk-test")
        .base_url("http://127.0.0.1:1")
        .build()
        .unwrap();
    let err = transport
        .send(&VoiceOptions::new().request("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Network { .. }));
    assert!(err.is_retryable());
    assert_eq!(
        err.context().and_then(|c| c.source.as_deref()),
        Some("http_transport")
    );
}
