mod common;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{Harness, Script};
use longform_transcription::{
    AcquisitionError, ChunkingError, Mode, PoolState, TranscribeError, TranscribeOptions,
    WorkerTaskError,
};

fn every_segment_fails(segments: usize) -> Script {
    Script {
        fail_first: (0..segments).map(|i| (i, u32::MAX)).collect::<HashMap<_, _>>(),
        ..Script::default()
    }
}

#[tokio::test]
async fn test_failed_start_forces_single_until_restart() {
    let harness = Harness::build(
        Script::default(),
        |_| {},
        |loader| {
            loader.slow_worker = Some(1);
            loader.slow.store(true, Ordering::SeqCst);
            loader.load_delay = Duration::from_secs(30);
        },
    );

    assert!(harness.pool.start(2).await.is_err());
    assert_eq!(harness.pool.state(), PoolState::Failed);
    assert_eq!(harness.service.select_mode(900.0), Mode::Single);
    assert_eq!(harness.service.select_mode(3600.0), Mode::Single);

    let source = harness.source("while-down", 900.0);
    let result = harness
        .service
        .transcribe(&source, TranscribeOptions::default())
        .await
        .unwrap();
    assert_eq!(result.mode, Mode::Single);
    assert_eq!(result.text, "whole");

    harness.loader.slow.store(false, Ordering::SeqCst);
    harness.pool.restart(2).await.unwrap();
    assert_eq!(harness.service.select_mode(900.0), Mode::Pooled);
    harness.pool.shutdown(true).await;
}

#[tokio::test]
async fn test_pool_never_started_still_transcribes() {
    let harness = Harness::new(Script::default());

    let source = harness.source("no-pool", 900.0);
    let result = harness
        .service
        .transcribe(&source, TranscribeOptions::default())
        .await
        .unwrap();
    assert_eq!(result.mode, Mode::Single);
    assert_eq!(result.timeline.last().unwrap().end, 900.0);
    assert!(harness.leftover_sessions().is_empty());
}

#[tokio::test]
async fn test_pooled_failure_falls_back_to_single() {
    let harness = Harness::new(every_segment_fails(8));
    harness.start_pool().await;

    let source = harness.source("bad-pool", 900.0);
    let result = harness
        .service
        .transcribe(&source, TranscribeOptions::default())
        .await
        .unwrap();

    assert_eq!(result.mode, Mode::Single);
    assert!(result.fallback_used);
    assert_eq!(result.text, "whole");
    assert_eq!(result.degraded_segment_count, 0);
    assert_eq!(harness.service.metrics().fallback_count, 1);
    assert!(harness.leftover_sessions().is_empty());
    harness.pool.shutdown(true).await;
}

#[tokio::test]
async fn test_failed_fallback_surfaces_both_errors() {
    let mut script = every_segment_fails(8);
    script.single_fails = true;
    let harness = Harness::new(script);
    harness.start_pool().await;

    let source = harness.source("all-bad", 900.0);
    let err = harness
        .service
        .transcribe(&source, TranscribeOptions::default())
        .await
        .unwrap_err();

    match &err {
        TranscribeError::FallbackFailed { pooled, fallback } => {
            assert!(matches!(
                pooled.as_ref(),
                TranscribeError::WorkerTask {
                    source: WorkerTaskError::Inference(_),
                    ..
                }
            ));
            assert!(matches!(fallback.as_ref(), TranscribeError::SingleWorker(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());
    assert!(harness.leftover_sessions().is_empty());
    assert_eq!(harness.service.metrics().failed_requests, 1);
    harness.pool.shutdown(true).await;
}

#[tokio::test]
async fn test_zero_duration_source_is_chunking_error() {
    let harness = Harness::new(Script::default());
    harness.start_pool().await;

    let source = harness.source("empty", 0.0);
    let err = harness
        .service
        .transcribe(&source, TranscribeOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TranscribeError::Chunking(ChunkingError::EmptyWaveform(_))
    ));
    assert!(err.is_input_error());
    assert_eq!(harness.script.calls.load(Ordering::SeqCst), 0);
    assert!(harness.leftover_sessions().is_empty());
    harness.pool.shutdown(true).await;
}

#[tokio::test]
async fn test_missing_source_is_not_retried() {
    let harness = Harness::new(Script::default());
    harness.start_pool().await;

    let err = harness
        .service
        .transcribe("/no/such/recording.wav", TranscribeOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TranscribeError::Acquisition(AcquisitionError::NotFound(_))
    ));
    assert!(err.is_input_error());
    assert_eq!(harness.service.metrics().fallback_count, 0);
    assert!(harness.leftover_sessions().is_empty());
    harness.pool.shutdown(true).await;
}

#[tokio::test]
async fn test_request_timeout_releases_session() {
    let script = Script {
        latency_ms: Some((3_000, 3_000)),
        ..Script::default()
    };
    let harness = Harness::build(script, |s| s.pipeline.request_timeout_secs = 1, |_| {});
    harness.start_pool().await;

    let source = harness.source("slow", 900.0);
    let err = harness
        .service
        .transcribe(&source, TranscribeOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, TranscribeError::RequestTimeout(_)));
    assert!(!err.allows_fallback());
    assert!(harness.leftover_sessions().is_empty());
    harness.pool.shutdown(false).await;
}

#[tokio::test]
async fn test_misconfigured_chunking_falls_back_to_single() {
    let harness = Harness::build(
        Script::default(),
        |s| s.chunking.chunk_duration_secs = 0.0,
        |_| {},
    );
    harness.start_pool().await;

    let source = harness.source("bad-chunking", 900.0);
    let result = harness
        .service
        .transcribe(&source, TranscribeOptions::default())
        .await
        .unwrap();

    assert_eq!(result.mode, Mode::Single);
    assert!(result.fallback_used);
    assert_eq!(result.text, "whole");
    assert!(harness.leftover_sessions().is_empty());
    harness.pool.shutdown(true).await;
}

#[tokio::test]
async fn test_cancelled_request_releases_session() {
    let script = Script {
        latency_ms: Some((2_000, 2_000)),
        ..Script::default()
    };
    let harness = Harness::new(script);
    harness.start_pool().await;

    let source = harness.source("cancelled", 900.0);
    let cancelled = tokio::time::timeout(
        Duration::from_millis(300),
        harness.service.transcribe(&source, TranscribeOptions::default()),
    )
    .await;
    assert!(cancelled.is_err());

    for _ in 0..200 {
        if harness.leftover_sessions().is_empty() && harness.sessions.active_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(harness.leftover_sessions().is_empty());
    assert_eq!(harness.sessions.active_count(), 0);
    harness.pool.shutdown(false).await;
}
