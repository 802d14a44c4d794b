mod common;

use common::{FIXTURE_RATE, write_silence};
use longform_config::ChunkingSettings;
use longform_transcription::chunk::covered_duration;
use longform_transcription::{ChunkPreparer, ChunkingError, SessionManager};
use rand::Rng;

fn preparer(overlap_secs: f64) -> ChunkPreparer {
    ChunkPreparer::new(&ChunkingSettings {
        chunk_duration_secs: 120.0,
        overlap_secs,
        max_parallel_slices: 3,
    })
}

#[tokio::test]
async fn test_prepare_writes_ordered_segments() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(dir.path().join("sessions"));
    let session = manager.create_session("chunking").await.unwrap();
    let waveform = dir.path().join("long.wav");
    write_silence(&waveform, 900.0, FIXTURE_RATE);

    let segments = preparer(0.0)
        .prepare(&session, &waveform, 120.0)
        .await
        .unwrap();

    assert_eq!(segments.len(), 8);
    for (i, segment) in segments.iter().enumerate() {
        assert_eq!(segment.index, i);
        assert_eq!(segment.start_offset, 120.0 * i as f64);
        assert!(segment.path.starts_with(session.segments_dir()));
        let reader = hound::WavReader::open(&segment.path).unwrap();
        let secs = reader.duration() as f64 / reader.spec().sample_rate as f64;
        assert_eq!(secs, segment.duration);
    }
    assert_eq!(segments[7].duration, 60.0);
    assert_eq!(covered_duration(&segments), 900.0);

    manager.release_session(&session).await.unwrap();
    assert!(!segments[0].path.exists());
}

#[tokio::test]
async fn test_exact_chunk_duration_is_one_segment() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(dir.path());
    let session = manager.create_session("exact").await.unwrap();
    let waveform = dir.path().join("exact.wav");
    write_silence(&waveform, 120.0, FIXTURE_RATE);

    let segments = preparer(0.0)
        .prepare(&session, &waveform, 120.0)
        .await
        .unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].duration, 120.0);
}

#[tokio::test]
async fn test_short_waveform_is_one_unpadded_segment() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(dir.path());
    let session = manager.create_session("short").await.unwrap();
    let waveform = dir.path().join("short.wav");
    write_silence(&waveform, 42.5, FIXTURE_RATE);

    let segments = preparer(0.0)
        .prepare(&session, &waveform, 120.0)
        .await
        .unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].duration, 42.5);
}

#[tokio::test]
async fn test_zero_duration_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(dir.path());
    let session = manager.create_session("empty").await.unwrap();
    let waveform = dir.path().join("empty.wav");
    write_silence(&waveform, 0.0, FIXTURE_RATE);

    let err = preparer(0.0)
        .prepare(&session, &waveform, 120.0)
        .await
        .unwrap_err();
    assert!(matches!(err, ChunkingError::EmptyWaveform(_)));
}

#[tokio::test]
async fn test_unreadable_waveform_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(dir.path());
    let session = manager.create_session("garbage").await.unwrap();
    let waveform = dir.path().join("garbage.wav");
    std::fs::write(&waveform, b"definitely not a RIFF header").unwrap();

    let err = preparer(0.0)
        .prepare(&session, &waveform, 120.0)
        .await
        .unwrap_err();
    assert!(matches!(err, ChunkingError::Unreadable { .. }));
}

#[tokio::test]
async fn test_durations_cover_random_sources() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(dir.path());

    for round in 0..10 {
        let frames: u64 = rand::rng().random_range(1..=(1000 * FIXTURE_RATE as u64));
        let secs = frames as f64 / FIXTURE_RATE as f64;
        let session = manager.create_session("random").await.unwrap();
        let waveform = dir.path().join(format!("random{round}.wav"));
        write_silence(&waveform, secs, FIXTURE_RATE);

        let segments = preparer(0.0)
            .prepare(&session, &waveform, 120.0)
            .await
            .unwrap();
        let total: f64 = segments.iter().map(|s| s.duration).sum();
        assert!((total - secs).abs() < 1.0 / FIXTURE_RATE as f64);
        assert!(segments.iter().all(|s| s.duration <= 120.0));
        assert!(segments.windows(2).all(|w| w[0].end_offset() == w[1].start_offset));
        manager.release_session(&session).await.unwrap();
    }
}

#[tokio::test]
async fn test_overlapping_segments_share_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(dir.path());
    let session = manager.create_session("overlap").await.unwrap();
    let waveform = dir.path().join("overlap.wav");
    write_silence(&waveform, 300.0, FIXTURE_RATE);

    let segments = preparer(2.0)
        .prepare(&session, &waveform, 120.0)
        .await
        .unwrap();
    let starts: Vec<f64> = segments.iter().map(|s| s.start_offset).collect();
    assert_eq!(starts, vec![0.0, 118.0, 236.0]);
    assert_eq!(covered_duration(&segments), 300.0);
}
