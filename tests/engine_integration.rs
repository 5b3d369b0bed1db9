//! Engine integration tests
//!
//! Run the butler thread for real and drive the processor from the test
//! thread, the way an audio callback would.
//!
//! Run with:
//! ```bash
//! cargo test -p looper --test engine_integration
//! ```

mod helpers;

use helpers::*;
use looper::prelude::*;
use looper::track::{Error as TrackError, LooperProcessor};
use std::path::Path;
use std::time::Duration;

fn engine(storage: &MemoryStorage) -> LooperEngine {
    init_tracing();
    LooperEngine::builder()
        .storage(Arc::new(storage.clone()))
        .cache(test_cache())
        .poll_interval(Duration::from_millis(1))
        .build()
        .expect("Failed to build engine")
}

/// One processor cycle; returns the probe sample, 0 for silence.
fn cycle(processor: &mut LooperProcessor, input: Option<i16>) -> i16 {
    let block = input.and_then(|value| {
        let mut block = processor.pool().allocate()?;
        block.samples_mut().fill(value);
        Some(block)
    });
    processor
        .process(block.as_ref())
        .map_or(0, |b| b.samples()[PROBE])
}

#[test]
fn test_footswitch_records_and_plays_back() {
    let storage = MemoryStorage::new();
    let mut engine = engine(&storage);
    let mut processor = engine.processor().unwrap();
    assert!(engine.processor().is_none());

    let start = Instant::now();
    engine.press(0, start).unwrap();
    assert!(wait_for(1000, || engine.track(0).unwrap().state()
        == TrackState::MaybeRecording));

    // held past the tap window
    engine.poll(start + Duration::from_millis(600)).unwrap();
    assert!(wait_for(1000, || engine.track(0).unwrap().state()
        == TrackState::Recording));

    for _ in 0..40 {
        cycle(&mut processor, Some(1000));
        std::thread::sleep(Duration::from_millis(1));
    }
    engine
        .release(0, start + Duration::from_millis(2000))
        .unwrap();
    assert!(wait_for(2000, || engine.status(0).unwrap().blocks == 40));

    let status = engine.status(0).unwrap();
    assert_eq!(status.state, TrackState::Playing);
    assert!(status.active);
    assert!(storage.contents(Path::new("00/0.B")).is_some());

    let played = wait_for(2000, || {
        std::thread::sleep(Duration::from_millis(1));
        cycle(&mut processor, None) == 1000
    });
    assert!(played, "recorded loop never reached the output");
    assert!(engine.butler_stats().passes() > 0);

    engine.shutdown();
}

#[test]
fn test_tap_toggles_playback() {
    let storage = MemoryStorage::new();
    let mut engine = engine(&storage);

    let start = Instant::now();
    engine.press(1, start).unwrap();
    engine
        .release(1, start + Duration::from_millis(100))
        .unwrap();
    assert!(wait_for(1000, || engine.track(1).unwrap().state()
        == TrackState::Playing));
    assert!(engine.status(1).unwrap().active);

    let later = start + Duration::from_millis(1000);
    engine.press(1, later).unwrap();
    engine
        .release(1, later + Duration::from_millis(100))
        .unwrap();
    assert!(wait_for(1000, || engine.track(1).unwrap().state()
        == TrackState::Paused));
    assert!(!engine.status(1).unwrap().active);

    engine.shutdown();
}

#[test]
fn test_second_recording_refused() {
    let storage = MemoryStorage::new();
    let mut engine = engine(&storage);

    engine.set_state(0, TrackState::Recording).unwrap();
    let result = engine.set_state(2, TrackState::Recording);
    assert!(matches!(
        result,
        Err(Error::Track(TrackError::AlreadyRecording { recording: 0 }))
    ));

    engine.shutdown();
}

#[test]
fn test_invalid_requests_rejected() {
    let storage = MemoryStorage::new();
    let mut engine = engine(&storage);

    assert!(matches!(
        engine.set_state(4, TrackState::Playing),
        Err(Error::Track(TrackError::InvalidTrack(4)))
    ));
    assert!(matches!(
        engine.select_loop(100),
        Err(Error::Track(TrackError::InvalidLoop(100)))
    ));
    assert!(engine.press(9, Instant::now()).is_err());
    assert!(engine.status(4).is_none());

    engine.shutdown();
}

#[test]
fn test_builder_requires_storage() {
    let result = LooperEngine::builder().build();
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_filesystem_root() {
    let dir = tempfile::tempdir().unwrap();
    let engine = LooperEngine::builder()
        .root(dir.path())
        .cache(test_cache())
        .build()
        .expect("Failed to build engine on disk");

    assert_eq!(engine.track_count(), 4);
    assert!(wait_for(1000, || dir.path().join("00").is_dir()));
    engine.shutdown();
}
