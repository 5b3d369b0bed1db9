//! Test helpers and fixtures for looper integration tests
//!
//! Two kinds of fixture:
//! - [`Rig`]: a `Looper` and its processor driven cycle by cycle on the test
//!   thread, with a cache pass after every cycle. Fully deterministic.
//! - [`wait_for`]: polling helper for tests that run the butler thread.

#![allow(dead_code)]

use looper::core::BlockPool;
use looper::prelude::*;
use looper::track::{Looper, LooperConfig, LooperProcessor};
use std::path::Path;
use std::time::Duration;

/// Sample index checked in output blocks; away from fade ramps.
pub const PROBE: usize = BLOCK_SAMPLES / 2;

pub use looper::BLOCK_SAMPLES;

/// Cache config with short fades so block centres keep their level.
pub fn test_cache() -> CacheConfig {
    CacheConfig {
        fade_samples: 16,
        ..CacheConfig::default()
    }
}

pub fn test_config() -> LooperConfig {
    LooperConfig {
        cache: test_cache(),
        ..LooperConfig::default()
    }
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic looper fixture.
pub struct Rig {
    pub storage: MemoryStorage,
    pub looper: Looper,
    pub processor: LooperProcessor,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_storage(MemoryStorage::new())
    }

    pub fn with_storage(storage: MemoryStorage) -> Self {
        init_tracing();
        let shared: Arc<dyn looper::Storage> = Arc::new(storage.clone());
        let (looper, processor) =
            Looper::new(shared, test_config()).expect("Failed to create looper");
        Self {
            storage,
            looper,
            processor,
        }
    }

    fn pool(&self) -> BlockPool {
        self.processor.pool().clone()
    }

    /// One audio cycle followed by one cache pass. Returns the probe sample
    /// of the mixed output, 0 for silence.
    pub fn cycle(&mut self, input: Option<i16>) -> i16 {
        let block = input.and_then(|value| {
            let mut block = self.pool().allocate()?;
            block.samples_mut().fill(value);
            Some(block)
        });
        let out = self
            .processor
            .process(block.as_ref())
            .map_or(0, |b| b.samples()[PROBE]);
        drop(block);
        self.looper.update_caches().expect("cache pass failed");
        out
    }

    /// Run `n` cycles, collecting the probe samples.
    pub fn cycles(&mut self, n: usize, input: Option<i16>) -> Vec<i16> {
        (0..n).map(|_| self.cycle(input)).collect()
    }

    /// Record `blocks` blocks of a constant level into `track` and commit.
    pub fn record(&mut self, track: usize, blocks: usize, level: i16) {
        self.looper
            .set_state(track, TrackState::Recording)
            .expect("Failed to start recording");
        self.cycles(blocks, Some(level));
        self.looper
            .set_state(track, TrackState::Playing)
            .expect("Failed to commit recording");
    }
}

/// Raw master file of `blocks` blocks at a constant level.
pub fn master_bytes(blocks: usize, level: i16) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(blocks * BLOCK_SAMPLES * 2);
    for _ in 0..blocks * BLOCK_SAMPLES {
        bytes.extend_from_slice(&level.to_le_bytes());
    }
    bytes
}

/// Level of sample `index` of block `block` in a stored file.
pub fn stored_sample(storage: &MemoryStorage, path: &str, block: usize, index: usize) -> Option<i16> {
    let data = storage.contents(Path::new(path))?;
    let at = (block * BLOCK_SAMPLES + index) * 2;
    let pair = data.get(at..at + 2)?;
    Some(i16::from_le_bytes([pair[0], pair[1]]))
}

/// Poll `condition` every millisecond until it holds or `max_wait_ms` passes.
pub fn wait_for(max_wait_ms: u64, mut condition: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(max_wait_ms);

    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
