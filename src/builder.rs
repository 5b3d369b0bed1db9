//! Builder for configuring and constructing a `LooperEngine`.

use crate::controls::{Footswitches, TAP_MILLISECONDS};
use crate::{Error, LooperEngine, Result};
use looper_core::{AudioConfig, FsStorage, Storage};
use looper_track::{ButlerConfig, ButlerThread, CacheConfig, Looper, LooperConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Storage comes from `.root()` (a host directory) or `.storage()` (any
/// [`Storage`] implementation); one of the two is required.
///
/// # Example
///
/// ```ignore
/// use looper::prelude::*;
///
/// let mut engine = LooperEngine::builder()
///     .root("/media/card")
///     .tracks(4)
///     .build()?;
///
/// let processor = engine.processor().unwrap();
/// ```
pub struct LooperEngineBuilder {
    root: Option<PathBuf>,
    storage: Option<Arc<dyn Storage>>,
    config: LooperConfig,
    butler: ButlerConfig,
    initial_loop: Option<usize>,
    tap: Duration,
}

impl Default for LooperEngineBuilder {
    fn default() -> Self {
        Self {
            root: None,
            storage: None,
            config: LooperConfig::default(),
            butler: ButlerConfig::default(),
            initial_loop: Some(0),
            tap: Duration::from_millis(TAP_MILLISECONDS),
        }
    }
}

impl LooperEngineBuilder {
    /// Store loops under a host directory.
    pub fn root(mut self, path: impl Into<PathBuf>) -> Self {
        self.root = Some(path.into());
        self
    }

    /// Use a custom store. Takes precedence over `.root()`.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Default: 4
    pub fn tracks(mut self, count: usize) -> Self {
        self.config.tracks = count;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    pub fn audio(mut self, audio: AudioConfig) -> Self {
        self.config.audio = audio;
        self
    }

    /// Default: 5ms
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.butler = ButlerConfig {
            poll_interval: ButlerConfig::with_poll_interval(interval).poll_interval,
            ..self.butler
        };
        self
    }

    /// Loop slot bound at startup. Default: 0, `None` leaves tracks unbound.
    pub fn initial_loop(mut self, index: Option<usize>) -> Self {
        self.initial_loop = index;
        self
    }

    /// Default: 500ms
    pub fn tap_window(mut self, tap: Duration) -> Self {
        self.tap = tap;
        self
    }

    pub fn build(self) -> Result<LooperEngine> {
        let storage: Arc<dyn Storage> = match (self.storage, self.root) {
            (Some(storage), _) => storage,
            (None, Some(root)) => Arc::new(FsStorage::new(root)),
            (None, None) => return Err(Error::Config("no storage root or store given".into())),
        };

        let config = self.config;
        let (mut looper, processor) = Looper::new(storage, config.clone())?;
        if let Some(index) = self.initial_loop {
            looper.select_loop(index)?;
        }

        let mut butler = ButlerThread::new(looper, self.butler);
        butler.start()?;

        let footswitches = Footswitches::new(config.tracks, Instant::now()).with_tap_window(self.tap);
        info!(tracks = config.tracks, slot = ?self.initial_loop, "looper engine started");
        Ok(LooperEngine::new(butler, processor, footswitches, config))
    }
}
