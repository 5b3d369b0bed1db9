//! The full set of tracks sharing one sync graph and one loop slot.

use crate::cache::CacheConfig;
use crate::processor::LooperProcessor;
use crate::sync::Sync;
use crate::track::{Track, TrackShared, TrackState};
use crate::{Error, Result};
use looper_core::{AudioConfig, BlockPool, PeakMeter, Storage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Highest loop slot index.
pub const MAX_LOOP: usize = 99;

/// Extra pool blocks beyond the rings: record block in flight, mixer output
/// and the input block.
const POOL_HEADROOM: usize = 4;

/// Configuration for a [`Looper`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LooperConfig {
    /// Number of tracks (default: 4).
    pub tracks: usize,
    pub cache: CacheConfig,
    pub audio: AudioConfig,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            tracks: 4,
            cache: CacheConfig::default(),
            audio: AudioConfig::default(),
        }
    }
}

impl LooperConfig {
    /// Pool blocks needed so that every ring can fill at once.
    pub fn required_pool_blocks(&self) -> usize {
        self.tracks * (self.cache.play_buffer_blocks + 1)
            + self.cache.record_buffer_blocks
            + POOL_HEADROOM
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.audio.validate()?;
        // sync files store track indices as bytes
        if self.tracks == 0 || self.tracks > u8::MAX as usize {
            return Err(looper_core::Error::InvalidConfig(format!(
                "tracks {} out of range (1-255)",
                self.tracks
            ))
            .into());
        }
        let required = self.required_pool_blocks();
        if self.audio.pool_blocks < required {
            return Err(looper_core::Error::InvalidConfig(format!(
                "pool_blocks {} too small, need at least {}",
                self.audio.pool_blocks, required
            ))
            .into());
        }
        Ok(())
    }
}

/// Control side of the looper.
///
/// Owned by the butler thread (or whichever thread services the caches).
/// Only one track may be recording at a time.
pub struct Looper {
    tracks: Vec<Track>,
    sync: Arc<Mutex<Sync>>,
    storage: Arc<dyn Storage>,
    loop_index: Option<usize>,
}

impl Looper {
    /// Build the looper and the processor that drives its audio side.
    ///
    /// Fails with [`Error::StorageUnavailable`] if `storage` cannot be used.
    pub fn new(storage: Arc<dyn Storage>, config: LooperConfig) -> Result<(Self, LooperProcessor)> {
        config.validate()?;
        storage.probe().map_err(Error::StorageUnavailable)?;

        let pool = BlockPool::new(config.audio.pool_blocks);
        let sync = Arc::new(Mutex::new(Sync::new(Vec::new(), Arc::clone(&storage))));

        let mut tracks = Vec::with_capacity(config.tracks);
        let mut units = Vec::with_capacity(config.tracks);
        for _ in 0..config.tracks {
            let (track, unit) = Track::new(
                Arc::clone(&storage),
                pool.clone(),
                &config.cache,
                Arc::clone(&sync),
            );
            tracks.push(track);
            units.push(unit);
        }

        let processor = LooperProcessor::new(units, pool, Arc::new(PeakMeter::new()));
        info!(tracks = config.tracks, pool = config.audio.pool_blocks, "looper created");
        Ok((
            Self {
                tracks,
                sync,
                storage,
                loop_index: None,
            },
            processor,
        ))
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, index: usize) -> Result<&Track> {
        self.tracks.get(index).ok_or(Error::InvalidTrack(index))
    }

    pub fn track_mut(&mut self, index: usize) -> Result<&mut Track> {
        self.tracks.get_mut(index).ok_or(Error::InvalidTrack(index))
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> + '_ {
        self.tracks.iter()
    }

    /// Shared status of every track, in index order.
    pub fn shared(&self) -> Vec<Arc<TrackShared>> {
        self.tracks.iter().map(|t| Arc::clone(t.shared())).collect()
    }

    pub fn sync(&self) -> &Arc<Mutex<Sync>> {
        &self.sync
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Currently selected loop slot.
    pub fn loop_index(&self) -> Option<usize> {
        self.loop_index
    }

    /// Bind every track and the sync graph to loop slot `index` (0-99).
    ///
    /// The slot lives in directory `NN`: tracks use `NN/<track>.A|B`, sync
    /// points `NN/sync`. Saved relative positions are restored as prerolls.
    pub fn select_loop(&mut self, index: usize) -> Result<()> {
        if index > MAX_LOOP {
            return Err(Error::InvalidLoop(index));
        }
        if self.loop_index == Some(index) {
            return Ok(());
        }

        let dir = PathBuf::from(format!("{index:02}"));
        self.storage.create_dir_all(&dir)?;
        for track in &mut self.tracks {
            track.set_path(dir.join(track.index().to_string()))?;
        }

        let mut sync = self.sync.lock();
        sync.set_path(Some(dir.join("sync")));
        for track in &mut self.tracks {
            track.set_preroll(sync.preroll(track.index()));
        }
        drop(sync);

        self.loop_index = Some(index);
        info!(slot = index, "selected loop");
        Ok(())
    }

    /// Index of the track in a recording state, if any.
    pub fn recording_track(&self) -> Option<usize> {
        self.tracks
            .iter()
            .position(|t| t.state().is_recording())
    }

    /// Change a track's state. Entering a recording state is refused while
    /// another track records.
    pub fn set_state(&mut self, index: usize, state: TrackState) -> Result<()> {
        if index >= self.tracks.len() {
            return Err(Error::InvalidTrack(index));
        }
        if state.is_recording() {
            if let Some(recording) = self.recording_track().filter(|&r| r != index) {
                return Err(Error::AlreadyRecording { recording });
            }
        }
        self.tracks[index].set_state(state)
    }

    pub fn set_active(&mut self, index: usize, active: bool) -> Result<()> {
        self.track_mut(index)?.set_active(active);
        Ok(())
    }

    pub fn set_pass_through(&mut self, index: usize, enabled: bool) -> Result<()> {
        self.track_mut(index)?.set_pass_through(enabled);
        Ok(())
    }

    pub fn erase(&mut self, index: usize) -> Result<()> {
        self.track_mut(index)?.erase()
    }

    /// Service every track's caches.
    ///
    /// A failing track does not starve the others; the first error is
    /// returned after all tracks have been serviced.
    pub fn update_caches(&mut self) -> Result<()> {
        let mut first = None;
        for track in &mut self.tracks {
            if let Err(e) = track.update_caches() {
                warn!(track = track.index(), error = %e, "cache update failed");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Settle every recording track before shutdown: a held take is
    /// committed, an undecided one discarded.
    pub fn finish(&mut self) -> Result<()> {
        for track in &mut self.tracks {
            match track.state() {
                TrackState::Recording => track.set_state(TrackState::Playing)?,
                TrackState::MaybeRecording => track.set_state(TrackState::Paused)?,
                _ => {}
            }
        }
        self.sync.lock().save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use looper_core::MemoryStorage;

    #[test]
    fn test_default_config_is_valid() {
        let config = LooperConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.required_pool_blocks() <= config.audio.pool_blocks);
    }

    #[test]
    fn test_small_pool_rejected() {
        let mut config = LooperConfig::default();
        config.audio.pool_blocks = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unavailable_storage() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::unavailable());
        let result = Looper::new(storage, LooperConfig::default());
        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
    }

    #[test]
    fn test_select_loop_binds_tracks() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let (mut looper, _processor) = Looper::new(storage, LooperConfig::default()).unwrap();
        looper.select_loop(7).unwrap();
        assert_eq!(looper.loop_index(), Some(7));
        let track = looper.track(2).unwrap();
        assert_eq!(track.master_path(), Some(std::path::Path::new("07/2.A")));
        assert_eq!(
            looper.sync().lock().path(),
            Some(std::path::Path::new("07/sync"))
        );
        assert!(matches!(looper.select_loop(100), Err(Error::InvalidLoop(100))));
    }

    #[test]
    fn test_single_recording_track() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let (mut looper, _processor) = Looper::new(storage, LooperConfig::default()).unwrap();
        looper.select_loop(0).unwrap();
        looper.set_state(1, TrackState::MaybeRecording).unwrap();
        assert!(matches!(
            looper.set_state(2, TrackState::Recording),
            Err(Error::AlreadyRecording { recording: 1 })
        ));
        looper.set_state(1, TrackState::Recording).unwrap();
        assert_eq!(looper.recording_track(), Some(1));
        assert!(matches!(
            looper.set_state(9, TrackState::Playing),
            Err(Error::InvalidTrack(9))
        ));
    }
}
