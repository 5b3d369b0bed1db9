//! One looper track.
//!
//! A track is split in two halves. [`Track`] runs on the butler thread: it
//! owns the master and scratch files, drives the state machine and feeds
//! the caches. [`TrackUnit`] runs in the audio callback: it plays the
//! master, captures takes and reports loop boundaries back through a small
//! event channel.
//!
//! Each track alternates between two files, `<base>.A` and `<base>.B`. One
//! holds the master recording, the other receives the next take. Committing
//! a take swaps their roles.

mod state;
mod unit;

pub use state::{TrackShared, TrackState};
pub use unit::TrackUnit;

use crate::cache::{CacheConfig, PlayCache, RecordCache};
use crate::sync::Sync;
use crate::Result;
use crossbeam_channel::Receiver;
use looper_core::{BlockPool, Storage};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Capacity of the unit-to-track event channel.
const EVENT_CAPACITY: usize = 64;

/// Notifications posted by the audio half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TrackEvent {
    /// Sequence 0 of the master was just played.
    LoopStarted,
    /// The first block of a committed-bound take was captured.
    RecordingStarted,
}

/// Background half of a track.
pub struct Track {
    index: usize,
    active: bool,
    base: Option<PathBuf>,
    master_is_b: bool,
    master: PlayCache,
    scratch: RecordCache,
    shared: Arc<TrackShared>,
    sync: Arc<Mutex<Sync>>,
    storage: Arc<dyn Storage>,
    events: Receiver<TrackEvent>,
    state_changed: Instant,
}

impl Track {
    /// Build both halves and register the track with `sync`.
    ///
    /// The track's index is its registration order.
    pub fn new(
        storage: Arc<dyn Storage>,
        pool: BlockPool,
        config: &CacheConfig,
        sync: Arc<Mutex<Sync>>,
    ) -> (Self, TrackUnit) {
        let (master, reader) = PlayCache::new(Arc::clone(&storage), pool.clone(), config);
        let (scratch, writer) = RecordCache::new(Arc::clone(&storage), config);

        let shared = {
            let mut sync = sync.lock();
            let index = sync.track_count();
            let shared = Arc::new(TrackShared::new(index, master.shared(), scratch.shared()));
            sync.add_track(Arc::clone(&shared));
            shared
        };
        let (event_tx, events) = crossbeam_channel::bounded(EVENT_CAPACITY);
        let index = shared.index();

        let unit = TrackUnit::new(
            Arc::clone(&shared),
            reader,
            writer,
            pool,
            event_tx,
            config.silence_threshold,
        );
        let track = Self {
            index,
            active: false,
            base: None,
            master_is_b: false,
            master,
            scratch,
            shared,
            sync,
            storage,
            events,
            state_changed: Instant::now(),
        };
        (track, unit)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn shared(&self) -> &Arc<TrackShared> {
        &self.shared
    }

    pub fn state(&self) -> TrackState {
        self.shared.state()
    }

    /// Whether a tap should resume this track.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn pass_through(&self) -> bool {
        self.shared.pass_through()
    }

    pub fn set_pass_through(&mut self, enabled: bool) {
        self.shared.set_pass_through(enabled);
    }

    pub fn since_state_change(&self) -> Duration {
        self.state_changed.elapsed()
    }

    pub fn base_path(&self) -> Option<&Path> {
        self.base.as_deref()
    }

    pub fn master_path(&self) -> Option<&Path> {
        self.master.path()
    }

    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.path()
    }

    pub fn master_blocks(&self) -> usize {
        self.shared.master_blocks()
    }

    pub fn play_blocks(&self) -> usize {
        self.shared.play_blocks()
    }

    pub fn playing_block(&self) -> usize {
        self.shared.playing_block()
    }

    pub fn recording_block(&self) -> usize {
        self.shared.recording_block()
    }

    /// Silent cycles left before playback resumes.
    pub fn preroll(&self) -> usize {
        self.master.preroll()
    }

    /// Restart the master from its first block after `preroll` silent cycles.
    pub fn set_preroll(&mut self, preroll: usize) {
        self.master.set_preroll(preroll);
    }

    /// Bind the track to `<base>.A` / `<base>.B`.
    ///
    /// Abandons any take in progress and pauses the track. The master is
    /// whichever file exists, preferring `B`.
    pub fn set_path(&mut self, base: impl Into<PathBuf>) -> Result<()> {
        let base = base.into();
        if self.base.as_ref() == Some(&base) {
            return Ok(());
        }

        let old = self.shared.state();
        self.shared.set_state(TrackState::Paused);
        if old.is_recording() {
            self.sync.lock().cancel_recording(self.index);
        }
        if self.scratch.is_open() {
            self.scratch.remove_file()?;
        }

        let a = suffixed(&base, ".A");
        let b = suffixed(&base, ".B");
        self.master_is_b = self.storage.exists(&b);
        let (master, scratch) = if self.master_is_b { (b, a) } else { (a, b) };
        self.master.set_path(Some(master));
        self.scratch.set_path(Some(scratch));
        self.base = Some(base);
        self.active = false;
        self.state_changed = Instant::now();
        self.drain_events();

        if self.master.open()? {
            self.master.fill_buffer()?;
        }
        debug!(
            track = self.index,
            master = ?self.master.path(),
            blocks = self.master.blocks(),
            "bound track"
        );
        Ok(())
    }

    /// Move to `state`.
    ///
    /// Leaving `MaybeRecording` discards the take; leaving `Recording`
    /// commits it as the new master.
    pub fn set_state(&mut self, state: TrackState) -> Result<()> {
        let old = self.shared.state();
        if state == old {
            return Ok(());
        }

        if state.is_recording() && !old.is_recording() {
            self.scratch.reset();
            self.scratch.open()?;
            self.master.fill_buffer()?;
        }
        self.shared.set_state(state);
        self.state_changed = Instant::now();
        debug!(track = self.index, ?old, new = ?state, "state change");

        if !state.is_recording() {
            match old {
                TrackState::MaybeRecording => self.cancel_take()?,
                TrackState::Recording => self.commit_take()?,
                _ => {}
            }
        }

        if self.master.open()? {
            self.master.fill_buffer()?;
        }
        Ok(())
    }

    fn cancel_take(&mut self) -> Result<()> {
        self.sync.lock().cancel_recording(self.index);
        self.scratch.remove_file()?;
        info!(track = self.index, "take discarded");
        Ok(())
    }

    fn commit_take(&mut self) -> Result<()> {
        self.scratch.flush()?;
        let blocks = self.scratch.blocks();
        if blocks == 0 {
            return self.cancel_take();
        }
        let dropped = self.scratch.dropped();

        let old_master = self.master.path().map(Path::to_path_buf);
        let new_master = self.scratch.path().map(Path::to_path_buf);
        self.master_is_b = !self.master_is_b;
        self.scratch.set_path(old_master.clone());
        self.master.set_path(new_master);
        if let Some(old) = old_master.filter(|p| self.storage.exists(p)) {
            self.storage.remove(&old)?;
        }

        let preroll = {
            let mut sync = self.sync.lock();
            sync.commit_recording(self.index);
            self.master.open()?;
            sync.initial_preroll(self.index)
        };
        self.master.set_preroll(preroll);
        info!(track = self.index, blocks, dropped, preroll, "take committed");
        Ok(())
    }

    /// Pause and delete both files, forgetting the track's sync points.
    pub fn erase(&mut self) -> Result<()> {
        self.set_state(TrackState::Paused)?;
        let Some(base) = self.base.clone() else {
            return Ok(());
        };

        self.master.set_path(None);
        self.scratch.set_path(None);
        let a = suffixed(&base, ".A");
        let b = suffixed(&base, ".B");
        for path in [&a, &b] {
            if self.storage.exists(path) {
                self.storage.remove(path)?;
            }
        }
        self.master_is_b = false;
        self.master.set_path(Some(a));
        self.scratch.set_path(Some(b));
        self.active = false;

        self.sync.lock().track_erased(self.index);
        info!(track = self.index, "erased");
        Ok(())
    }

    /// Background housekeeping: react to the audio half's notifications,
    /// refill the play ring and drain the record ring.
    pub fn update_caches(&mut self) -> Result<()> {
        while let Ok(event) = self.events.try_recv() {
            match event {
                TrackEvent::LoopStarted => {
                    if !self.master.is_open() {
                        continue;
                    }
                    let elapsed = self.master.position().saturating_sub(1);
                    let length = self.sync.lock().track_starting(self.index, elapsed);
                    if length != self.master.play_blocks() {
                        debug!(track = self.index, length, "loop length adjusted");
                    }
                    self.master.set_play_blocks(length);
                }
                TrackEvent::RecordingStarted => {
                    if !self.shared.is_recording() {
                        continue;
                    }
                    let elapsed = self.scratch.blocks().saturating_sub(1);
                    self.sync.lock().track_recording(self.index, elapsed);
                }
            }
        }

        let drops = self.scratch.take_new_drops();
        if drops > 0 {
            warn!(track = self.index, drops, "record buffer overflow");
        }

        if self.master.is_open() {
            self.master.fill_buffer()?;
        }
        if self.shared.is_recording() && self.scratch.is_open() {
            self.scratch.empty_buffer()?;
        }
        Ok(())
    }

    fn drain_events(&mut self) {
        while self.events.try_recv().is_ok() {}
    }
}

fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use looper_core::{AudioBlock, BlockSink, MemoryStorage, BLOCK_BYTES};

    struct Collect(Vec<i16>);

    impl BlockSink for Collect {
        fn transmit(&mut self, _channel: usize, block: &AudioBlock) {
            self.0.push(block.samples()[64]);
        }
    }

    fn config() -> CacheConfig {
        CacheConfig {
            fade_samples: 16,
            ..CacheConfig::default()
        }
    }

    fn setup() -> (MemoryStorage, Track, TrackUnit, BlockPool) {
        let mem = MemoryStorage::new();
        let storage: Arc<dyn Storage> = Arc::new(mem.clone());
        let pool = BlockPool::new(256);
        let sync = Arc::new(Mutex::new(Sync::new(Vec::new(), Arc::clone(&storage))));
        let (track, unit) = Track::new(storage, pool.clone(), &config(), sync);
        (mem, track, unit, pool)
    }

    fn tone(pool: &BlockPool, value: i16) -> AudioBlock {
        let mut block = pool.allocate().unwrap();
        block.samples_mut().fill(value);
        block
    }

    fn cycles(track: &mut Track, unit: &mut TrackUnit, input: &AudioBlock, n: usize) {
        let mut sink = Collect(Vec::new());
        for _ in 0..n {
            unit.update(Some(input), &mut sink);
            track.update_caches().unwrap();
        }
    }

    #[test]
    fn test_master_prefers_b() {
        let (mem, mut track, _unit, _pool) = setup();
        mem.insert("00/1.B", vec![0; BLOCK_BYTES * 3]);
        track.set_path("00/1").unwrap();
        assert_eq!(track.master_path(), Some(Path::new("00/1.B")));
        assert_eq!(track.scratch_path(), Some(Path::new("00/1.A")));
        assert_eq!(track.master_blocks(), 3);
    }

    #[test]
    fn test_record_and_commit() {
        let (mem, mut track, mut unit, pool) = setup();
        mem.create_dir_all(Path::new("00")).unwrap();
        track.set_path("00/0").unwrap();
        let input = tone(&pool, 1000);

        track.set_state(TrackState::MaybeRecording).unwrap();
        cycles(&mut track, &mut unit, &input, 3);
        track.set_state(TrackState::Recording).unwrap();
        cycles(&mut track, &mut unit, &input, 7);
        assert_eq!(track.recording_block(), 10);
        track.set_state(TrackState::Playing).unwrap();

        assert_eq!(track.master_path(), Some(Path::new("00/0.B")));
        assert_eq!(track.master_blocks(), 10);
        assert_eq!(mem.contents(Path::new("00/0.B")).unwrap().len(), 10 * BLOCK_BYTES);
        assert!(!mem.exists(Path::new("00/0.A")));
    }

    #[test]
    fn test_maybe_recording_is_discarded() {
        let (mem, mut track, mut unit, pool) = setup();
        mem.create_dir_all(Path::new("00")).unwrap();
        track.set_path("00/0").unwrap();
        let input = tone(&pool, 1000);

        track.set_state(TrackState::MaybeRecording).unwrap();
        cycles(&mut track, &mut unit, &input, 4);
        track.set_state(TrackState::Paused).unwrap();

        assert_eq!(track.master_blocks(), 0);
        assert!(!mem.exists(Path::new("00/0.A")));
        assert!(!mem.exists(Path::new("00/0.B")));
    }

    #[test]
    fn test_silence_before_first_sound_is_skipped() {
        let (mem, mut track, mut unit, pool) = setup();
        mem.create_dir_all(Path::new("00")).unwrap();
        track.set_path("00/0").unwrap();
        let quiet = tone(&pool, 10);
        let loud = tone(&pool, 5000);

        track.set_state(TrackState::Recording).unwrap();
        cycles(&mut track, &mut unit, &quiet, 5);
        assert_eq!(track.recording_block(), 0);
        cycles(&mut track, &mut unit, &loud, 2);
        cycles(&mut track, &mut unit, &quiet, 2);
        assert_eq!(track.recording_block(), 4);
    }

    #[test]
    fn test_empty_take_commits_nothing() {
        let (mem, mut track, _unit, _pool) = setup();
        mem.create_dir_all(Path::new("00")).unwrap();
        track.set_path("00/0").unwrap();
        track.set_state(TrackState::Recording).unwrap();
        track.set_state(TrackState::Playing).unwrap();
        assert_eq!(track.master_path(), Some(Path::new("00/0.A")));
        assert_eq!(track.master_blocks(), 0);
    }

    #[test]
    fn test_overdub_mixes_master() {
        let (mem, mut track, mut unit, pool) = setup();
        let mut bytes = vec![0u8; 4 * BLOCK_BYTES];
        for pair in bytes.chunks_exact_mut(2) {
            pair.copy_from_slice(&100i16.to_le_bytes());
        }
        mem.insert("00/0.A", bytes);
        track.set_path("00/0").unwrap();
        track.set_state(TrackState::Playing).unwrap();

        track.set_state(TrackState::Recording).unwrap();
        let input = tone(&pool, 1000);
        cycles(&mut track, &mut unit, &input, 2);
        track.set_state(TrackState::Playing).unwrap();

        let data = mem.contents(Path::new("00/0.B")).unwrap();
        let mid = BLOCK_BYTES + 128;
        assert_eq!(i16::from_le_bytes([data[mid], data[mid + 1]]), 1100);
    }

    #[test]
    fn test_erase_removes_files() {
        let (mem, mut track, _unit, _pool) = setup();
        mem.insert("00/0.A", vec![0; BLOCK_BYTES * 2]);
        mem.insert("00/0.B", vec![0; BLOCK_BYTES * 2]);
        track.set_path("00/0").unwrap();
        track.set_state(TrackState::Playing).unwrap();

        track.erase().unwrap();
        assert_eq!(track.state(), TrackState::Paused);
        assert_eq!(track.master_blocks(), 0);
        assert!(!mem.exists(Path::new("00/0.A")));
        assert!(!mem.exists(Path::new("00/0.B")));
    }

    #[test]
    fn test_rebinding_abandons_take() {
        let (mem, mut track, mut unit, pool) = setup();
        mem.create_dir_all(Path::new("00")).unwrap();
        mem.create_dir_all(Path::new("01")).unwrap();
        track.set_path("00/0").unwrap();
        track.set_state(TrackState::Recording).unwrap();
        cycles(&mut track, &mut unit, &tone(&pool, 2000), 3);

        track.set_path("01/0").unwrap();
        assert_eq!(track.state(), TrackState::Paused);
        assert!(!mem.exists(Path::new("00/0.B")));
        assert!(!mem.exists(Path::new("00/0.A")));
    }
}
