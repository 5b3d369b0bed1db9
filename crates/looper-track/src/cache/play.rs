//! Read-ahead cache for a track's master file.
//!
//! [`PlayCache`] runs on the background side: it reads chunks of the master
//! file into a ring of slots, each tagged with the loop sequence number it
//! holds. [`PlayReader`] runs in the audio cycle and pops exactly the slot it
//! needs, discarding anything stale.
//!
//! All resets (new file, preroll) are published as a new *generation*: the
//! reader restarts at sequence 0 when it sees one and drops every slot that
//! was tagged with an older generation. That way the background side never
//! has to touch the consumer half of the ring.

use super::config::CacheConfig;
use super::file::FileCache;
use crate::Result;
use looper_core::ring::{self, RingConsumer, RingProducer};
use looper_core::{AudioBlock, BlockPool, OpenMode, Storage, BLOCK_BYTES};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Playback status shared between the background and real-time halves.
#[derive(Debug, Default)]
pub struct PlayShared {
    open: AtomicBool,
    blocks: AtomicUsize,
    play_blocks: AtomicUsize,
    /// Next sequence number the reader will play.
    position: AtomicUsize,
    preroll_remaining: AtomicUsize,
    generation: AtomicU64,
    pending_preroll: AtomicUsize,
    adopted_generation: AtomicU64,
}

impl PlayShared {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Total blocks in the master file.
    #[inline]
    pub fn blocks(&self) -> usize {
        self.blocks.load(Ordering::Acquire)
    }

    /// Effective loop length.
    #[inline]
    pub fn play_blocks(&self) -> usize {
        self.play_blocks.load(Ordering::Acquire)
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Acquire)
    }

    #[inline]
    pub fn preroll(&self) -> usize {
        self.preroll_remaining.load(Ordering::Acquire)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn adopted_generation(&self) -> u64 {
        self.adopted_generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
impl PlayShared {
    /// Status of a loaded master without a cache behind it.
    pub(crate) fn loaded(blocks: usize, play_blocks: usize, position: usize) -> Self {
        let shared = Self::default();
        shared.open.store(true, Ordering::Relaxed);
        shared.blocks.store(blocks, Ordering::Relaxed);
        shared.play_blocks.store(play_blocks, Ordering::Relaxed);
        shared.position.store(position, Ordering::Relaxed);
        shared
    }
}

struct PlaySlot {
    generation: u64,
    seq: usize,
    /// Loop length the slot was read for.
    loop_len: usize,
    /// Slot carries the end-of-loop fade.
    faded_out: bool,
    block: AudioBlock,
}

/// Result of one real-time read.
#[derive(Debug, Default)]
pub struct PlayedBlock {
    /// Sequence number consumed this cycle; `None` during preroll or when
    /// nothing is loaded.
    pub seq: Option<usize>,
    /// Audio for that sequence number; `None` on underrun.
    pub block: Option<AudioBlock>,
}

impl PlayedBlock {
    pub fn is_loop_start(&self) -> bool {
        self.seq == Some(0)
    }
}

/// Real-time half of a play cache.
pub struct PlayReader {
    consumer: RingConsumer<PlaySlot>,
    shared: Arc<PlayShared>,
    generation: u64,
    seq: usize,
    preroll: usize,
    held: Option<PlaySlot>,
    lookahead: usize,
    fade_samples: usize,
}

impl PlayReader {
    /// Adopt a newly published generation, if any.
    ///
    /// Called every cycle whether or not the track is playing, so stale slots
    /// never pin the ring while the track is paused.
    #[inline]
    pub fn service(&mut self) {
        let generation = self.shared.generation();
        if generation == self.generation {
            return;
        }
        self.generation = generation;
        self.seq = 0;
        self.preroll = self.shared.pending_preroll.load(Ordering::Acquire);

        if self
            .held
            .as_ref()
            .is_some_and(|slot| slot.generation < generation)
        {
            self.held = None;
        }
        if self.held.is_none() {
            while let Some(slot) = self.consumer.try_pop() {
                if slot.generation >= generation {
                    self.held = Some(slot);
                    break;
                }
            }
        }

        self.shared.position.store(0, Ordering::Release);
        self.shared
            .preroll_remaining
            .store(self.preroll, Ordering::Release);
        self.shared
            .adopted_generation
            .store(generation, Ordering::Release);
    }

    /// Consume one cycle of playback.
    #[inline]
    pub fn read_block(&mut self) -> PlayedBlock {
        self.service();
        if !self.shared.is_open() {
            return PlayedBlock::default();
        }
        let play_blocks = self.shared.play_blocks();
        if play_blocks == 0 {
            return PlayedBlock::default();
        }

        if self.preroll > 0 {
            self.preroll -= 1;
            self.shared
                .preroll_remaining
                .store(self.preroll, Ordering::Release);
            return PlayedBlock::default();
        }

        // the loop may have been shortened under us
        if self.seq >= play_blocks {
            self.seq = 0;
        }
        let seq = self.seq;
        let block = self.next_block(seq, play_blocks);

        let next = seq + 1;
        self.seq = if next >= play_blocks { 0 } else { next };
        self.shared.position.store(self.seq, Ordering::Release);

        PlayedBlock {
            seq: Some(seq),
            block,
        }
    }

    fn next_block(&mut self, needed: usize, play_blocks: usize) -> Option<AudioBlock> {
        loop {
            let slot = match self.held.take() {
                Some(slot) => slot,
                None => self.consumer.try_pop()?,
            };
            if slot.generation > self.generation {
                // published after we looked; adopted next cycle
                self.held = Some(slot);
                return None;
            }
            // a slot queued after wrapping a shorter loop belongs to a pass
            // that no longer happens
            let stale = slot.generation < self.generation
                || slot.seq >= play_blocks
                || (slot.faded_out && slot.loop_len != play_blocks)
                || (slot.loop_len < play_blocks && slot.seq < needed);
            if stale {
                continue;
            }
            if slot.seq == needed {
                let mut block = slot.block;
                if needed + 1 == play_blocks && !slot.faded_out {
                    block.apply_ramp(self.fade_samples, 1.0, 0.0, true);
                }
                return Some(block);
            }
            let ahead = (slot.seq + play_blocks - needed) % play_blocks;
            if ahead <= self.lookahead {
                self.held = Some(slot);
                return None;
            }
        }
    }

    pub fn shared(&self) -> &Arc<PlayShared> {
        &self.shared
    }
}

/// Background half of a play cache.
pub struct PlayCache {
    file: FileCache,
    producer: RingProducer<PlaySlot>,
    shared: Arc<PlayShared>,
    pool: BlockPool,
    chunk: Vec<u8>,
    blocks_per_chunk: usize,
    seek_window: usize,
    fade_samples: usize,
    generation: u64,
    /// Last sequence number pushed in the current generation.
    pushed: Option<usize>,
    /// Block index under the file cursor, `None` when unknown.
    file_block: Option<usize>,
}

impl PlayCache {
    pub fn new(
        storage: Arc<dyn Storage>,
        pool: BlockPool,
        config: &CacheConfig,
    ) -> (Self, PlayReader) {
        let (producer, consumer) = ring::bounded(config.play_buffer_blocks);
        let shared = Arc::new(PlayShared::default());
        let blocks_per_chunk = config.blocks_per_chunk();

        let reader = PlayReader {
            consumer,
            shared: Arc::clone(&shared),
            generation: 0,
            seq: 0,
            preroll: 0,
            held: None,
            lookahead: config.play_buffer_blocks + 1,
            fade_samples: config.fade_samples,
        };
        let cache = Self {
            file: FileCache::new(storage),
            producer,
            shared,
            pool,
            chunk: vec![0; blocks_per_chunk * BLOCK_BYTES],
            blocks_per_chunk,
            seek_window: config.seek_window_blocks,
            fade_samples: config.fade_samples,
            generation: 0,
            pushed: None,
            file_block: None,
        };
        (cache, reader)
    }

    pub fn shared(&self) -> Arc<PlayShared> {
        Arc::clone(&self.shared)
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.path()
    }

    pub fn is_open(&self) -> bool {
        self.file.is_open()
    }

    /// Close, forget the loaded file and rebind. No I/O.
    pub fn set_path(&mut self, path: Option<PathBuf>) {
        self.shared.open.store(false, Ordering::Release);
        self.shared.blocks.store(0, Ordering::Release);
        self.shared.play_blocks.store(0, Ordering::Release);
        self.shared.pending_preroll.store(0, Ordering::Release);
        self.file_block = None;
        self.publish_generation();
        self.file.set_path(path);
    }

    /// Open the master file if it is not open yet.
    ///
    /// Returns `Ok(false)` when there is nothing to play. Files shorter than
    /// one block are deleted.
    pub fn open(&mut self) -> Result<bool> {
        if self.file.is_open() {
            return Ok(true);
        }
        if !self.file.exists() {
            return Ok(false);
        }
        let size = self.file.open(OpenMode::Read)?.size()?;
        if size < BLOCK_BYTES as u64 {
            warn!(path = ?self.file.path(), size, "removing undersized audio file");
            self.file.remove_file()?;
            return Ok(false);
        }

        let blocks = (size / BLOCK_BYTES as u64) as usize;
        self.shared.blocks.store(blocks, Ordering::Release);
        self.shared.play_blocks.store(blocks, Ordering::Release);
        self.shared.pending_preroll.store(0, Ordering::Release);
        self.file_block = Some(0);
        self.publish_generation();
        self.shared.open.store(true, Ordering::Release);
        debug!(path = ?self.file.path(), blocks, "opened master");
        Ok(true)
    }

    /// Delete the master file and forget it.
    pub fn remove_file(&mut self) -> Result<bool> {
        let path = self.file.path().map(Path::to_path_buf);
        self.set_path(path);
        self.file.remove_file()
    }

    pub fn blocks(&self) -> usize {
        self.shared.blocks()
    }

    pub fn play_blocks(&self) -> usize {
        self.shared.play_blocks()
    }

    /// Set the loop length, clamped to the file length.
    ///
    /// Queued slots stay valid where they still fit the new loop; the reader
    /// drops the rest and read-ahead continues from the first dropped one.
    pub fn set_play_blocks(&mut self, play_blocks: usize) {
        let blocks = self.shared.blocks();
        let clamped = play_blocks.clamp(blocks.min(1), blocks);
        let previous = self.shared.play_blocks.swap(clamped, Ordering::AcqRel);
        if clamped == previous {
            return;
        }
        let queued = self.producer.len();
        if queued == 0 {
            // follow the reader
            self.pushed = None;
        } else if clamped > previous {
            self.resume_at_old_end(previous, queued);
        }
    }

    /// After lengthening: if the old end slot is still queued, everything
    /// from it onward gets dropped, so read it again unfaded.
    fn resume_at_old_end(&mut self, previous: usize, queued: usize) {
        let (Some(last), Some(old_end)) = (self.pushed, previous.checked_sub(1)) else {
            return;
        };
        let since_end = (last + previous - old_end) % previous;
        if since_end < queued {
            self.pushed = old_end.checked_sub(1);
        }
    }

    pub fn position(&self) -> usize {
        self.shared.position()
    }

    pub fn preroll(&self) -> usize {
        self.shared.preroll()
    }

    /// Restart playback from sequence 0 after `preroll` silent cycles.
    pub fn set_preroll(&mut self, preroll: usize) {
        self.shared.pending_preroll.store(preroll, Ordering::Release);
        self.publish_generation();
    }

    fn publish_generation(&mut self) {
        self.generation += 1;
        self.pushed = None;
        self.shared
            .generation
            .store(self.generation, Ordering::Release);
    }

    /// Read ahead until the ring is full. Returns blocks queued.
    pub fn fill_buffer(&mut self) -> Result<usize> {
        let mut total = 0;
        loop {
            let n = self.read_chunk()?;
            if n == 0 {
                return Ok(total);
            }
            total += n;
        }
    }

    /// Queue at most one chunk of blocks. Returns blocks queued.
    pub fn read_chunk(&mut self) -> Result<usize> {
        if !self.file.is_open() {
            return Ok(0);
        }
        let play_blocks = self.shared.play_blocks();
        let vacant = self.producer.vacant();
        if play_blocks == 0 || vacant == 0 {
            return Ok(0);
        }

        let next = self.next_seq(play_blocks);
        let count = self
            .blocks_per_chunk
            .min(play_blocks - next)
            .min(vacant);
        self.position_file(next)?;

        let Some(file) = self.file.file_mut() else {
            return Ok(0);
        };
        let bytes = read_full(file, &mut self.chunk[..count * BLOCK_BYTES])?;
        let whole = bytes / BLOCK_BYTES;
        self.file_block = (bytes % BLOCK_BYTES == 0).then_some(next + whole);

        let mut queued = 0;
        for i in 0..whole {
            let Some(mut block) = self.pool.allocate() else {
                // cursor is past blocks we could not queue
                self.file_block = None;
                break;
            };
            let seq = next + i;
            block.read_le(&self.chunk[i * BLOCK_BYTES..(i + 1) * BLOCK_BYTES]);
            if seq == 0 {
                block.apply_ramp(self.fade_samples, 0.0, 1.0, false);
            }
            let faded_out = seq + 1 == play_blocks;
            if faded_out {
                block.apply_ramp(self.fade_samples, 1.0, 0.0, true);
            }

            let slot = PlaySlot {
                generation: self.generation,
                seq,
                loop_len: play_blocks,
                faded_out,
                block,
            };
            if self.producer.try_push(slot).is_err() {
                self.file_block = None;
                break;
            }
            self.pushed = Some(seq);
            queued += 1;
        }
        Ok(queued)
    }

    /// Sequence number the next read-ahead should start at.
    fn next_seq(&self, play_blocks: usize) -> usize {
        let adopted = self.shared.adopted_generation() == self.generation;
        let position = self.shared.position();
        let base = match self.pushed {
            Some(last) if last + 1 < play_blocks => last + 1,
            Some(_) => 0,
            None if adopted && position < play_blocks => position,
            None => 0,
        };
        // resynchronise after an underrun left us behind the reader
        if self.producer.is_empty() && adopted && position < play_blocks {
            let lag = (position + play_blocks - base) % play_blocks;
            if lag > 0 && lag <= play_blocks / 2 {
                return position;
            }
        }
        base
    }

    /// Seek only when `next` is behind the cursor or beyond the lookahead
    /// window; otherwise read forward to it.
    fn position_file(&mut self, next: usize) -> Result<()> {
        let Some(file) = self.file.file_mut() else {
            return Ok(());
        };
        match self.file_block {
            Some(at) if next >= at && next <= at + self.seek_window => {
                let mut skip = (next - at) * BLOCK_BYTES;
                while skip > 0 {
                    let len = skip.min(self.chunk.len());
                    let n = read_full(file, &mut self.chunk[..len])?;
                    if n == 0 {
                        break;
                    }
                    skip -= n;
                }
                if skip > 0 {
                    file.seek(SeekFrom::Start((next * BLOCK_BYTES) as u64))?;
                }
            }
            _ => {
                file.seek(SeekFrom::Start((next * BLOCK_BYTES) as u64))?;
            }
        }
        self.file_block = Some(next);
        Ok(())
    }
}

fn read_full(file: &mut dyn looper_core::StorageFile, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
