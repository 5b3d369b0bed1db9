//! Write-behind cache for the track being recorded.
//!
//! The audio cycle pushes blocks through a [`RecordWriter`]; the background
//! side drains them to storage in whole chunks via [`RecordCache`].

use super::config::CacheConfig;
use super::file::FileCache;
use crate::Result;
use looper_core::ring::{self, RingConsumer, RingProducer};
use looper_core::{AudioBlock, OpenMode, Storage, BLOCK_BYTES};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counters shared between the two halves of a record cache.
#[derive(Debug, Default)]
pub struct RecordShared {
    blocks: AtomicUsize,
    dropped: AtomicUsize,
}

impl RecordShared {
    /// Blocks accepted into the current take.
    #[inline]
    pub fn blocks(&self) -> usize {
        self.blocks.load(Ordering::Acquire)
    }

    /// Blocks lost to overflow in the current take.
    #[inline]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.blocks.store(0, Ordering::Release);
        self.dropped.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
impl RecordShared {
    pub(crate) fn with_blocks(blocks: usize) -> Self {
        let shared = Self::default();
        shared.blocks.store(blocks, Ordering::Relaxed);
        shared
    }
}

/// Real-time half: enqueues recorded blocks.
pub struct RecordWriter {
    producer: RingProducer<AudioBlock>,
    shared: Arc<RecordShared>,
}

impl RecordWriter {
    /// Queue a block for writing.
    ///
    /// On overflow the block is released, the drop counter is incremented and
    /// `false` is returned. Never blocks.
    #[inline]
    pub fn write_block(&mut self, block: AudioBlock) -> bool {
        match self.producer.try_push(block) {
            Ok(()) => {
                self.shared.blocks.fetch_add(1, Ordering::AcqRel);
                true
            }
            Err(_block) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    #[inline]
    pub fn blocks(&self) -> usize {
        self.shared.blocks()
    }

    pub fn queued(&self) -> usize {
        self.producer.len()
    }

    pub fn capacity(&self) -> usize {
        self.producer.capacity()
    }
}

/// Background half: owns the scratch file and drains the ring into it.
pub struct RecordCache {
    file: FileCache,
    consumer: RingConsumer<AudioBlock>,
    shared: Arc<RecordShared>,
    chunk: Vec<u8>,
    blocks_per_chunk: usize,
    reported_drops: usize,
}

impl RecordCache {
    pub fn new(storage: Arc<dyn Storage>, config: &CacheConfig) -> (Self, RecordWriter) {
        let (producer, consumer) = ring::bounded(config.record_buffer_blocks);
        let shared = Arc::new(RecordShared::default());
        let blocks_per_chunk = config.blocks_per_chunk();

        let cache = Self {
            file: FileCache::new(storage),
            consumer,
            shared: Arc::clone(&shared),
            chunk: vec![0; blocks_per_chunk * BLOCK_BYTES],
            blocks_per_chunk,
            reported_drops: 0,
        };
        (cache, RecordWriter { producer, shared })
    }

    pub fn shared(&self) -> Arc<RecordShared> {
        Arc::clone(&self.shared)
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.path()
    }

    pub fn is_open(&self) -> bool {
        self.file.is_open()
    }

    /// Drop buffered state and rebind. No I/O.
    pub fn set_path(&mut self, path: Option<PathBuf>) {
        self.reset();
        self.file.set_path(path);
    }

    /// Discard queued blocks and zero the counters for a new take.
    pub fn reset(&mut self) {
        self.consumer.clear();
        self.shared.reset();
        self.reported_drops = 0;
    }

    /// Create (truncating) the scratch file if it is not open yet.
    pub fn open(&mut self) -> Result<()> {
        self.file.open(OpenMode::WriteTruncate)?;
        Ok(())
    }

    /// Close the handle and delete the scratch file.
    pub fn remove_file(&mut self) -> Result<bool> {
        self.reset();
        self.file.remove_file()
    }

    /// Recording position: blocks accepted so far.
    pub fn blocks(&self) -> usize {
        self.shared.blocks()
    }

    pub fn dropped(&self) -> usize {
        self.shared.dropped()
    }

    pub fn queued(&self) -> usize {
        self.consumer.len()
    }

    /// Drops that happened since the last call.
    pub fn take_new_drops(&mut self) -> usize {
        let dropped = self.shared.dropped();
        let new = dropped.saturating_sub(self.reported_drops);
        self.reported_drops = dropped;
        new
    }

    /// Write whole chunks while at least one chunk is queued.
    ///
    /// Returns the number of blocks written.
    pub fn empty_buffer(&mut self) -> Result<usize> {
        let mut written = 0;
        while self.consumer.len() >= self.blocks_per_chunk {
            written += self.write_chunk()?;
        }
        Ok(written)
    }

    /// Drain every queued block, including a partial final chunk, and flush
    /// the handle. Blocks the caller until storage has accepted the data.
    pub fn flush(&mut self) -> Result<usize> {
        let mut written = 0;
        while !self.consumer.is_empty() {
            let n = self.write_chunk()?;
            if n == 0 {
                break;
            }
            written += n;
        }
        if let Some(file) = self.file.file_mut() {
            file.flush()?;
        }
        Ok(written)
    }

    fn write_chunk(&mut self) -> Result<usize> {
        if self.consumer.is_empty() {
            return Ok(0);
        }
        let file = self.file.open(OpenMode::WriteTruncate)?;

        let mut count = 0;
        while count < self.blocks_per_chunk {
            let Some(block) = self.consumer.try_pop() else {
                break;
            };
            let start = count * BLOCK_BYTES;
            block.write_le(&mut self.chunk[start..start + BLOCK_BYTES]);
            count += 1;
        }
        file.write_all(&self.chunk[..count * BLOCK_BYTES])?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use looper_core::{BlockPool, MemoryStorage};

    fn block(pool: &BlockPool, value: i16) -> AudioBlock {
        let mut b = pool.allocate().unwrap();
        b.samples_mut().fill(value);
        b
    }

    fn setup(config: CacheConfig) -> (MemoryStorage, RecordCache, RecordWriter) {
        let storage = MemoryStorage::new();
        let (mut cache, writer) = RecordCache::new(Arc::new(storage.clone()), &config);
        cache.set_path(Some("00/0.A".into()));
        (storage, cache, writer)
    }

    #[test]
    fn test_empty_buffer_writes_whole_chunks() {
        let (storage, mut cache, mut writer) = setup(CacheConfig::default());
        let pool = BlockPool::new(8);
        cache.open().unwrap();

        for i in 0..3 {
            assert!(writer.write_block(block(&pool, i)));
        }
        assert_eq!(cache.empty_buffer().unwrap(), 2);
        assert_eq!(cache.queued(), 1);
        assert_eq!(
            storage.contents(Path::new("00/0.A")).unwrap().len(),
            2 * BLOCK_BYTES
        );

        assert_eq!(cache.flush().unwrap(), 1);
        assert_eq!(
            storage.contents(Path::new("00/0.A")).unwrap().len(),
            3 * BLOCK_BYTES
        );
        assert_eq!(cache.blocks(), 3);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_overflow_drops_without_growth_or_leak() {
        let config = CacheConfig::default().with_record_buffer_blocks(4);
        let (_storage, mut cache, mut writer) = setup(config);
        let pool = BlockPool::new(8);

        for _ in 0..4 {
            assert!(writer.write_block(block(&pool, 1)));
        }
        assert!(!writer.write_block(block(&pool, 1)));
        assert_eq!(writer.queued(), 4);
        assert_eq!(writer.capacity(), 4);
        assert_eq!(pool.in_use(), 4);
        assert_eq!(cache.blocks(), 4);
        assert_eq!(cache.dropped(), 1);
        assert_eq!(cache.take_new_drops(), 1);
        assert_eq!(cache.take_new_drops(), 0);
    }

    #[test]
    fn test_reset_releases_queued_blocks() {
        let (_storage, mut cache, mut writer) = setup(CacheConfig::default());
        let pool = BlockPool::new(8);
        for _ in 0..5 {
            writer.write_block(block(&pool, 1));
        }
        cache.reset();
        assert_eq!(pool.in_use(), 0);
        assert_eq!(cache.blocks(), 0);
        assert_eq!(cache.queued(), 0);
    }

    #[test]
    fn test_sample_layout_on_storage() {
        let (storage, mut cache, mut writer) = setup(CacheConfig::default());
        let pool = BlockPool::new(2);
        writer.write_block(block(&pool, -2));
        cache.flush().unwrap();

        let bytes = storage.contents(Path::new("00/0.A")).unwrap();
        assert_eq!(bytes.len(), BLOCK_BYTES);
        assert_eq!(&bytes[..2], &(-2i16).to_le_bytes());
    }
}
