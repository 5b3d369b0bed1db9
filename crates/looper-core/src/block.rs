//! Fixed-size PCM blocks and the pool they are allocated from.
//!
//! Every block holds [`BLOCK_SAMPLES`] signed 16-bit samples. Blocks are
//! preallocated by a [`BlockPool`] so the audio cycle never touches the
//! allocator: `allocate()` pops a free buffer, and dropping the
//! [`AudioBlock`] hands the buffer back. Ownership moves with the block, so a
//! buffer is released exactly once, by whichever component holds it last.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Samples per block.
pub const BLOCK_SAMPLES: usize = 128;

/// Bytes per block on storage (little-endian `i16`).
pub const BLOCK_BYTES: usize = BLOCK_SAMPLES * std::mem::size_of::<i16>();

type Samples = Box<[i16; BLOCK_SAMPLES]>;

struct PoolShared {
    free_tx: Sender<Samples>,
    free_rx: Receiver<Samples>,
    capacity: usize,
    in_use: AtomicUsize,
}

/// Preallocated pool of audio blocks.
///
/// Cheap to clone; all clones share the same free list.
#[derive(Clone)]
pub struct BlockPool {
    shared: Arc<PoolShared>,
}

impl BlockPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (free_tx, free_rx) = bounded(capacity);
        for _ in 0..capacity {
            // the channel was sized for exactly this many buffers
            let _ = free_tx.try_send(Box::new([0i16; BLOCK_SAMPLES]));
        }
        Self {
            shared: Arc::new(PoolShared {
                free_tx,
                free_rx,
                capacity,
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Take a zeroed block from the pool.
    ///
    /// Returns `None` when every block is in use. Lock-free.
    #[inline]
    pub fn allocate(&self) -> Option<AudioBlock> {
        let mut data = self.shared.free_rx.try_recv().ok()?;
        data.fill(0);
        self.shared.in_use.fetch_add(1, Ordering::Relaxed);
        Some(AudioBlock {
            data: Some(data),
            pool: Arc::clone(&self.shared),
        })
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Blocks currently held outside the pool.
    pub fn in_use(&self) -> usize {
        self.shared.in_use.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> usize {
        self.shared.free_rx.len()
    }
}

impl fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// One block of signed 16-bit PCM owned by the holder.
pub struct AudioBlock {
    data: Option<Samples>,
    pool: Arc<PoolShared>,
}

impl AudioBlock {
    #[inline]
    pub fn samples(&self) -> &[i16; BLOCK_SAMPLES] {
        // `data` is only taken in Drop
        self.data.as_deref().unwrap_or(&SILENCE)
    }

    #[inline]
    pub fn samples_mut(&mut self) -> &mut [i16] {
        match self.data.as_deref_mut() {
            Some(data) => data,
            None => &mut [],
        }
    }

    /// Largest absolute sample value.
    #[inline]
    pub fn peak(&self) -> u16 {
        self.samples()
            .iter()
            .map(|s| s.unsigned_abs())
            .max()
            .unwrap_or(0)
    }

    #[inline]
    pub fn copy_from(&mut self, other: &AudioBlock) {
        self.samples_mut().copy_from_slice(other.samples());
    }

    /// Sample-wise saturating sum.
    #[inline]
    pub fn mix_from(&mut self, other: &AudioBlock) {
        for (dst, src) in self.samples_mut().iter_mut().zip(other.samples()) {
            *dst = dst.saturating_add(*src);
        }
    }

    /// Allocate a copy from the same pool.
    pub fn try_clone(&self) -> Option<AudioBlock> {
        let pool = BlockPool {
            shared: Arc::clone(&self.pool),
        };
        let mut copy = pool.allocate()?;
        copy.copy_from(self);
        Some(copy)
    }

    /// Serialize into `out`, which must hold at least [`BLOCK_BYTES`].
    pub fn write_le(&self, out: &mut [u8]) {
        for (chunk, sample) in out.chunks_exact_mut(2).zip(self.samples()) {
            chunk.copy_from_slice(&sample.to_le_bytes());
        }
    }

    /// Fill from little-endian bytes; missing bytes leave samples untouched.
    pub fn read_le(&mut self, bytes: &[u8]) {
        for (sample, chunk) in self.samples_mut().iter_mut().zip(bytes.chunks_exact(2)) {
            *sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        }
    }

    /// Scale samples linearly from `from` to `to` gain across the first
    /// `len` samples (or the last `len` samples when `at_end`).
    pub fn apply_ramp(&mut self, len: usize, from: f32, to: f32, at_end: bool) {
        let len = len.clamp(1, BLOCK_SAMPLES);
        let start = if at_end { BLOCK_SAMPLES - len } else { 0 };
        let samples = self.samples_mut();
        for i in 0..len {
            let t = i as f32 / len as f32;
            let gain = from + (to - from) * t;
            let s = &mut samples[start + i];
            *s = (*s as f32 * gain) as i16;
        }
    }
}

static SILENCE: [i16; BLOCK_SAMPLES] = [0; BLOCK_SAMPLES];

impl Drop for AudioBlock {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            let _ = self.pool.free_tx.try_send(data);
            self.pool.in_use.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

impl fmt::Debug for AudioBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioBlock")
            .field("peak", &self.peak())
            .finish()
    }
}
