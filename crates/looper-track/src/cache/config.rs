//! Cache configuration.

use crate::{Error, Result};
use looper_core::{BLOCK_BYTES, BLOCK_SAMPLES};
use serde::{Deserialize, Serialize};

/// Configuration for record/play ring sizes and chunked I/O.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Record ring capacity in blocks (default: 50, ~145ms @ 44.1kHz)
    pub record_buffer_blocks: usize,
    /// Play ring capacity in blocks (default: 8)
    pub play_buffer_blocks: usize,
    /// Storage read/write granularity in bytes (default: 512, one sector)
    pub chunk_bytes: usize,
    /// How far ahead of the file position a read may skip instead of seeking (default: 8)
    pub seek_window_blocks: usize,
    /// Length of the loop-edge fades in samples (default: 128)
    pub fade_samples: usize,
    /// Input below this peak does not start a take (default: 256, ~-42 dBFS)
    pub silence_threshold: u16,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            record_buffer_blocks: 50,
            play_buffer_blocks: 8,
            chunk_bytes: 512,
            seek_window_blocks: 8,
            fade_samples: BLOCK_SAMPLES,
            silence_threshold: 256,
        }
    }
}

impl CacheConfig {
    /// Blocks per storage chunk.
    pub fn blocks_per_chunk(&self) -> usize {
        (self.chunk_bytes / BLOCK_BYTES).max(1)
    }

    pub fn with_record_buffer_blocks(mut self, blocks: usize) -> Self {
        self.record_buffer_blocks = blocks;
        self
    }

    pub fn with_play_buffer_blocks(mut self, blocks: usize) -> Self {
        self.play_buffer_blocks = blocks;
        self
    }

    pub fn with_silence_threshold(mut self, threshold: u16) -> Self {
        self.silence_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_bytes == 0 || self.chunk_bytes % BLOCK_BYTES != 0 {
            return Err(Error::Core(looper_core::Error::InvalidConfig(format!(
                "chunk_bytes {} is not a whole number of {}-byte blocks",
                self.chunk_bytes, BLOCK_BYTES
            ))));
        }
        let chunk = self.blocks_per_chunk();
        if self.record_buffer_blocks < chunk {
            return Err(Error::Core(looper_core::Error::InvalidConfig(format!(
                "record_buffer_blocks {} is smaller than one chunk ({chunk} blocks)",
                self.record_buffer_blocks
            ))));
        }
        if self.play_buffer_blocks < chunk {
            return Err(Error::Core(looper_core::Error::InvalidConfig(format!(
                "play_buffer_blocks {} is smaller than one chunk ({chunk} blocks)",
                self.play_buffer_blocks
            ))));
        }
        Ok(())
    }
}
