//! Audio configuration.

use crate::block::BLOCK_SAMPLES;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the audio side of the looper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Fixed sample rate of every stored and streamed block.
    pub sample_rate: u32,
    /// Number of blocks preallocated in the shared block pool.
    pub pool_blocks: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            // record ring + play rings for four tracks + mixing headroom
            pool_blocks: 128,
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate < 8000 || self.sample_rate > 192_000 {
            return Err(Error::InvalidConfig(format!(
                "sample_rate {} out of range (8000-192000 Hz)",
                self.sample_rate
            )));
        }
        if self.pool_blocks == 0 {
            return Err(Error::InvalidConfig("pool_blocks must be non-zero".into()));
        }
        Ok(())
    }

    /// Number of blocks produced per second of audio.
    pub fn blocks_per_second(&self) -> f64 {
        self.sample_rate as f64 / BLOCK_SAMPLES as f64
    }

    /// Duration of one audio cycle.
    pub fn block_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.blocks_per_second())
    }
}
