//! Summing of per-track output blocks.

use crate::block::{AudioBlock, BlockPool};

/// Downstream consumer of blocks produced during one audio cycle.
pub trait BlockSink {
    /// Hand a block to `channel`. The block is only borrowed for the call.
    fn transmit(&mut self, channel: usize, block: &AudioBlock);
}

/// Saturating mixer with a gain per input channel.
///
/// Blocks transmitted during a cycle are accumulated into one output block
/// which [`Mixer::take`] hands out at the end of the cycle.
pub struct Mixer {
    pool: BlockPool,
    gains: Vec<f32>,
    out: Option<AudioBlock>,
}

impl Mixer {
    pub fn new(pool: BlockPool, channels: usize) -> Self {
        Self {
            pool,
            gains: vec![1.0; channels],
            out: None,
        }
    }

    pub fn channels(&self) -> usize {
        self.gains.len()
    }

    pub fn set_gain(&mut self, channel: usize, gain: f32) {
        if let Some(g) = self.gains.get_mut(channel) {
            *g = gain.max(0.0);
        }
    }

    pub fn gain(&self, channel: usize) -> f32 {
        self.gains.get(channel).copied().unwrap_or(0.0)
    }

    /// The mixed block for this cycle, or `None` if nothing was transmitted.
    pub fn take(&mut self) -> Option<AudioBlock> {
        self.out.take()
    }
}

impl BlockSink for Mixer {
    fn transmit(&mut self, channel: usize, block: &AudioBlock) {
        let Some(&gain) = self.gains.get(channel) else {
            return;
        };
        if self.out.is_none() {
            self.out = self.pool.allocate();
        }
        let Some(out) = self.out.as_mut() else {
            return;
        };

        if gain == 1.0 {
            out.mix_from(block);
            return;
        }
        for (dst, src) in out.samples_mut().iter_mut().zip(block.samples()) {
            let scaled = (*src as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32);
            *dst = dst.saturating_add(scaled as i16);
        }
    }
}
