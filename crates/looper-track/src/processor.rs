//! Audio-callback side of the looper.

use crate::track::TrackUnit;
use looper_core::{AudioBlock, BlockPool, Mixer, PeakMeter, BLOCK_SAMPLES};
use std::sync::Arc;

/// Runs every track unit once per audio cycle and mixes their output.
///
/// Lives on the audio thread. Nothing here blocks, locks or allocates.
pub struct LooperProcessor {
    units: Vec<TrackUnit>,
    mixer: Mixer,
    pool: BlockPool,
    input_meter: Arc<PeakMeter>,
}

impl LooperProcessor {
    pub(crate) fn new(units: Vec<TrackUnit>, pool: BlockPool, input_meter: Arc<PeakMeter>) -> Self {
        let mixer = Mixer::new(pool.clone(), units.len());
        Self {
            units,
            mixer,
            pool,
            input_meter,
        }
    }

    pub fn track_count(&self) -> usize {
        self.units.len()
    }

    pub fn pool(&self) -> &BlockPool {
        &self.pool
    }

    pub fn input_meter(&self) -> Arc<PeakMeter> {
        Arc::clone(&self.input_meter)
    }

    pub fn set_gain(&mut self, track: usize, gain: f32) {
        self.mixer.set_gain(track, gain);
    }

    pub fn gain(&self, track: usize) -> f32 {
        self.mixer.gain(track)
    }

    /// Process one block of input.
    ///
    /// Returns the mixed output, or `None` when the cycle produced silence.
    pub fn process(&mut self, input: Option<&AudioBlock>) -> Option<AudioBlock> {
        if let Some(input) = input {
            self.input_meter.record(input);
        }
        for unit in &mut self.units {
            unit.update(input, &mut self.mixer);
        }
        self.mixer.take()
    }

    /// Process one block of mono samples. `input` and
    /// `output` must each hold [`BLOCK_SAMPLES`] samples.
    pub fn process_samples(&mut self, input: &[i16], output: &mut [i16]) {
        let block = self.pool.allocate().map(|mut block| {
            let n = input.len().min(BLOCK_SAMPLES);
            block.samples_mut()[..n].copy_from_slice(&input[..n]);
            block
        });
        match self.process(block.as_ref()) {
            Some(mixed) => {
                let n = output.len().min(BLOCK_SAMPLES);
                output[..n].copy_from_slice(&mixed.samples()[..n]);
                output[n..].fill(0);
            }
            None => output.fill(0),
        }
    }
}
