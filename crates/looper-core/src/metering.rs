//! Lock-free input level metering.

use crate::block::AudioBlock;
use atomic_float::AtomicF32;
use std::sync::atomic::Ordering;

/// Peak level since the last read, normalised to 0.0..=1.0.
///
/// Written from the audio cycle, read and reset from the control side.
#[derive(Debug, Default)]
#[repr(align(64))]
pub struct PeakMeter {
    peak: AtomicF32,
}

impl PeakMeter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record(&self, block: &AudioBlock) {
        let level = block.peak() as f32 / 32768.0;
        self.peak.fetch_max(level, Ordering::AcqRel);
    }

    #[inline]
    pub fn get(&self) -> f32 {
        self.peak.load(Ordering::Acquire)
    }

    /// Return the held peak and start a new measurement window.
    pub fn read_and_reset(&self) -> f32 {
        self.peak.swap(0.0, Ordering::AcqRel)
    }
}

/// Linear amplitude to dBFS; silence maps to negative infinity.
pub fn to_dbfs(level: f32) -> f32 {
    if level <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * level.log10()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockPool;

    #[test]
    fn test_peak_holds_maximum() {
        let pool = BlockPool::new(2);
        let meter = PeakMeter::new();

        let mut loud = pool.allocate().unwrap();
        loud.samples_mut()[3] = 16384;
        let mut quiet = pool.allocate().unwrap();
        quiet.samples_mut()[3] = 100;

        meter.record(&loud);
        meter.record(&quiet);
        assert!((meter.get() - 0.5).abs() < 1e-6);

        assert!((meter.read_and_reset() - 0.5).abs() < 1e-6);
        assert_eq!(meter.get(), 0.0);
    }

    #[test]
    fn test_dbfs() {
        assert!((to_dbfs(1.0)).abs() < 1e-6);
        assert!((to_dbfs(0.5) + 6.0206).abs() < 1e-3);
        assert_eq!(to_dbfs(0.0), f32::NEG_INFINITY);
    }
}
