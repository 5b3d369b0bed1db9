//! # Looper - four-track live looping engine
//!
//! Streams input audio to storage while playing back earlier takes, and keeps
//! loops recorded at different times phase-locked to each other.
//!
//! ## Architecture
//!
//! `looper` is an umbrella crate that coordinates:
//! - **looper-core** - Audio blocks, block pool, SPSC rings, storage, mixer, metering
//! - **looper-track** - Record/play caches, tracks, loop sync, butler thread
//!
//! ## Quick Start
//!
//! ```ignore
//! use looper::prelude::*;
//!
//! let mut engine = LooperEngine::builder()
//!     .root("/media/card")
//!     .build()?;
//!
//! // Hand the real-time half to the audio callback
//! let mut processor = engine.processor().unwrap();
//! let out = processor.process(Some(&input));
//!
//! // Footswitches drive the tracks
//! engine.press(0, Instant::now())?;
//! engine.poll(Instant::now())?;
//! engine.release(0, Instant::now())?;
//! ```
//!
//! ## Feature Flags
//!
//! - `cpal-device` - Run the processor on the default cpal input/output devices

/// Re-export of looper-core for direct access
pub use looper_core as core;
/// Re-export of looper-track for direct access
pub use looper_track as track;

pub use looper_core::{
    AudioBlock, AudioConfig, BlockPool, FsStorage, MemoryStorage, PeakMeter, Storage,
    BLOCK_BYTES, BLOCK_SAMPLES,
};
pub use looper_track::{
    CacheConfig, Looper, LooperConfig, LooperProcessor, TrackShared, TrackState,
};

mod error;
pub use error::{Error, Result};

mod builder;
pub use builder::LooperEngineBuilder;

mod engine;
pub use engine::{LooperEngine, TrackStatus};

pub mod controls;
pub use controls::{Footswitch, Footswitches, Transition, TAP_MILLISECONDS};

#[cfg(feature = "cpal-device")]
mod device;
#[cfg(feature = "cpal-device")]
pub use device::AudioDevice;

pub mod prelude {
    pub use crate::{
        AudioBlock, AudioConfig, CacheConfig, Error, FsStorage, LooperEngine, MemoryStorage,
        Result, TrackState, TrackStatus,
    };
    pub use std::sync::Arc;
    pub use std::time::Instant;

    #[cfg(feature = "cpal-device")]
    pub use crate::AudioDevice;
}
