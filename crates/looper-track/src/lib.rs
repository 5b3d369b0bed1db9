//! Tracks, streaming caches and loop synchronization for the looper.
//!
//! # Features
//!
//! - **Caches**: write-behind recording and sequence-addressed read-ahead
//!   between the audio cycle and storage
//! - **Tracks**: the four-state track machine with take commit and cancel
//! - **Sync**: sync points between tracks and the loop-length solver
//! - **Butler**: background thread that services the caches
//!
//! # Example
//!
//! ```ignore
//! use looper_track::prelude::*;
//!
//! let storage = Arc::new(FsStorage::new("/media/card"));
//! let (mut looper, mut processor) = Looper::new(storage, LooperConfig::default())?;
//! looper.select_loop(0)?;
//! looper.set_state(0, TrackState::Recording)?;
//!
//! // audio callback
//! let out = processor.process(Some(&input));
//!
//! // background thread
//! looper.update_caches()?;
//! ```

// Error types
pub mod error;
pub use error::{Error, Result};

pub mod cache;
pub use cache::CacheConfig;

pub mod sync;
pub use sync::{Sync, SyncPoint};

pub mod track;
pub use track::{Track, TrackShared, TrackState, TrackUnit};

mod looper;
pub use looper::{Looper, LooperConfig, MAX_LOOP};

mod processor;
pub use processor::LooperProcessor;

#[cfg(feature = "butler")]
pub mod butler;
#[cfg(feature = "butler")]
pub use butler::{ButlerCommand, ButlerConfig, ButlerThread};

pub mod prelude {
    pub use crate::{
        CacheConfig, Error, Looper, LooperConfig, LooperProcessor, Result, TrackShared,
        TrackState,
    };
    pub use looper_core::{AudioBlock, AudioConfig, BlockPool, FsStorage, MemoryStorage, Storage};
    pub use std::sync::Arc;

    #[cfg(feature = "butler")]
    pub use crate::{ButlerCommand, ButlerConfig, ButlerThread};
}
