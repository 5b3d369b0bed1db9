//! Core building blocks of the looper: fixed-size audio blocks and their
//! pool, the bounded SPSC ring, the storage abstraction, mixing and metering.
//!
//! Nothing in this crate knows about tracks or loops.

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::AudioConfig;

pub mod block;
pub use block::{AudioBlock, BlockPool, BLOCK_BYTES, BLOCK_SAMPLES};

pub mod ring;
pub use ring::{RingConsumer, RingProducer};

pub mod storage;
pub use storage::{FsStorage, MemoryStorage, OpenMode, Storage, StorageFile};

pub mod mixer;
pub use mixer::{BlockSink, Mixer};

pub mod metering;
pub use metering::PeakMeter;
