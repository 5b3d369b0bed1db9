//! Streaming caches between the audio cycle and storage.
//!
//! Each cache is split into a background half that performs all storage I/O
//! and a real-time half that only touches its ring:
//!
//! - [`RecordCache`] / [`RecordWriter`]: write-behind for the scratch file
//! - [`PlayCache`] / [`PlayReader`]: sequence-addressed read-ahead for the master file

mod config;
mod file;
mod play;
mod record;

pub use config::CacheConfig;
pub use file::FileCache;
pub use play::{PlayCache, PlayReader, PlayShared, PlayedBlock};
pub use record::{RecordCache, RecordShared, RecordWriter};
