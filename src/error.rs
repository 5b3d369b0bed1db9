//! Centralized error type for the looper umbrella crate.
//!
//! Wraps the subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] looper_core::Error),

    #[error(transparent)]
    Track(#[from] looper_track::Error),

    #[error("Configuration: {0}")]
    Config(String),

    #[cfg(feature = "cpal-device")]
    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    #[cfg(feature = "cpal-device")]
    #[error("Audio device not available")]
    DeviceNotAvailable(#[from] cpal::DefaultStreamConfigError),

    #[cfg(feature = "cpal-device")]
    #[error("Failed to build audio stream")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[cfg(feature = "cpal-device")]
    #[error("Failed to play audio stream")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
