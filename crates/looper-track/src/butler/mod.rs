//! Background thread that services the track caches.
//!
//! The butler owns the [`Looper`](crate::Looper). Control requests reach it
//! as [`ButlerCommand`]s; between requests it refills play rings and drains
//! record rings every poll interval.

mod config;
mod request;
mod thread;

pub use config::ButlerConfig;
pub use request::ButlerCommand;
pub use thread::{ButlerStats, ButlerThread};
