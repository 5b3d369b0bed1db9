//! Request types for butler thread communication.

use crate::track::TrackState;

/// Command sent to the butler thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButlerCommand {
    SetState { track: usize, state: TrackState },
    SetActive { track: usize, active: bool },
    SetPassThrough { track: usize, enabled: bool },
    /// Bind all tracks to loop slot 0-99.
    SelectLoop(usize),
    Erase(usize),
    /// Run a cache pass and save sync points now.
    Flush,
    /// Settle recording tracks and exit.
    Shutdown,
}
