//! Track state and the lock-free status shared across threads.

use crate::cache::{PlayShared, RecordShared};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TrackState {
    #[default]
    Paused = 0,
    Playing = 1,
    /// Capturing input, but the take is discarded unless it becomes `Recording`.
    MaybeRecording = 2,
    Recording = 3,
}

impl TrackState {
    /// `MaybeRecording` or `Recording`.
    #[inline]
    pub fn is_recording(self) -> bool {
        matches!(self, Self::MaybeRecording | Self::Recording)
    }
}

impl From<u8> for TrackState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Playing,
            2 => Self::MaybeRecording,
            3 => Self::Recording,
            _ => Self::Paused,
        }
    }
}

/// Status of one track, readable from any thread.
///
/// Written by the track's control half (state, pass-through) and by its cache
/// halves (play and record counters).
#[derive(Debug)]
pub struct TrackShared {
    index: usize,
    state: AtomicU8,
    pass_through: AtomicBool,
    play: Arc<PlayShared>,
    record: Arc<RecordShared>,
}

impl TrackShared {
    pub(crate) fn new(index: usize, play: Arc<PlayShared>, record: Arc<RecordShared>) -> Self {
        Self {
            index,
            state: AtomicU8::new(TrackState::Paused as u8),
            pass_through: AtomicBool::new(false),
            play,
            record,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn state(&self) -> TrackState {
        TrackState::from(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: TrackState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn pass_through(&self) -> bool {
        self.pass_through.load(Ordering::Acquire)
    }

    pub(crate) fn set_pass_through(&self, enabled: bool) {
        self.pass_through.store(enabled, Ordering::Release);
    }

    pub fn play(&self) -> &PlayShared {
        &self.play
    }

    pub fn record(&self) -> &RecordShared {
        &self.record
    }

    /// Length of the master recording, 0 when nothing is loaded.
    pub fn master_blocks(&self) -> usize {
        if self.play.is_open() {
            self.play.blocks()
        } else {
            0
        }
    }

    pub fn play_blocks(&self) -> usize {
        self.play.play_blocks()
    }

    /// Playback position: the next sequence number the track will play.
    pub fn playing_block(&self) -> usize {
        self.play.position()
    }

    /// Recording position: blocks captured in the current take.
    pub fn recording_block(&self) -> usize {
        self.record.blocks()
    }

    /// Audible playback: `Playing` or overdubbing, with a master loaded.
    pub fn is_playing(&self) -> bool {
        let state = self.state();
        (state == TrackState::Playing || state.is_recording()) && self.play.is_open()
    }

    pub fn is_recording(&self) -> bool {
        self.state().is_recording()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            TrackState::Paused,
            TrackState::Playing,
            TrackState::MaybeRecording,
            TrackState::Recording,
        ] {
            assert_eq!(TrackState::from(state as u8), state);
        }
        assert_eq!(TrackState::from(200), TrackState::Paused);
    }

    #[test]
    fn test_recording_family() {
        assert!(!TrackState::Paused.is_recording());
        assert!(!TrackState::Playing.is_recording());
        assert!(TrackState::MaybeRecording.is_recording());
        assert!(TrackState::Recording.is_recording());
    }

    #[test]
    fn test_not_playing_without_master() {
        let shared = TrackShared::new(
            0,
            Arc::new(PlayShared::default()),
            Arc::new(RecordShared::default()),
        );
        shared.set_state(TrackState::Playing);
        assert!(!shared.is_playing());
        assert_eq!(shared.master_blocks(), 0);
    }
}
