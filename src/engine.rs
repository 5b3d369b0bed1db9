//! LooperEngine that coordinates the looper subsystems

use crate::controls::{Footswitches, Transition};
use crate::{Error, Result};
use looper_core::PeakMeter;
use looper_track::butler::ButlerStats;
use looper_track::{
    ButlerCommand, ButlerThread, LooperConfig, LooperProcessor, TrackShared, TrackState, MAX_LOOP,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Snapshot of one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackStatus {
    pub state: TrackState,
    /// Whether a tap resumes the track.
    pub active: bool,
    /// Length of the master recording.
    pub blocks: usize,
    /// Effective loop length.
    pub play_blocks: usize,
    /// Next block the track plays.
    pub position: usize,
    /// Silent cycles left before the loop restarts.
    pub preroll: usize,
    /// Blocks captured in the current take.
    pub recorded: usize,
}

/// Top-level looper: control surface plus the background butler thread.
///
/// The real-time half is handed out once through [`processor`](Self::processor)
/// and driven by the host's audio callback (or by
/// [`AudioDevice`](crate::AudioDevice) with the `cpal-device` feature).
pub struct LooperEngine {
    butler: ButlerThread,
    processor: Option<LooperProcessor>,
    tracks: Vec<Arc<TrackShared>>,
    footswitches: Footswitches,
    input_meter: Arc<PeakMeter>,
    config: LooperConfig,
}

impl LooperEngine {
    pub fn builder() -> crate::LooperEngineBuilder {
        crate::LooperEngineBuilder::default()
    }

    pub(crate) fn new(
        butler: ButlerThread,
        processor: LooperProcessor,
        footswitches: Footswitches,
        config: LooperConfig,
    ) -> Self {
        Self {
            tracks: butler.tracks().to_vec(),
            input_meter: processor.input_meter(),
            processor: Some(processor),
            butler,
            footswitches,
            config,
        }
    }

    /// Take the real-time processor. Returns `None` after the first call.
    pub fn processor(&mut self) -> Option<LooperProcessor> {
        self.processor.take()
    }

    pub fn config(&self) -> &LooperConfig {
        &self.config
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, index: usize) -> Option<&Arc<TrackShared>> {
        self.tracks.get(index)
    }

    pub fn status(&self, index: usize) -> Option<TrackStatus> {
        let track = self.tracks.get(index)?;
        Some(TrackStatus {
            state: track.state(),
            active: self
                .footswitches
                .get(index)
                .is_some_and(|s| s.is_active()),
            blocks: track.master_blocks(),
            play_blocks: track.play_blocks(),
            position: track.playing_block(),
            preroll: track.play().preroll(),
            recorded: track.recording_block(),
        })
    }

    /// Peak input level since the last call, 0.0..=1.0.
    pub fn input_peak(&self) -> f32 {
        self.input_meter.read_and_reset()
    }

    pub fn butler_stats(&self) -> Arc<ButlerStats> {
        self.butler.stats()
    }

    pub fn select_loop(&self, index: usize) -> Result<()> {
        if index > MAX_LOOP {
            return Err(looper_track::Error::InvalidLoop(index).into());
        }
        self.send(ButlerCommand::SelectLoop(index))
    }

    pub fn set_state(&mut self, track: usize, state: TrackState) -> Result<()> {
        self.check_track(track)?;
        if state.is_recording() {
            if let Some(recording) = self.recording_elsewhere(track) {
                return Err(looper_track::Error::AlreadyRecording { recording }.into());
            }
        }
        let active = match state {
            TrackState::Playing => true,
            TrackState::Paused => false,
            _ => self.status(track).is_some_and(|s| s.active),
        };
        self.footswitches.observe(track, state, active, Instant::now());
        self.send(ButlerCommand::SetActive { track, active })?;
        self.send(ButlerCommand::SetState { track, state })
    }

    pub fn set_pass_through(&self, track: usize, enabled: bool) -> Result<()> {
        self.check_track(track)?;
        self.send(ButlerCommand::SetPassThrough { track, enabled })
    }

    pub fn erase(&mut self, track: usize) -> Result<()> {
        self.check_track(track)?;
        self.footswitches
            .observe(track, TrackState::Paused, false, Instant::now());
        self.send(ButlerCommand::Erase(track))
    }

    /// Write queued audio and save sync points now.
    pub fn flush(&self) -> Result<()> {
        self.send(ButlerCommand::Flush)
    }

    /// Footswitch `track` pressed at `now`.
    pub fn press(&mut self, track: usize, now: Instant) -> Result<()> {
        self.check_track(track)?;
        match self.footswitches.press(track, now) {
            Some(transition) => self.apply(transition),
            None => Ok(()),
        }
    }

    /// Footswitch `track` released at `now`.
    pub fn release(&mut self, track: usize, now: Instant) -> Result<()> {
        self.check_track(track)?;
        match self.footswitches.release(track, now) {
            Some(transition) => self.apply(transition),
            None => Ok(()),
        }
    }

    /// Advance footswitch timing; call regularly from the control loop.
    pub fn poll(&mut self, now: Instant) -> Result<()> {
        for transition in self.footswitches.poll(now) {
            self.apply(transition)?;
        }
        Ok(())
    }

    /// Stop the butler, committing a held take and saving sync points.
    pub fn shutdown(mut self) {
        self.butler.stop();
    }

    fn apply(&self, transition: Transition) -> Result<()> {
        debug!(
            track = transition.track,
            state = ?transition.state,
            active = transition.active,
            "footswitch"
        );
        self.send(ButlerCommand::SetActive {
            track: transition.track,
            active: transition.active,
        })?;
        self.send(ButlerCommand::SetState {
            track: transition.track,
            state: transition.state,
        })
    }

    fn send(&self, command: ButlerCommand) -> Result<()> {
        self.butler.send(command).map_err(Error::from)
    }

    fn check_track(&self, track: usize) -> Result<()> {
        if track < self.tracks.len() {
            Ok(())
        } else {
            Err(looper_track::Error::InvalidTrack(track).into())
        }
    }

    fn recording_elsewhere(&self, track: usize) -> Option<usize> {
        self.tracks
            .iter()
            .position(|t| t.index() != track && t.is_recording())
            .or_else(|| {
                (0..self.footswitches.len()).find(|&i| {
                    i != track
                        && self
                            .footswitches
                            .get(i)
                            .is_some_and(|s| s.state().is_recording())
                })
            })
    }
}
