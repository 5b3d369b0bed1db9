//! Footswitch control: one switch per track.
//!
//! Pressing a switch starts a provisional take. Releasing it within the tap
//! window discards the take and toggles playback; holding it past the window
//! turns the take into a real recording, which the release then commits.

use looper_track::TrackState;
use std::time::{Duration, Instant};

/// Longest press that still counts as a tap.
pub const TAP_MILLISECONDS: u64 = 500;

/// A state change produced by a switch, to be applied to its track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub track: usize,
    pub state: TrackState,
    pub active: bool,
}

/// Tap/hold state of one footswitch.
#[derive(Debug, Clone)]
pub struct Footswitch {
    state: TrackState,
    active: bool,
    held: bool,
    /// Press was refused because another track is recording.
    ignored: bool,
    changed_at: Instant,
}

impl Footswitch {
    pub fn new(now: Instant) -> Self {
        Self {
            state: TrackState::Paused,
            active: false,
            held: false,
            ignored: false,
            changed_at: now,
        }
    }

    /// State last requested for the track.
    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn since_state_change(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.changed_at)
    }

    fn set_state(&mut self, state: TrackState, now: Instant) {
        if state != self.state {
            self.state = state;
            self.changed_at = now;
        }
    }
}

/// The switches of every track, sharing one tap window.
#[derive(Debug, Clone)]
pub struct Footswitches {
    switches: Vec<Footswitch>,
    tap: Duration,
}

impl Footswitches {
    pub fn new(count: usize, now: Instant) -> Self {
        Self {
            switches: vec![Footswitch::new(now); count],
            tap: Duration::from_millis(TAP_MILLISECONDS),
        }
    }

    pub fn with_tap_window(mut self, tap: Duration) -> Self {
        self.tap = tap;
        self
    }

    pub fn len(&self) -> usize {
        self.switches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }

    pub fn get(&self, track: usize) -> Option<&Footswitch> {
        self.switches.get(track)
    }

    /// Switch pushed down: start a provisional take.
    ///
    /// Ignored while another track records.
    pub fn press(&mut self, track: usize, now: Instant) -> Option<Transition> {
        let recording_elsewhere = self
            .switches
            .iter()
            .enumerate()
            .any(|(i, s)| i != track && s.state.is_recording());
        let switch = self.switches.get_mut(track)?;
        if switch.held {
            return None;
        }
        switch.held = true;
        switch.ignored = recording_elsewhere;
        if switch.ignored {
            return None;
        }
        switch.set_state(TrackState::MaybeRecording, now);
        Some(transition(track, switch))
    }

    /// Switch let up: a tap toggles playback, a hold commits the take.
    pub fn release(&mut self, track: usize, now: Instant) -> Option<Transition> {
        let tap = self.tap;
        let switch = self.switches.get_mut(track)?;
        if !switch.held {
            return None;
        }
        switch.held = false;
        if std::mem::take(&mut switch.ignored) {
            return None;
        }

        if switch.since_state_change(now) <= tap {
            switch.active = !switch.active;
            let state = if switch.active {
                TrackState::Playing
            } else {
                TrackState::Paused
            };
            switch.set_state(state, now);
        } else {
            switch.active = true;
            switch.set_state(TrackState::Playing, now);
        }
        Some(transition(track, switch))
    }

    /// Promote provisional takes held past the tap window to recordings.
    pub fn poll(&mut self, now: Instant) -> Vec<Transition> {
        let tap = self.tap;
        let mut transitions = Vec::new();
        for (track, switch) in self.switches.iter_mut().enumerate() {
            if switch.state == TrackState::MaybeRecording && switch.since_state_change(now) > tap {
                switch.set_state(TrackState::Recording, now);
                transitions.push(transition(track, switch));
            }
        }
        transitions
    }

    /// Mirror a state applied to the track by other means.
    pub fn observe(&mut self, track: usize, state: TrackState, active: bool, now: Instant) {
        if let Some(switch) = self.switches.get_mut(track) {
            switch.active = active;
            switch.set_state(state, now);
        }
    }
}

fn transition(track: usize, switch: &Footswitch) -> Transition {
    Transition {
        track,
        state: switch.state,
        active: switch.active,
    }
}
