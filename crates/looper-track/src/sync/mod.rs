//! Cross-track loop synchronization.
//!
//! A track's effective loop length does not have to equal its recorded
//! length. Whenever a track restarts its loop while another track records, or
//! a take begins while other tracks play, the relative positions are captured
//! as [`SyncPoint`]s. Sync uses those points to pick the loop length that
//! keeps each track's loop boundary lined up with the others.
//!
//! All positions are block counts as seen between two audio cycles: a
//! playing track's count is the next sequence number it will play, a
//! recording track's count is the number of blocks captured so far.

mod arena;
mod persist;

pub use arena::{PointArena, PointId, SyncPoint};

use crate::track::TrackShared;
use crate::Result;
use looper_core::{OpenMode, Storage};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sync point graph and loop-length solver for a set of tracks.
pub struct Sync {
    tracks: Vec<Arc<TrackShared>>,
    points: PointArena,
    prerolls: Vec<usize>,
    path: Option<PathBuf>,
    storage: Arc<dyn Storage>,
}

impl Sync {
    pub fn new(tracks: Vec<Arc<TrackShared>>, storage: Arc<dyn Storage>) -> Self {
        let prerolls = vec![0; tracks.len()];
        Self {
            tracks,
            points: PointArena::new(),
            prerolls,
            path: None,
            storage,
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Points in insertion order.
    pub fn points(&self) -> impl Iterator<Item = &SyncPoint> + '_ {
        self.points.iter()
    }

    pub fn add_point(&mut self, point: SyncPoint) -> PointId {
        self.points.push(point)
    }

    /// Register another track. Its index is the previous track count.
    pub fn add_track(&mut self, track: Arc<TrackShared>) -> usize {
        debug_assert_eq!(track.index(), self.tracks.len());
        self.tracks.push(track);
        self.prerolls.push(0);
        self.tracks.len() - 1
    }

    /// Loop length closest to `track`'s recorded length that is a whole
    /// multiple of a track it has repeatedly lined up with.
    ///
    /// A unit track qualifies with at least two permanent points onto
    /// `track`; a multiple is accepted within a quarter of the unit length.
    pub fn ideal_loop_blocks(&self, track: usize) -> usize {
        let Some(this) = self.tracks.get(track) else {
            return 0;
        };
        let raw = this.master_blocks();

        let mut counts = vec![0usize; self.tracks.len()];
        for p in self.points.iter() {
            if p.target == track && !p.provisional && p.source != track {
                if let Some(count) = counts.get_mut(p.source) {
                    *count += 1;
                }
            }
        }

        let mut best: Option<(usize, usize)> = None;
        for (unit_track, &count) in counts.iter().enumerate() {
            if count < 2 {
                continue;
            }
            let unit = self.tracks[unit_track].master_blocks();
            if unit == 0 {
                continue;
            }
            let max_error = unit / 4;
            let nearest = (raw + unit / 2) / unit;
            for multiple in nearest.saturating_sub(1)..=nearest + 1 {
                if multiple == 0 {
                    continue;
                }
                let candidate = unit * multiple;
                let error = raw.abs_diff(candidate);
                if error > max_error {
                    continue;
                }
                if best.map_or(true, |(least, _)| error < least) {
                    best = Some((error, candidate));
                }
            }
        }
        best.map_or(raw, |(_, length)| length)
    }

    /// Loop length for `track`, counted from its most recent loop start, that
    /// lands the next boundary on one of its sync points.
    ///
    /// `elapsed` is how many blocks `track` has advanced since that loop
    /// start. Candidates shorter than `max(4, ideal / 4)` are never
    /// returned; `None` when no point qualifies.
    pub fn blocks_until_next_sync_point(
        &self,
        track: usize,
        ideal: usize,
        elapsed: usize,
    ) -> Option<usize> {
        let min_blocks = (ideal / 4).max(4);
        let mut best: Option<(usize, usize)> = None;

        for p in self.points.iter() {
            if p.source != track || p.provisional || p.target == track {
                continue;
            }
            let Some(target) = self.tracks.get(p.target) else {
                continue;
            };
            if !target.is_playing() {
                continue;
            }
            let repeat = target.play_blocks();
            if repeat == 0 {
                continue;
            }

            let time = map_into_loop(p.time, repeat, target.master_blocks());
            let at_start = (loop_position(target, repeat) + repeat - elapsed % repeat) % repeat;
            let mut until = (time + repeat - at_start) % repeat;
            while until <= ideal + repeat {
                if until >= min_blocks {
                    let error = until.abs_diff(ideal);
                    if best.map_or(true, |(least, _)| error < least) {
                        best = Some((error, until));
                    }
                }
                until += repeat;
            }
        }
        best.map(|(_, length)| length)
    }

    /// `track` has just restarted its loop.
    ///
    /// Records the restart against every track that is recording, then
    /// returns the loop length `track` should use for this pass. Without a
    /// qualifying sync point that is [`Self::ideal_loop_blocks`], not the raw
    /// recorded length.
    pub fn track_starting(&mut self, track: usize, elapsed: usize) -> usize {
        for (index, other) in self.tracks.iter().enumerate() {
            if index != track && other.is_recording() {
                let time = other.recording_block().saturating_sub(elapsed);
                self.points.push(SyncPoint {
                    source: track,
                    target: index,
                    time,
                    provisional: true,
                });
                debug!(source = track, target = index, time, "provisional restart point");
            }
        }
        let ideal = self.ideal_loop_blocks(track);
        self.blocks_until_next_sync_point(track, ideal, elapsed)
            .unwrap_or(ideal)
    }

    /// A take on `track` has begun; `elapsed` blocks have been captured since.
    ///
    /// Records the position of every playing track.
    pub fn track_recording(&mut self, track: usize, elapsed: usize) {
        for (index, other) in self.tracks.iter().enumerate() {
            if index == track || !other.is_playing() {
                continue;
            }
            let repeat = other.play_blocks();
            if repeat == 0 {
                continue;
            }
            let time = (loop_position(other, repeat) + repeat - elapsed % repeat) % repeat;
            self.points.push(SyncPoint {
                source: track,
                target: index,
                time,
                provisional: true,
            });
            debug!(source = track, target = index, time, "provisional take point");
        }
    }

    /// Discard the provisional points of an abandoned take on `track`.
    pub fn cancel_recording(&mut self, track: usize) {
        self.points
            .retain(|p| !(p.provisional && p.involves(track)));
    }

    /// Replace `track`'s permanent points with its provisional ones and
    /// persist.
    pub fn commit_recording(&mut self, track: usize) {
        self.points.retain_mut(|p| {
            if !p.involves(track) {
                true
            } else if p.provisional {
                p.provisional = false;
                true
            } else {
                false
            }
        });
        self.persist();
    }

    pub fn track_erased(&mut self, track: usize) {
        self.points.retain(|p| !p.involves(track));
        self.persist();
    }

    /// Silent blocks before a freshly committed `track` should start, so its
    /// first loop start falls on the soonest of its sync points. 0 if it has
    /// none on a playing track.
    pub fn initial_preroll(&self, track: usize) -> usize {
        self.points
            .iter()
            .filter(|p| p.source == track && !p.provisional && p.target != track)
            .filter_map(|p| {
                let target = self.tracks.get(p.target)?;
                let repeat = target.play_blocks();
                if !target.is_playing() || repeat == 0 {
                    return None;
                }
                let time = map_into_loop(p.time, repeat, target.master_blocks());
                // the target advances once more before our first block plays
                let next = (loop_position(target, repeat) + 1) % repeat;
                Some((time + repeat - next) % repeat)
            })
            .min()
            .unwrap_or(0)
    }

    /// Preroll reconstructed from the last loaded sync file.
    pub fn preroll(&self, track: usize) -> usize {
        self.prerolls.get(track).copied().unwrap_or(0)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Bind to a loop slot's sync file and load it.
    ///
    /// Call after the tracks have been bound to the same slot, since
    /// prerolls depend on their recorded lengths. An unreadable or truncated
    /// file loads as much as it can.
    pub fn set_path(&mut self, path: Option<PathBuf>) {
        if self.path == path {
            return;
        }
        self.path = path;
        self.points.clear();
        self.prerolls.fill(0);

        let Some(path) = self.path.clone() else {
            return;
        };
        if !self.storage.exists(&path) {
            return;
        }
        let bytes = match self.read_file(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unable to read sync file");
                return;
            }
        };

        let decoded = persist::decode(&bytes, self.tracks.len());
        if decoded.truncated {
            warn!(path = %path.display(), "sync file truncated");
        }
        for point in decoded.points {
            self.points.push(point);
        }
        if let Some(positions) = decoded.positions {
            self.compute_prerolls(&positions);
        }
        info!(path = %path.display(), points = self.points.len(), "loaded sync points");
    }

    fn read_file(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        let mut file = self.storage.open(path, OpenMode::Read)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Delay tracks that were saved partway into their loop so that the
    /// ensemble restarts with its saved relative phase.
    fn compute_prerolls(&mut self, positions: &[usize]) {
        let longest = self
            .tracks
            .iter()
            .map(|t| t.master_blocks())
            .max()
            .unwrap_or(0);
        for (preroll, &position) in self.prerolls.iter_mut().zip(positions) {
            *preroll = longest.saturating_sub(position);
        }

        let min = self
            .tracks
            .iter()
            .zip(&self.prerolls)
            .filter(|(t, _)| t.master_blocks() > 0)
            .map(|(_, &p)| p)
            .min()
            .unwrap_or(longest);
        for preroll in &mut self.prerolls {
            if *preroll >= min {
                *preroll -= min;
            }
        }
    }

    /// Write positions and points to the bound sync file.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.storage.create_dir_all(parent)?;
        }
        let positions: Vec<usize> = self.tracks.iter().map(|t| t.playing_block()).collect();
        let bytes = persist::encode(&positions, self.points.iter());

        let mut file = self.storage.open(path, OpenMode::WriteTruncate)?;
        file.write_all(&bytes)?;
        file.flush()?;
        debug!(path = %path.display(), points = self.points.len(), "saved sync points");
        Ok(())
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!(error = %e, "unable to save sync points");
        }
    }
}

/// Where a playing track stands in a loop of `repeat` blocks. A track still
/// in preroll counts as that many blocks short of its loop start.
fn loop_position(track: &TrackShared, repeat: usize) -> usize {
    let preroll = track.play().preroll();
    if preroll > 0 {
        (repeat - preroll % repeat) % repeat
    } else {
        track.playing_block() % repeat
    }
}

/// Bring a point recorded beyond the target's current loop back into it:
/// keep its distance from the end of the original recording when that fits,
/// otherwise wrap it.
fn map_into_loop(time: usize, repeat: usize, master_blocks: usize) -> usize {
    if time < repeat {
        return time;
    }
    match master_blocks.checked_sub(time) {
        Some(until_end) if until_end < repeat => (repeat - until_end) % repeat,
        _ => time % repeat,
    }
}
