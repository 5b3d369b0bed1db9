use super::{TrackEvent, TrackShared, TrackState};
use crate::cache::{PlayReader, RecordWriter};
use crossbeam_channel::Sender;
use looper_core::{AudioBlock, BlockPool, BlockSink};
use std::sync::Arc;

/// Audio-thread half of a track.
///
/// `update()` is called once per audio cycle. It never blocks or allocates:
/// blocks come from the shared pool and events are dropped if the channel is
/// full.
pub struct TrackUnit {
    shared: Arc<TrackShared>,
    reader: PlayReader,
    writer: RecordWriter,
    pool: BlockPool,
    events: Sender<TrackEvent>,
    silence_threshold: u16,
    announced: bool,
}

impl TrackUnit {
    pub(crate) fn new(
        shared: Arc<TrackShared>,
        reader: PlayReader,
        writer: RecordWriter,
        pool: BlockPool,
        events: Sender<TrackEvent>,
        silence_threshold: u16,
    ) -> Self {
        Self {
            shared,
            reader,
            writer,
            pool,
            events,
            silence_threshold,
            announced: false,
        }
    }

    pub fn index(&self) -> usize {
        self.shared.index()
    }

    pub fn shared(&self) -> &Arc<TrackShared> {
        &self.shared
    }

    /// Run one cycle.
    ///
    /// Plays the next master block, records `input` (mixed with playback)
    /// while in a recording state, and transmits playback and, with
    /// pass-through on, the input to `sink` on this track's channel.
    pub fn update(&mut self, input: Option<&AudioBlock>, sink: &mut dyn BlockSink) {
        let state = self.shared.state();
        let recording = state.is_recording();
        if !recording {
            self.announced = false;
        }
        self.reader.service();

        let played = if state == TrackState::Playing || recording {
            self.reader.read_block()
        } else {
            Default::default()
        };
        if played.is_loop_start() {
            let _ = self.events.try_send(TrackEvent::LoopStarted);
        }

        if recording {
            if let Some(input) = input {
                self.capture(state, input, played.block.as_ref());
            }
        }

        if let Some(block) = &played.block {
            sink.transmit(self.index(), block);
        }
        if self.shared.pass_through() {
            if let Some(input) = input {
                sink.transmit(self.index(), input);
            }
        }
    }

    fn capture(&mut self, state: TrackState, input: &AudioBlock, played: Option<&AudioBlock>) {
        // leading silence of a fresh take is not recorded
        if self.writer.blocks() == 0
            && played.is_none()
            && input.peak() < self.silence_threshold
        {
            return;
        }
        let Some(mut block) = self.pool.allocate() else {
            return;
        };
        block.copy_from(input);
        if let Some(played) = played {
            block.mix_from(played);
        }
        if self.writer.write_block(block) && state == TrackState::Recording && !self.announced {
            self.announced = true;
            let _ = self.events.try_send(TrackEvent::RecordingStarted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, PlayCache, RecordCache};
    use looper_core::{MemoryStorage, Storage};

    #[derive(Default)]
    struct Count(usize);

    impl BlockSink for Count {
        fn transmit(&mut self, _channel: usize, _block: &AudioBlock) {
            self.0 += 1;
        }
    }

    fn unit(pool: &BlockPool) -> (TrackUnit, RecordCache, crossbeam_channel::Receiver<TrackEvent>) {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let config = CacheConfig::default();
        let (play, reader) = PlayCache::new(Arc::clone(&storage), pool.clone(), &config);
        let (record, writer) = RecordCache::new(storage, &config);
        let shared = Arc::new(TrackShared::new(0, play.shared(), record.shared()));
        let (tx, rx) = crossbeam_channel::bounded(8);
        let unit = TrackUnit::new(shared, reader, writer, pool.clone(), tx, 256);
        (unit, record, rx)
    }

    #[test]
    fn test_pass_through_forwards_input() {
        let pool = BlockPool::new(16);
        let (mut unit, _record, _rx) = unit(&pool);
        let input = pool.allocate().unwrap();
        let mut sink = Count::default();

        unit.update(Some(&input), &mut sink);
        assert_eq!(sink.0, 0);
        unit.shared.set_pass_through(true);
        unit.update(Some(&input), &mut sink);
        assert_eq!(sink.0, 1);
    }

    #[test]
    fn test_recording_started_sent_once() {
        let pool = BlockPool::new(16);
        let (mut unit, record, rx) = unit(&pool);
        let mut input = pool.allocate().unwrap();
        input.samples_mut().fill(4000);
        let mut sink = Count::default();

        unit.shared.set_state(TrackState::MaybeRecording);
        unit.update(Some(&input), &mut sink);
        assert!(rx.try_recv().is_err());

        unit.shared.set_state(TrackState::Recording);
        for _ in 0..3 {
            unit.update(Some(&input), &mut sink);
        }
        assert_eq!(rx.try_recv(), Ok(TrackEvent::RecordingStarted));
        assert!(rx.try_recv().is_err());
        assert_eq!(record.blocks(), 4);
    }

    #[test]
    fn test_paused_track_records_nothing() {
        let pool = BlockPool::new(16);
        let (mut unit, record, _rx) = unit(&pool);
        let mut input = pool.allocate().unwrap();
        input.samples_mut().fill(4000);
        unit.update(Some(&input), &mut Count::default());
        assert_eq!(record.blocks(), 0);
        assert_eq!(pool.in_use(), 1);
    }
}
