//! Butler thread for asynchronous cache I/O.

use super::config::ButlerConfig;
use super::request::ButlerCommand;
use crate::looper::Looper;
use crate::track::TrackShared;
use crate::{Error, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thread_priority::ThreadPriority;
use tracing::{debug, warn};

/// Counters published by the butler thread.
#[derive(Debug, Default)]
pub struct ButlerStats {
    passes: AtomicU64,
    commands: AtomicU64,
    errors: AtomicU64,
}

impl ButlerStats {
    /// Completed cache passes.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn commands(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    /// Failed commands and cache passes.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Butler thread owning a [`Looper`].
pub struct ButlerThread {
    command_tx: Sender<ButlerCommand>,
    command_rx: Option<Receiver<ButlerCommand>>,
    looper: Option<Looper>,
    tracks: Vec<Arc<TrackShared>>,
    stats: Arc<ButlerStats>,
    thread_handle: Option<JoinHandle<Looper>>,
    shutdown: Arc<AtomicBool>,
    config: ButlerConfig,
}

impl ButlerThread {
    pub fn new(looper: Looper, config: ButlerConfig) -> Self {
        let (tx, rx) = bounded(config.command_capacity);
        Self {
            command_tx: tx,
            command_rx: Some(rx),
            tracks: looper.shared(),
            looper: Some(looper),
            stats: Arc::new(ButlerStats::default()),
            thread_handle: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    pub fn command_sender(&self) -> Sender<ButlerCommand> {
        self.command_tx.clone()
    }

    /// Queue a command without blocking.
    pub fn send(&self, command: ButlerCommand) -> Result<()> {
        self.command_tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => Error::Butler("command queue full".into()),
            TrySendError::Disconnected(_) => Error::Butler("butler thread stopped".into()),
        })
    }

    /// Shared status of every track, in index order.
    pub fn tracks(&self) -> &[Arc<TrackShared>] {
        &self.tracks
    }

    pub fn stats(&self) -> Arc<ButlerStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.thread_handle.is_some() {
            return Ok(());
        }
        let (Some(rx), Some(looper)) = (self.command_rx.take(), self.looper.take()) else {
            return Err(Error::Butler("butler already stopped".into()));
        };
        let shutdown = Arc::clone(&self.shutdown);
        let stats = Arc::clone(&self.stats);
        let interval = self.config.poll_interval;

        let handle = thread::Builder::new()
            .name("looper-butler".into())
            .spawn(move || {
                let _ = thread_priority::set_current_thread_priority(ThreadPriority::Max);
                butler_loop(rx, looper, shutdown, stats, interval)
            })
            .map_err(|e| Error::Butler(format!("failed to spawn butler thread: {e}")))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop the thread after it has handled every queued command and
    /// settled any track still recording.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.command_tx.try_send(ButlerCommand::Shutdown);

        if let Some(handle) = self.thread_handle.take() {
            match handle.join() {
                Ok(looper) => self.looper = Some(looper),
                Err(_) => warn!("butler thread panicked"),
            }
        }
    }

    /// Stop the thread and take back the looper.
    pub fn into_looper(mut self) -> Option<Looper> {
        self.stop();
        self.looper.take()
    }
}

impl Drop for ButlerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn butler_loop(
    rx: Receiver<ButlerCommand>,
    mut looper: Looper,
    shutdown: Arc<AtomicBool>,
    stats: Arc<ButlerStats>,
    interval: Duration,
) -> Looper {
    debug!("butler started");
    loop {
        if shutdown.load(Ordering::SeqCst) {
            while let Ok(command) = rx.try_recv() {
                if !handle_command(command, &mut looper, &stats) {
                    break;
                }
            }
            break;
        }

        match rx.recv_timeout(interval) {
            Ok(command) => {
                if !process_commands(command, &rx, &mut looper, &stats) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        cache_pass(&mut looper, &stats);
    }

    if let Err(e) = looper.finish() {
        warn!(error = %e, "unable to settle tracks on shutdown");
        stats.errors.fetch_add(1, Ordering::Relaxed);
    }
    debug!("butler stopped");
    looper
}

/// Handle `first` and everything queued behind it. Returns `false` once a
/// shutdown was requested.
fn process_commands(
    first: ButlerCommand,
    rx: &Receiver<ButlerCommand>,
    looper: &mut Looper,
    stats: &ButlerStats,
) -> bool {
    if !handle_command(first, looper, stats) {
        return false;
    }
    while let Ok(command) = rx.try_recv() {
        if !handle_command(command, looper, stats) {
            return false;
        }
    }
    true
}

fn handle_command(command: ButlerCommand, looper: &mut Looper, stats: &ButlerStats) -> bool {
    stats.commands.fetch_add(1, Ordering::Relaxed);
    let result = match command {
        ButlerCommand::SetState { track, state } => looper.set_state(track, state),
        ButlerCommand::SetActive { track, active } => looper.set_active(track, active),
        ButlerCommand::SetPassThrough { track, enabled } => {
            looper.set_pass_through(track, enabled)
        }
        ButlerCommand::SelectLoop(index) => looper.select_loop(index),
        ButlerCommand::Erase(track) => looper.erase(track),
        ButlerCommand::Flush => looper
            .update_caches()
            .and_then(|()| looper.sync().lock().save()),
        ButlerCommand::Shutdown => return false,
    };
    if let Err(e) = result {
        warn!(?command, error = %e, "butler command failed");
        stats.errors.fetch_add(1, Ordering::Relaxed);
    }
    true
}

fn cache_pass(looper: &mut Looper, stats: &ButlerStats) {
    if looper.update_caches().is_err() {
        stats.errors.fetch_add(1, Ordering::Relaxed);
    }
    stats.passes.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::looper::LooperConfig;
    use crate::track::TrackState;
    use looper_core::{MemoryStorage, Storage};
    use std::path::Path;

    fn butler() -> ButlerThread {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let (looper, _processor) = Looper::new(storage, LooperConfig::default()).unwrap();
        ButlerThread::new(looper, ButlerConfig::default())
    }

    #[test]
    fn test_commands_applied_before_stop() {
        let mut butler = butler();
        butler.start().unwrap();
        assert!(butler.is_running());
        butler.send(ButlerCommand::SelectLoop(3)).unwrap();
        butler
            .send(ButlerCommand::SetPassThrough {
                track: 1,
                enabled: true,
            })
            .unwrap();

        let looper = butler.into_looper().unwrap();
        assert_eq!(looper.loop_index(), Some(3));
        let track = looper.track(1).unwrap();
        assert!(track.pass_through());
        assert_eq!(track.master_path(), Some(Path::new("03/1.A")));
    }

    #[test]
    fn test_failed_command_counted() {
        let mut butler = butler();
        let stats = butler.stats();
        butler.start().unwrap();
        butler.send(ButlerCommand::SelectLoop(150)).unwrap();
        butler.stop();
        assert_eq!(stats.errors(), 1);
        assert!(stats.commands() >= 1);
    }

    #[test]
    fn test_shutdown_settles_undecided_take() {
        let mut butler = butler();
        butler.start().unwrap();
        butler.send(ButlerCommand::SelectLoop(0)).unwrap();
        butler
            .send(ButlerCommand::SetState {
                track: 0,
                state: TrackState::MaybeRecording,
            })
            .unwrap();
        let looper = butler.into_looper().unwrap();
        assert_eq!(looper.track(0).unwrap().state(), TrackState::Paused);
    }

    #[test]
    fn test_restart_after_stop_refused() {
        let mut butler = butler();
        butler.start().unwrap();
        butler.stop();
        assert!(!butler.is_running());
        assert!(butler.start().is_err());
    }
}
