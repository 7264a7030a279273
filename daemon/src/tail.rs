/// Tail loop: follows the newest ADM file and queues a message per PvP kill.
///
/// States:
///   - Starting  no file yet; discovery runs on every file-check tick.
///   - Tracking  a cursor is open; new lines are read on every poll tick and
///               discovery re-runs on every file-check tick.
/// Switching is the step between two Tracking states: the old cursor is
/// dropped and the new file is opened at its end, so neither file's history
/// is replayed and nothing later appended to the old file is read.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::event::DaemonEvent;
use crate::message::format_kill;
use crate::parser::parse_line;
use crate::queue::DeliveryQueue;
use crate::tracker::{discover_latest, LogCursor};

/// Observable tail loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    Starting,
    Tracking,
}

/// Result of a discovery pass that changed the tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Started(PathBuf),
    Switched { from: PathBuf, to: PathBuf },
}

pub struct Tailer {
    directory: PathBuf,
    delay: Duration,
    queue: Arc<DeliveryQueue>,
    cursor: Option<LogCursor>,
}

impl Tailer {
    pub fn new(directory: PathBuf, delay: Duration, queue: Arc<DeliveryQueue>) -> Self {
        Self {
            directory,
            delay,
            queue,
            cursor: None,
        }
    }

    pub fn state(&self) -> TailState {
        if self.cursor.is_some() {
            TailState::Tracking
        } else {
            TailState::Starting
        }
    }

    pub fn current_file(&self) -> Option<&Path> {
        self.cursor.as_ref().map(LogCursor::path)
    }

    /// Runs discovery and moves to the newest file if it differs from the
    /// current one. Failures leave the state unchanged until the next call.
    pub fn check_for_newer_file(&mut self) -> Option<FileChange> {
        let latest = match discover_latest(&self.directory) {
            Ok(Some(path)) => path,
            Ok(None) => {
                if self.cursor.is_none() {
                    info!(dir = %self.directory.display(), "No ADM files found; retrying");
                }
                return None;
            }
            Err(e) => {
                warn!(dir = %self.directory.display(), error = %e, "Could not read logs directory");
                return None;
            }
        };

        if self.current_file() == Some(latest.as_path()) {
            return None;
        }

        let cursor = match LogCursor::open_at_end(&latest) {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(path = %latest.display(), error = %e, "Could not open ADM file; retrying");
                return None;
            }
        };
        info!(path = %latest.display(), position = cursor.position(), "Starting at end of file");

        match self.cursor.replace(cursor) {
            None => Some(FileChange::Started(latest)),
            Some(old) => Some(FileChange::Switched {
                from: old.path().to_path_buf(),
                to: latest,
            }),
        }
    }

    /// Reads new lines from the tracked file and queues one message per kill,
    /// due at `now + delay`. Returns the number of messages queued.
    pub fn poll(&mut self, now: Instant) -> usize {
        let Some(cursor) = self.cursor.as_mut() else {
            return 0;
        };

        let mut queued = 0;
        for line in cursor.read_new_lines() {
            let Some(kill) = parse_line(&line) else {
                trace!(%line, "No kill in line");
                continue;
            };
            let text = format_kill(&kill);
            let due_at = now + self.delay;
            let send_at = chrono::Local::now()
                + chrono::Duration::from_std(self.delay).unwrap_or_else(|_| chrono::Duration::zero());
            info!(
                at = %kill.timestamp,
                send_at = %send_at.format("%H:%M:%S"),
                "Queued message: {text}"
            );
            self.queue.enqueue(text, due_at);
            queued += 1;
        }
        queued
    }
}

/// Intervals driving [`run`].
#[derive(Debug, Clone, Copy)]
pub struct TailTimings {
    pub poll_interval: Duration,
    pub file_check_interval: Duration,
}

/// Drives `tailer` until `stop_rx` flips to `true`.
///
/// File changes are reported on `events`. A path received on `hints` triggers
/// an immediate discovery pass. Work inside a tick always runs to completion,
/// so lines already read are queued before the loop stops.
pub async fn run(
    mut tailer: Tailer,
    timings: TailTimings,
    mut hints: mpsc::Receiver<PathBuf>,
    events: mpsc::Sender<DaemonEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    info!(dir = %tailer.directory.display(), "Starting ADM file monitoring");

    let mut poll_ticker = interval(timings.poll_interval);
    poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut check_ticker = interval(timings.file_check_interval);
    check_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut hints_open = true;

    loop {
        let change = tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                None
            }
            _ = check_ticker.tick() => tailer.check_for_newer_file(),
            hint = hints.recv(), if hints_open => match hint {
                Some(path) => {
                    debug!(path = %path.display(), "Rescanning after filesystem notification");
                    tailer.check_for_newer_file()
                }
                None => {
                    hints_open = false;
                    None
                }
            },
            _ = poll_ticker.tick() => {
                tailer.poll(Instant::now());
                None
            }
        };

        let event = match change {
            Some(FileChange::Started(path)) => DaemonEvent::TrackingStarted(path),
            Some(FileChange::Switched { from, to }) => DaemonEvent::FileSwitched { from, to },
            None => continue,
        };
        if events.send(event).await.is_err() {
            break;
        }
    }

    debug!(state = ?tailer.state(), "Tail loop stopped");
}
