//! Filesystem watching for the quarry engine
//!
//! Wraps a platform watcher and turns its raw event stream into debounced
//! batches of [`PathEvent`]s. Editors and build tools emit bursts of
//! events for a single logical change; batching lets the engine run one
//! invalidation walk per burst instead of one per event. Delivery is
//! at-least-once: re-verification downstream makes duplicates harmless.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use quarry_types::{ChangeKind, PathEvent};
use std::path::Path;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while setting up or adjusting a watch.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The underlying platform watcher failed.
    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Watcher configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Quiet period that closes a batch. Events arriving within this
    /// window of each other are delivered together.
    pub debounce: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            debounce: Duration::from_millis(100),
        }
    }
}

/// A recursive filesystem watcher delivering debounced event batches.
///
/// Dropping the watcher stops the stream; the receiver then disconnects
/// after the final batch.
pub struct PathWatcher {
    watcher: RecommendedWatcher,
}

impl PathWatcher {
    /// Start a watcher. Returns the handle and the batch receiver.
    ///
    /// No paths are watched until [`PathWatcher::watch`] is called.
    pub fn new(config: WatchConfig) -> Result<(Self, Receiver<Vec<PathEvent>>), WatchError> {
        let (raw_tx, raw_rx) = channel::<notify::Result<Event>>();
        let (batch_tx, batch_rx) = channel();

        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )?;

        std::thread::Builder::new()
            .name("quarry-watch".to_string())
            .spawn(move || collect_batches(raw_rx, batch_tx, config.debounce))
            .expect("failed to spawn watch collector thread");

        Ok((PathWatcher { watcher }, batch_rx))
    }

    /// Watch a path recursively.
    pub fn watch(&mut self, path: &Path) -> Result<(), WatchError> {
        self.watcher.watch(path, RecursiveMode::Recursive)?;
        tracing::debug!(path = %path.display(), "watching");
        Ok(())
    }

    /// Stop watching a previously watched path.
    pub fn unwatch(&mut self, path: &Path) -> Result<(), WatchError> {
        self.watcher.unwatch(path)?;
        Ok(())
    }
}

impl std::fmt::Debug for PathWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathWatcher").finish_non_exhaustive()
    }
}

/// Drains the raw stream into quiet-period batches. Exits when the
/// watcher (raw sender) or the consumer (batch receiver) goes away.
fn collect_batches(
    raw: Receiver<notify::Result<Event>>,
    batches: Sender<Vec<PathEvent>>,
    debounce: Duration,
) {
    loop {
        let first = match raw.recv() {
            Ok(res) => res,
            Err(_) => return,
        };

        let mut pending = Vec::new();
        absorb(first, &mut pending);
        loop {
            match raw.recv_timeout(debounce) {
                Ok(res) => absorb(res, &mut pending),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let batch = coalesce(pending);
        if !batch.is_empty() && batches.send(batch).is_err() {
            return;
        }
    }
}

fn absorb(res: notify::Result<Event>, pending: &mut Vec<PathEvent>) {
    match res {
        Ok(event) => {
            // Access events carry no content change.
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            let kind = map_kind(&event.kind);
            for path in event.paths {
                pending.push(PathEvent { path, kind });
            }
        }
        Err(err) => tracing::warn!(%err, "file watcher error"),
    }
}

fn map_kind(kind: &EventKind) -> ChangeKind {
    match kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Renamed,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Removed,
        _ => ChangeKind::Other,
    }
}

/// Collapse a burst to one event per path, keeping the latest kind and
/// first-seen order.
fn coalesce(events: Vec<PathEvent>) -> Vec<PathEvent> {
    let mut out: Vec<PathEvent> = Vec::new();
    for event in events {
        match out.iter_mut().find(|e| e.path == event.path) {
            Some(existing) => existing.kind = event.kind,
            None => out.push(event),
        }
    }
    out
}
