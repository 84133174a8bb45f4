//! Filesystem change notification.
//!
//! [`PathWatcher`] wraps one of three backends: none (watching unavailable or
//! disabled), the platform's native watcher (inotify on Linux) or a polling
//! watcher for filesystems that do not deliver native events. Events are
//! buffered on a channel and only surface when [`PathWatcher::poll_events`]
//! is called, so callbacks always run on the caller's thread.

use crate::utils::errors::Result;
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::BitOr;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;
use tracing::{debug, warn};

/// Kinds of change a watch is interested in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventMask(u32);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const CREATE: EventMask = EventMask(0x1);
    pub const DELETE: EventMask = EventMask(0x2);
    pub const MODIFY: EventMask = EventMask(0x4);
    pub const ALL: EventMask = EventMask(0x7);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn intersects(self, other: EventMask) -> bool {
        self.0 & other.0 != 0
    }

    fn from_kind(kind: &EventKind) -> EventMask {
        match kind {
            EventKind::Create(_) => EventMask::CREATE,
            EventKind::Remove(_) => EventMask::DELETE,
            EventKind::Modify(_) => EventMask::MODIFY,
            EventKind::Any => EventMask::ALL,
            EventKind::Access(_) | EventKind::Other => EventMask::NONE,
        }
    }
}

impl Default for EventMask {
    /// Creations, deletions and modifications
    fn default() -> Self {
        EventMask::ALL
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

/// Identifies one registered watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(u64);

/// A change observed under a watched path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub handle: WatchHandle,
    pub path: PathBuf,
    pub mask: EventMask,
}

/// Which backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    None,
    #[default]
    Native,
    Poll,
}

pub type WatchCallback = Box<dyn FnMut(&WatchEvent) + Send>;

enum Backend {
    Noop,
    Native(RecommendedWatcher),
    Poll(PollWatcher),
}

struct Watch {
    handle: WatchHandle,
    canonical: PathBuf,
    mask: EventMask,
    callback: Option<WatchCallback>,
}

pub struct PathWatcher {
    backend: Backend,
    events: Receiver<notify::Result<Event>>,
    watches: HashMap<PathBuf, Watch>,
    next_handle: u64,
}

impl PathWatcher {
    /// Create a watcher for `mode`. `poll_interval` only applies to polling.
    pub fn new(mode: WatchMode, poll_interval: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::channel();

        let backend = match mode {
            WatchMode::None => Backend::Noop,
            WatchMode::Native => Backend::Native(RecommendedWatcher::new(
                tx,
                notify::Config::default(),
            )?),
            WatchMode::Poll => Backend::Poll(PollWatcher::new(
                tx,
                notify::Config::default().with_poll_interval(poll_interval),
            )?),
        };

        Ok(Self {
            backend,
            events: rx,
            watches: HashMap::new(),
            next_handle: 1,
        })
    }

    /// A watcher that never reports anything
    pub fn noop() -> Self {
        let (_tx, rx) = mpsc::channel();
        Self {
            backend: Backend::Noop,
            events: rx,
            watches: HashMap::new(),
            next_handle: 1,
        }
    }

    /// Try `mode`, falling back to no watching when the backend cannot start
    pub fn available_or_noop(mode: WatchMode, poll_interval: Duration) -> Self {
        match Self::new(mode, poll_interval) {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!(error = %e, ?mode, "File watching unavailable, continuing without it");
                Self::noop()
            }
        }
    }

    pub fn mode(&self) -> WatchMode {
        match self.backend {
            Backend::Noop => WatchMode::None,
            Backend::Native(_) => WatchMode::Native,
            Backend::Poll(_) => WatchMode::Poll,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.backend, Backend::Noop)
    }

    /// Watch `path` recursively. Watching an already watched path replaces its
    /// mask and callback but keeps its handle. Returns None without a backend.
    pub fn watch(
        &mut self,
        path: &Path,
        mask: EventMask,
        callback: Option<WatchCallback>,
    ) -> Result<Option<WatchHandle>> {
        if let Some(existing) = self.watches.get_mut(path) {
            existing.mask = mask;
            existing.callback = callback;
            return Ok(Some(existing.handle));
        }

        match &mut self.backend {
            Backend::Noop => return Ok(None),
            Backend::Native(w) => w.watch(path, RecursiveMode::Recursive)?,
            Backend::Poll(w) => w.watch(path, RecursiveMode::Recursive)?,
        }

        let handle = WatchHandle(self.next_handle);
        self.next_handle += 1;

        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.watches.insert(
            path.to_path_buf(),
            Watch {
                handle,
                canonical,
                mask,
                callback,
            },
        );

        debug!(path = %path.display(), ?handle, "Watching path");
        Ok(Some(handle))
    }

    /// Stop watching `path`. Returns false if it was not watched.
    pub fn unwatch(&mut self, path: &Path) -> Result<bool> {
        if self.watches.remove(path).is_none() {
            return Ok(false);
        }

        match &mut self.backend {
            Backend::Noop => {}
            Backend::Native(w) => w.unwatch(path)?,
            Backend::Poll(w) => w.unwatch(path)?,
        }

        debug!(path = %path.display(), "Stopped watching path");
        Ok(true)
    }

    pub fn watched_paths(&self) -> impl Iterator<Item = &Path> {
        self.watches.keys().map(PathBuf::as_path)
    }

    /// Wait up to `timeout` for changes, then drain everything queued.
    /// Callbacks run here, once per matching event.
    pub fn poll_events(&mut self, timeout: Duration) -> Vec<WatchEvent> {
        if !self.is_available() {
            return Vec::new();
        }

        let mut raw = match self.events.recv_timeout(timeout) {
            Ok(first) => vec![first],
            Err(_) => return Vec::new(),
        };
        raw.extend(self.events.try_iter());

        let mut events = Vec::new();
        for result in raw {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Watcher reported an error");
                    continue;
                }
            };

            let mask = EventMask::from_kind(&event.kind);
            if mask.is_empty() {
                continue;
            }

            for path in &event.paths {
                let Some(watch) = self.owning_watch(path) else {
                    continue;
                };
                if !watch.mask.intersects(mask) {
                    continue;
                }

                let observed = WatchEvent {
                    handle: watch.handle,
                    path: path.clone(),
                    mask,
                };
                if let Some(callback) = watch.callback.as_mut() {
                    callback(&observed);
                }
                events.push(observed);
            }
        }

        events
    }

    /// Drop every watch. Safe to call more than once.
    pub fn release(&mut self) {
        let paths: Vec<PathBuf> = self.watches.keys().cloned().collect();
        for path in paths {
            if let Err(e) = self.unwatch(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove watch");
            }
        }
    }

    /// Deepest watched root containing `path`
    fn owning_watch(&mut self, path: &Path) -> Option<&mut Watch> {
        self.watches
            .iter_mut()
            .filter(|(root, watch)| path.starts_with(root) || path.starts_with(&watch.canonical))
            .max_by_key(|(root, _)| root.components().count())
            .map(|(_, watch)| watch)
    }
}

impl Drop for PathWatcher {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PathWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathWatcher")
            .field("mode", &self.mode())
            .field("watches", &self.watches.len())
            .finish()
    }
}
