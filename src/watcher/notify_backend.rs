//! [`WatchResource`] backed by the `notify` crate.
//!
//! Every registration is an individual non-recursive notify watch, so the
//! watch set itself is owned by the registry rather than by notify. Raw
//! notify events are delivered on a crossbeam channel, attributed to the
//! handle of their parent directory, and queued as per-handle batches.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, PollWatcher, RecursiveMode, Watcher};

use super::error::WatchError;
use super::event::{EventBatch, EventKind, RawEvent, WatchHandle};
use super::resource::{CancelToken, Wait, WatchResource};

/// Minimum time `close` waits for the backend thread to shut down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// How many recent renames and directory removals are remembered for
/// de-duplication.
const RECENT_CAPACITY: usize = 256;

/// Which notify implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// The platform's native mechanism (inotify, FSEvents, kqueue, ...).
    Native,
    /// Periodic directory scans.
    Poll { interval: Duration },
}

/// Directory watches on top of a single notify watcher.
pub struct NotifyResource {
    watcher: Option<Box<dyn Watcher + Send>>,
    events: Receiver<notify::Result<notify::Event>>,
    close_timeout: Duration,
    next_id: u64,
    /// Canonical directory -> live handle.
    by_dir: HashMap<PathBuf, WatchHandle>,
    /// Handle -> canonical directory.
    dirs: HashMap<WatchHandle, PathBuf>,
    invalid: HashSet<WatchHandle>,
    /// Watched directories whose removal was already reported. The OS may
    /// report the same removal from the parent's and the directory's own
    /// watch.
    removed_dirs: VecDeque<PathBuf>,
    /// Rename cookies and the halves already translated. inotify reports a
    /// rename as `From`, `To` and a combined `Both`.
    renames: VecDeque<(usize, RenameSeen)>,
    pending: VecDeque<EventBatch>,
}

#[derive(Debug, Default, Clone, Copy)]
struct RenameSeen {
    /// Which of the `From`, `To` and `Both` reports arrived.
    reports: [bool; 3],
    from_done: bool,
    to_done: bool,
}

impl NotifyResource {
    /// Open the OS watch resource.
    pub fn open(backend: Backend) -> Result<Self, WatchError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handler = move |res: notify::Result<notify::Event>| {
            let _ = tx.send(res);
        };

        let (watcher, close_timeout) = match backend {
            Backend::Native => {
                let watcher = notify::recommended_watcher(handler)?;
                (Box::new(watcher) as Box<dyn Watcher + Send>, CLOSE_TIMEOUT)
            }
            Backend::Poll { interval } => {
                let config = Config::default().with_poll_interval(interval);
                let watcher = PollWatcher::new(handler, config)?;
                (
                    Box::new(watcher) as Box<dyn Watcher + Send>,
                    CLOSE_TIMEOUT.max(interval * 2),
                )
            }
        };
        crate::debug_event!("notify", "opened", "{backend:?}");

        Ok(Self {
            watcher: Some(watcher),
            events: rx,
            close_timeout,
            next_id: 1,
            by_dir: HashMap::new(),
            dirs: HashMap::new(),
            invalid: HashSet::new(),
            removed_dirs: VecDeque::new(),
            renames: VecDeque::new(),
            pending: VecDeque::new(),
        })
    }

    /// Translate one notify event into queued raw events.
    fn ingest(&mut self, res: notify::Result<notify::Event>) {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("[notify] file watch error: {e}");
                return;
            }
        };

        if event.need_rescan() {
            tracing::warn!("[notify] event queue overflowed, some changes were missed");
        }

        match event.kind {
            notify::EventKind::Create(_) => {
                for path in &event.paths {
                    self.push(path, EventKind::Create);
                }
            }
            notify::EventKind::Remove(_) => {
                for path in &event.paths {
                    self.removed(path);
                }
            }
            notify::EventKind::Modify(ModifyKind::Name(mode)) => match mode {
                RenameMode::From => {
                    let (from_new, _) = self.claim_rename(event.attrs.tracker(), mode);
                    if from_new {
                        for path in &event.paths {
                            self.removed(path);
                        }
                    }
                }
                RenameMode::To => {
                    let (_, to_new) = self.claim_rename(event.attrs.tracker(), mode);
                    if to_new {
                        for path in &event.paths {
                            self.push(path, EventKind::Create);
                        }
                    }
                }
                RenameMode::Both => {
                    let (from_new, to_new) = self.claim_rename(event.attrs.tracker(), mode);
                    if let [from, to] = event.paths.as_slice() {
                        if from_new {
                            self.removed(from);
                        }
                        if to_new {
                            self.push(to, EventKind::Create);
                        }
                    }
                }
                RenameMode::Any | RenameMode::Other => {
                    for path in &event.paths {
                        if path.symlink_metadata().is_ok() {
                            self.push(path, EventKind::Create);
                        } else {
                            self.removed(path);
                        }
                    }
                }
            },
            notify::EventKind::Modify(_) => {
                for path in &event.paths {
                    self.push(path, EventKind::Modify);
                }
            }
            other => {
                tracing::trace!("[notify] ignoring {other:?}");
            }
        }
    }

    /// Queue `kind` for `path` under its parent's handle.
    fn push(&mut self, path: &Path, kind: EventKind) {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return;
        };
        let Some(&handle) = self.by_dir.get(parent) else {
            tracing::trace!("[notify] unwatched parent for {}", path.display());
            return;
        };

        if kind == EventKind::Create {
            self.forget_removed(path);
        }

        let raw = RawEvent::new(kind, name);
        match self.pending.back_mut() {
            Some(batch) if batch.handle == handle => batch.events.push(raw),
            _ => self.pending.push_back(EventBatch {
                handle,
                events: vec![raw],
            }),
        }
    }

    /// `path` disappeared or was renamed away. Retires the watches on it and
    /// on every directory below it.
    fn removed(&mut self, path: &Path) {
        if self.forget_removed(path) {
            // second report of an already handled directory removal
            return;
        }

        self.push(path, EventKind::Delete);

        let mut gone: Vec<PathBuf> = self
            .by_dir
            .keys()
            .filter(|dir| dir.starts_with(path))
            .cloned()
            .collect();
        if gone.is_empty() {
            return;
        }
        gone.sort();

        if self.by_dir.contains_key(path) {
            self.remember_removed(path.to_path_buf());
        }
        for dir in gone {
            if let Some(handle) = self.by_dir.remove(&dir) {
                if let Some(watcher) = self.watcher.as_mut() {
                    // the OS usually dropped the watch already
                    let _ = watcher.unwatch(&dir);
                }
                self.retire(handle);
                crate::debug_event!("notify", "watch invalidated", "{}", dir.display());
            }
        }
    }

    /// Mark `handle` invalid and queue an empty batch so the session
    /// re-checks it.
    fn retire(&mut self, handle: WatchHandle) {
        self.invalid.insert(handle);
        self.pending.push_back(EventBatch::new(handle));
    }

    fn remember_removed(&mut self, dir: PathBuf) {
        if self.removed_dirs.len() == RECENT_CAPACITY {
            self.removed_dirs.pop_front();
        }
        self.removed_dirs.push_back(dir);
    }

    /// Drop `dir` from the recently removed list; `true` if it was there.
    fn forget_removed(&mut self, dir: &Path) -> bool {
        match self.removed_dirs.iter().position(|d| d == dir) {
            Some(pos) => {
                self.removed_dirs.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Record one report of a rename and return which of its halves (old
    /// name gone, new name present) were not translated yet. Reports without
    /// a cookie cannot be matched and are always translated.
    fn claim_rename(&mut self, tracker: Option<usize>, mode: RenameMode) -> (bool, bool) {
        let (wants_from, wants_to, report) = match mode {
            RenameMode::From => (true, false, 0),
            RenameMode::To => (false, true, 1),
            _ => (true, true, 2),
        };
        let Some(tracker) = tracker else {
            return (wants_from, wants_to);
        };

        let mut seen = match self.renames.iter().position(|(t, _)| *t == tracker) {
            Some(pos) => self
                .renames
                .remove(pos)
                .map(|(_, seen)| seen)
                .unwrap_or_default(),
            None => RenameSeen::default(),
        };
        let claimed = (wants_from && !seen.from_done, wants_to && !seen.to_done);
        seen.from_done |= wants_from;
        seen.to_done |= wants_to;
        seen.reports[report] = true;

        // keep the cookie until all three reports arrived
        if !seen.reports.iter().all(|arrived| *arrived) {
            if self.renames.len() == RECENT_CAPACITY {
                self.renames.pop_front();
            }
            self.renames.push_back((tracker, seen));
        }
        claimed
    }
}

impl WatchResource for NotifyResource {
    fn register(&mut self, dir: &Path) -> Result<WatchHandle, WatchError> {
        let meta = fs::metadata(dir).map_err(|e| WatchError::registration(dir, e))?;
        if !meta.is_dir() {
            return Err(WatchError::registration(dir, "not a directory"));
        }
        let canonical = fs::canonicalize(dir).map_err(|e| WatchError::registration(dir, e))?;

        let watcher = self
            .watcher
            .as_mut()
            .ok_or_else(|| WatchError::registration(dir, "watcher is closed"))?;
        watcher
            .watch(&canonical, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::registration(dir, e))?;

        let handle = WatchHandle::from_raw(self.next_id);
        self.next_id += 1;
        if let Some(previous) = self.by_dir.insert(canonical.clone(), handle) {
            // notify keeps a single watch per path, now owned by `handle`
            self.retire(previous);
            crate::debug_event!(
                "notify",
                "re-registered",
                "{} ({previous} superseded by {handle})",
                canonical.display()
            );
        }
        self.forget_removed(&canonical);
        self.dirs.insert(handle, canonical);
        Ok(handle)
    }

    fn next_batch(&mut self, cancel: &CancelToken) -> Result<Wait, WatchError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(Wait::Cancelled);
            }
            if let Some(batch) = self.pending.pop_front() {
                return Ok(Wait::Batch(batch));
            }

            let received = crossbeam_channel::select! {
                recv(self.events) -> msg => Some(msg),
                recv(cancel.receiver()) -> _ => None,
            };
            match received {
                Some(Ok(res)) => self.ingest(res),
                Some(Err(_)) => {
                    return Err(WatchError::Wait {
                        reason: "notify event channel disconnected".to_string(),
                    });
                }
                None => return Ok(Wait::Cancelled),
            }

            // pick up everything that is already queued
            while let Ok(res) = self.events.try_recv() {
                self.ingest(res);
            }
        }
    }

    fn reset(&mut self, handle: WatchHandle) -> bool {
        if self.invalid.remove(&handle) {
            self.dirs.remove(&handle);
            return false;
        }
        self.dirs.contains_key(&handle)
    }

    fn close(&mut self) {
        let Some(watcher) = self.watcher.take() else {
            return;
        };
        drop(watcher);
        self.by_dir.clear();
        self.dirs.clear();
        self.pending.clear();
        self.removed_dirs.clear();
        self.renames.clear();

        // The backend thread owns the sender; once it disconnects, the OS
        // handle has been released.
        let deadline = Instant::now() + self.close_timeout;
        loop {
            match self.events.recv_deadline(deadline) {
                Ok(_) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        "[notify] backend did not shut down within {:?}",
                        self.close_timeout
                    );
                    break;
                }
            }
        }
        crate::debug_event!("notify", "closed");
    }
}

impl fmt::Debug for NotifyResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyResource")
            .field("open", &self.watcher.is_some())
            .field("watches", &self.dirs.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl Drop for NotifyResource {
    fn drop(&mut self) {
        self.close();
    }
}
