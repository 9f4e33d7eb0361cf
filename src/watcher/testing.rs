//! In-memory backend for unit tests.
//!
//! Steps are written against directory paths; a step for a directory that
//! has no live registration is dropped, just as the OS would never report
//! events for an unwatched directory.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::error::WatchError;
use super::event::{EventBatch, EventKind, RawEvent, WatchHandle};
use super::resource::{CancelToken, Wait, WatchResource};

pub(crate) enum Step {
    /// Events observed in `dir`.
    Events(PathBuf, Vec<RawEvent>),
    /// The watch on `dir` became invalid.
    Invalidate(PathBuf),
    /// A batch for an arbitrary handle.
    Raw(EventBatch),
    /// Side effect executed before the next step is read.
    Run(Box<dyn FnOnce() + Send>),
    /// The blocking wait fails.
    Fail(String),
}

pub(crate) struct ScriptedResource {
    next_id: u64,
    refused: HashSet<PathBuf>,
    live: HashMap<PathBuf, WatchHandle>,
    invalid: HashSet<WatchHandle>,
    script: VecDeque<Step>,
    registrations: Arc<Mutex<Vec<PathBuf>>>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedResource {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            refused: HashSet::new(),
            live: HashMap::new(),
            invalid: HashSet::new(),
            script: VecDeque::new(),
            registrations: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make `register` fail for `path`.
    pub fn refuse(mut self, path: impl Into<PathBuf>) -> Self {
        self.refused.insert(path.into());
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.script.push_back(step);
        self
    }

    pub fn events(self, dir: impl Into<PathBuf>, events: Vec<RawEvent>) -> Self {
        self.step(Step::Events(dir.into(), events))
    }

    pub fn invalidate(self, dir: impl Into<PathBuf>) -> Self {
        self.step(Step::Invalidate(dir.into()))
    }

    pub fn run(self, f: impl FnOnce() + Send + 'static) -> Self {
        self.step(Step::Run(Box::new(f)))
    }

    /// Paths passed to `register`, in call order.
    pub fn registrations(&self) -> Arc<Mutex<Vec<PathBuf>>> {
        Arc::clone(&self.registrations)
    }

    pub fn close_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }
}

pub(crate) fn create(name: &str) -> RawEvent {
    RawEvent::new(EventKind::Create, name)
}

pub(crate) fn modify(name: &str) -> RawEvent {
    RawEvent::new(EventKind::Modify, name)
}

pub(crate) fn delete(name: &str) -> RawEvent {
    RawEvent::new(EventKind::Delete, name)
}

impl WatchResource for ScriptedResource {
    fn register(&mut self, dir: &Path) -> Result<WatchHandle, WatchError> {
        if self.refused.contains(dir) {
            return Err(WatchError::registration(dir, "permission denied"));
        }
        let handle = WatchHandle::from_raw(self.next_id);
        self.next_id += 1;
        self.live.insert(dir.to_path_buf(), handle);
        self.registrations.lock().unwrap().push(dir.to_path_buf());
        Ok(handle)
    }

    fn next_batch(&mut self, cancel: &CancelToken) -> Result<Wait, WatchError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(Wait::Cancelled);
            }
            let Some(step) = self.script.pop_front() else {
                return Ok(Wait::Cancelled);
            };
            match step {
                Step::Events(dir, events) => {
                    if let Some(&handle) = self.live.get(&dir) {
                        return Ok(Wait::Batch(EventBatch { handle, events }));
                    }
                }
                Step::Invalidate(dir) => {
                    if let Some(handle) = self.live.remove(&dir) {
                        self.invalid.insert(handle);
                        return Ok(Wait::Batch(EventBatch::new(handle)));
                    }
                }
                Step::Raw(batch) => return Ok(Wait::Batch(batch)),
                Step::Run(f) => f(),
                Step::Fail(reason) => return Err(WatchError::Wait { reason }),
            }
        }
    }

    fn reset(&mut self, handle: WatchHandle) -> bool {
        !self.invalid.contains(&handle) && self.live.values().any(|h| *h == handle)
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
