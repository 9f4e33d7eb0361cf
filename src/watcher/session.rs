//! Watch session: the event loop that grows and prunes the watch set.
//!
//! A session registers its root (and, in recursive mode, every directory
//! below it), then repeatedly:
//! 1. Blocks for the next batch of raw events
//! 2. Resolves the batch's handle to its directory
//! 3. Forwards each event to the consumer
//! 4. Registers newly created subdirectories (recursive mode only)
//! 5. Re-arms the handle, pruning it once the backend reports it invalid
//!
//! The session ends when the watch set is empty, on a fatal error, or on
//! cancellation. The backend is released exactly once on every path.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::consumer::{Disconnected, WatchConsumer};
use super::error::WatchError;
use super::event::{DirectoryEvent, EventBatch, EventKind, RawEvent};
use super::notify_backend::{Backend, NotifyResource};
use super::registry::WatchRegistry;
use super::resource::{CancelToken, Wait, WatchResource};

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Completing,
    Failed,
    Cancelled,
    Closed,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Nothing was left to watch; `on_complete` was delivered.
    Completed,
    /// A fatal error was delivered through `on_error`.
    Failed,
    /// Cancelled externally or by the consumer; no terminal signal.
    Cancelled,
}

enum LoopExit {
    Exhausted,
    Cancelled,
}

/// One observation session over a root directory.
pub struct WatchSession<R: WatchResource> {
    root: PathBuf,
    recursive: bool,
    registry: WatchRegistry<R>,
    state: SessionState,
}

impl WatchSession<NotifyResource> {
    /// Create a builder for a session on the `notify` backend.
    pub fn builder() -> WatchSessionBuilder {
        WatchSessionBuilder::new()
    }
}

impl<R: WatchResource> WatchSession<R> {
    /// Create a session over an already opened backend.
    pub fn new(root: impl Into<PathBuf>, recursive: bool, resource: R) -> Self {
        Self {
            root: root.into(),
            recursive,
            registry: WatchRegistry::new(resource),
            state: SessionState::Starting,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to completion on the calling thread.
    ///
    /// Blocks inside the backend between batches; `cancel` interrupts that
    /// wait. The backend is closed before the terminal signal is delivered.
    pub fn run<C>(mut self, consumer: &mut C, cancel: &CancelToken) -> SessionOutcome
    where
        C: WatchConsumer + ?Sized,
    {
        crate::log_event!(
            "session",
            "starting",
            "{} (recursive: {})",
            self.root.display(),
            self.recursive
        );

        let exit = match self.start() {
            Ok(count) => {
                self.transition(SessionState::Running);
                crate::log_event!("session", "watching", "{count} directories");
                self.event_loop(consumer, cancel)
            }
            Err(e) => Err(e),
        };

        let terminal = match &exit {
            Ok(LoopExit::Exhausted) => SessionState::Completing,
            Ok(LoopExit::Cancelled) => SessionState::Cancelled,
            Err(_) => SessionState::Failed,
        };
        self.transition(terminal);
        self.registry.close();

        let outcome = match exit {
            Ok(LoopExit::Exhausted) => {
                consumer.on_complete();
                SessionOutcome::Completed
            }
            Ok(LoopExit::Cancelled) => SessionOutcome::Cancelled,
            Err(e) => {
                tracing::error!("[session] {e}");
                consumer.on_error(e);
                SessionOutcome::Failed
            }
        };

        tracing::debug!("[session] {terminal:?} -> {:?}", SessionState::Closed);
        crate::log_event!("session", "closed", "{outcome:?}");
        outcome
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!("[session] {:?} -> {next:?}", self.state);
        self.state = next;
    }

    /// Initial registration. Any failure here is fatal.
    fn start(&mut self) -> Result<usize, WatchError> {
        if self.recursive {
            self.registry.register_tree(&self.root)
        } else {
            self.registry.register(&self.root).map(|_| 1)
        }
    }

    fn event_loop<C>(
        &mut self,
        consumer: &mut C,
        cancel: &CancelToken,
    ) -> Result<LoopExit, WatchError>
    where
        C: WatchConsumer + ?Sized,
    {
        loop {
            let EventBatch { handle, events } = match self.registry.next_batch(cancel)? {
                Wait::Batch(batch) => batch,
                Wait::Cancelled => return Ok(LoopExit::Cancelled),
            };

            match self.registry.resolve(handle)?.map(Path::to_path_buf) {
                Some(directory) => {
                    for raw in events {
                        if self.forward(&directory, raw, consumer).is_err() {
                            crate::debug_event!("session", "consumer disconnected");
                            return Ok(LoopExit::Cancelled);
                        }
                    }
                }
                None => {
                    crate::debug_event!(
                        "session",
                        "dropped batch",
                        "{} events for retired handle {handle}",
                        events.len()
                    );
                }
            }

            if !self.registry.reset(handle) {
                if let Some(dir) = self.registry.invalidate(handle) {
                    crate::debug_event!("session", "no longer watching", "{}", dir.display());
                }
                if self.registry.is_empty() {
                    crate::log_event!("session", "watch set empty");
                    return Ok(LoopExit::Exhausted);
                }
            }
        }
    }

    /// Deliver one event and grow the watch set if it created a directory.
    fn forward<C>(
        &mut self,
        directory: &Path,
        raw: RawEvent,
        consumer: &mut C,
    ) -> Result<(), Disconnected>
    where
        C: WatchConsumer + ?Sized,
    {
        let child = directory.join(&raw.context);
        let kind = raw.kind;

        consumer.on_event(DirectoryEvent {
            kind,
            context: raw.context,
            directory: directory.to_path_buf(),
        })?;

        if self.recursive && kind == EventKind::Create && is_real_directory(&child) {
            match self.registry.register_tree(&child) {
                Ok(count) => {
                    crate::debug_event!(
                        "session",
                        "grew",
                        "{count} directories under {}",
                        child.display()
                    );
                }
                Err(e) => {
                    tracing::warn!("[session] failed to watch new directory: {e}");
                    consumer.on_warning(e)?;
                }
            }
        }

        Ok(())
    }
}

/// Directory check that does not follow symlinks.
fn is_real_directory(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

/// Builder for constructing a [`WatchSession`].
#[derive(Debug, Clone)]
pub struct WatchSessionBuilder {
    root: Option<PathBuf>,
    recursive: bool,
    backend: Backend,
}

impl WatchSessionBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            root: None,
            recursive: false,
            backend: Backend::Native,
        }
    }

    /// Set the root directory.
    pub fn root(mut self, path: impl Into<PathBuf>) -> Self {
        self.root = Some(path.into());
        self
    }

    /// Also watch every current and future subdirectory.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Select the notify backend.
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Use the polling backend with the given interval.
    pub fn poll_interval(self, interval: Duration) -> Self {
        self.backend(Backend::Poll { interval })
    }

    /// Open the configured notify backend and build the session.
    pub fn build(self) -> Result<WatchSession<NotifyResource>, WatchError> {
        let resource = NotifyResource::open(self.backend)?;
        self.build_with(resource)
    }

    /// Build the session over a caller-supplied backend.
    pub fn build_with<R: WatchResource>(self, resource: R) -> Result<WatchSession<R>, WatchError> {
        let root = self.root.ok_or_else(|| WatchError::InitFailed {
            reason: "Root directory is required".to_string(),
        })?;
        Ok(WatchSession::new(root, self.recursive, resource))
    }
}

impl Default for WatchSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
