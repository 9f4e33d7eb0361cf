//! The OS watch primitive as seen by the registry and the session.

use std::path::Path;

use crossbeam_channel::{Receiver, Sender};

use super::error::WatchError;
use super::event::{EventBatch, WatchHandle};

/// Outcome of one blocking wait on a [`WatchResource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wait {
    /// Pending events for one handle.
    Batch(EventBatch),
    /// The cancel token fired while waiting.
    Cancelled,
}

/// Capability set of a directory-watch backend.
///
/// Implementations own the OS-level resource (inotify instance, kqueue,
/// FSEvents stream, polling thread). A single session thread drives a
/// resource, so no method needs interior synchronization.
pub trait WatchResource {
    /// Start watching `dir` for create/modify/delete of its direct entries.
    ///
    /// Each successful call returns a handle greater than every handle
    /// issued before it.
    fn register(&mut self, dir: &Path) -> Result<WatchHandle, WatchError>;

    /// Block until some handle has pending events or `cancel` fires.
    fn next_batch(&mut self, cancel: &CancelToken) -> Result<Wait, WatchError>;

    /// Re-arm `handle` after its batch was processed. Returns `false` once the
    /// watch is no longer valid.
    fn reset(&mut self, handle: WatchHandle) -> bool;

    /// Release the OS resource.
    fn close(&mut self);
}

impl<R: WatchResource + ?Sized> WatchResource for Box<R> {
    fn register(&mut self, dir: &Path) -> Result<WatchHandle, WatchError> {
        (**self).register(dir)
    }

    fn next_batch(&mut self, cancel: &CancelToken) -> Result<Wait, WatchError> {
        (**self).next_batch(cancel)
    }

    fn reset(&mut self, handle: WatchHandle) -> bool {
        (**self).reset(handle)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Receiving side of a cancellation signal.
///
/// Fires once its [`Canceller`] is cancelled or dropped. Backends select on
/// [`CancelToken::receiver`] alongside their event source.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

/// Sending side of a cancellation signal.
#[derive(Debug)]
pub struct Canceller {
    _tx: Sender<()>,
}

impl CancelToken {
    /// A linked canceller/token pair.
    pub fn pair() -> (Canceller, CancelToken) {
        let (tx, rx) = crossbeam_channel::bounded(0);
        (Canceller { _tx: tx }, CancelToken { rx })
    }

    /// A token that never fires.
    pub fn never() -> Self {
        Self {
            rx: crossbeam_channel::never(),
        }
    }

    /// Becomes ready (with a disconnect error) once cancelled.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.rx.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        )
    }
}

impl Canceller {
    /// Fire the linked token.
    pub fn cancel(self) {
        drop(self);
    }
}
