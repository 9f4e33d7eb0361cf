//! Running a session off the caller's thread.
//!
//! [`Subscription`] drives a session on a dedicated OS thread and hands
//! signals over a crossbeam channel. [`AsyncSubscription`] does the same on
//! tokio's blocking pool with a tokio channel.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tokio::sync::mpsc;

use super::consumer::WatchSignal;
use super::error::WatchError;
use super::resource::{CancelToken, Canceller, WatchResource};
use super::session::{SessionOutcome, WatchSession};

/// Buffer size for the async signal channel.
const ASYNC_BUFFER: usize = 256;

/// A session running on its own thread.
///
/// Dropping the subscription cancels the session and waits for the thread,
/// so the OS watch resource is released when the drop returns.
#[derive(Debug)]
pub struct Subscription {
    signals: Receiver<WatchSignal>,
    canceller: Option<Canceller>,
    worker: Option<JoinHandle<SessionOutcome>>,
}

impl Subscription {
    /// Start `session` on a new thread.
    pub fn spawn<R>(session: WatchSession<R>) -> Result<Self, WatchError>
    where
        R: WatchResource + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (canceller, token) = CancelToken::pair();

        let worker = thread::Builder::new()
            .name("treewatch session".to_string())
            .spawn(move || {
                let mut tx = tx;
                session.run(&mut tx, &token)
            })
            .map_err(|e| WatchError::InitFailed {
                reason: format!("failed to spawn session thread: {e}"),
            })?;

        Ok(Self {
            signals: rx,
            canceller: Some(canceller),
            worker: Some(worker),
        })
    }

    /// Next signal; `None` once the session has ended and every signal was
    /// received.
    pub fn recv(&self) -> Option<WatchSignal> {
        self.signals.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<WatchSignal, RecvTimeoutError> {
        self.signals.recv_timeout(timeout)
    }

    /// Blocking iterator over the remaining signals.
    pub fn iter(&self) -> impl Iterator<Item = WatchSignal> + '_ {
        self.signals.iter()
    }

    /// Cancel the session and wait for it to release its resources.
    ///
    /// Returns how the session ended; a session that already completed or
    /// failed reports that instead of `Cancelled`.
    pub fn cancel(mut self) -> SessionOutcome {
        self.shutdown()
    }

    fn shutdown(&mut self) -> SessionOutcome {
        if let Some(canceller) = self.canceller.take() {
            canceller.cancel();
        }
        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(outcome)) => outcome,
            Some(Err(_)) => {
                tracing::error!("[subscription] session thread panicked");
                SessionOutcome::Failed
            }
            None => SessionOutcome::Cancelled,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A session running on tokio's blocking pool.
///
/// Dropping it cancels the session without waiting; use
/// [`AsyncSubscription::cancel`] to wait for the release.
#[derive(Debug)]
pub struct AsyncSubscription {
    signals: mpsc::Receiver<WatchSignal>,
    canceller: Option<Canceller>,
    task: Option<tokio::task::JoinHandle<SessionOutcome>>,
}

impl AsyncSubscription {
    /// Start `session` with `spawn_blocking`. Must be called within a tokio
    /// runtime.
    pub fn spawn<R>(session: WatchSession<R>) -> Self
    where
        R: WatchResource + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(ASYNC_BUFFER);
        let (canceller, token) = CancelToken::pair();

        let task = tokio::task::spawn_blocking(move || {
            let mut tx = tx;
            session.run(&mut tx, &token)
        });

        Self {
            signals: rx,
            canceller: Some(canceller),
            task: Some(task),
        }
    }

    /// Next signal; `None` once the session has ended.
    pub async fn recv(&mut self) -> Option<WatchSignal> {
        self.signals.recv().await
    }

    /// Cancel the session and wait until it has released its resources.
    pub async fn cancel(mut self) -> SessionOutcome {
        if let Some(canceller) = self.canceller.take() {
            canceller.cancel();
        }
        // unblock a session waiting on a full channel
        self.signals.close();

        match self.task.take() {
            Some(task) => match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("[subscription] session task failed: {e}");
                    SessionOutcome::Failed
                }
            },
            None => SessionOutcome::Cancelled,
        }
    }
}
