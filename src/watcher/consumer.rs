//! Push interface through which a session delivers its output.

use thiserror::Error;

use super::error::WatchError;
use super::event::DirectoryEvent;

/// The receiving side went away; the session treats this as cancellation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("watch consumer disconnected")]
pub struct Disconnected;

/// Everything a session can emit, as a single value for channel delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    Event(DirectoryEvent),
    /// A new subdirectory could not be watched; the session keeps running.
    Warning(WatchError),
    /// The session failed. Always the last signal.
    Error(WatchError),
    /// The watch set became empty.
    Complete,
}

/// Receiver of session output.
///
/// Calls arrive in order from the session thread. At most one terminal call
/// is made: either `on_complete` or `on_error`.
pub trait WatchConsumer {
    /// A filesystem event. Returning `Err` cancels the session.
    fn on_event(&mut self, event: DirectoryEvent) -> Result<(), Disconnected>;

    /// A non-fatal error. Returning `Err` cancels the session.
    fn on_warning(&mut self, error: WatchError) -> Result<(), Disconnected>;

    /// The error that ended the session.
    fn on_error(&mut self, error: WatchError);

    /// The session finished because nothing is left to watch.
    fn on_complete(&mut self);
}

impl WatchConsumer for crossbeam_channel::Sender<WatchSignal> {
    fn on_event(&mut self, event: DirectoryEvent) -> Result<(), Disconnected> {
        self.send(WatchSignal::Event(event)).map_err(|_| Disconnected)
    }

    fn on_warning(&mut self, error: WatchError) -> Result<(), Disconnected> {
        self.send(WatchSignal::Warning(error)).map_err(|_| Disconnected)
    }

    fn on_error(&mut self, error: WatchError) {
        let _ = self.send(WatchSignal::Error(error));
    }

    fn on_complete(&mut self) {
        let _ = self.send(WatchSignal::Complete);
    }
}

/// Must be driven from a blocking context (e.g. `spawn_blocking`).
impl WatchConsumer for tokio::sync::mpsc::Sender<WatchSignal> {
    fn on_event(&mut self, event: DirectoryEvent) -> Result<(), Disconnected> {
        self.blocking_send(WatchSignal::Event(event))
            .map_err(|_| Disconnected)
    }

    fn on_warning(&mut self, error: WatchError) -> Result<(), Disconnected> {
        self.blocking_send(WatchSignal::Warning(error))
            .map_err(|_| Disconnected)
    }

    fn on_error(&mut self, error: WatchError) {
        let _ = self.blocking_send(WatchSignal::Error(error));
    }

    fn on_complete(&mut self) {
        let _ = self.blocking_send(WatchSignal::Complete);
    }
}

/// Collects every signal; handy for tests and one-shot runs.
impl WatchConsumer for Vec<WatchSignal> {
    fn on_event(&mut self, event: DirectoryEvent) -> Result<(), Disconnected> {
        self.push(WatchSignal::Event(event));
        Ok(())
    }

    fn on_warning(&mut self, error: WatchError) -> Result<(), Disconnected> {
        self.push(WatchSignal::Warning(error));
        Ok(())
    }

    fn on_error(&mut self, error: WatchError) {
        self.push(WatchSignal::Error(error));
    }

    fn on_complete(&mut self) {
        self.push(WatchSignal::Complete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::event::{EventKind, WatchHandle};
    use std::path::PathBuf;

    fn sample() -> DirectoryEvent {
        DirectoryEvent {
            kind: EventKind::Create,
            context: PathBuf::from("a"),
            directory: PathBuf::from("/root"),
        }
    }

    fn sample_error() -> WatchError {
        WatchError::InternalConsistency {
            handle: WatchHandle::from_raw(3),
        }
    }

    #[test]
    fn test_crossbeam_sender_reports_disconnect() {
        let (mut tx, rx) = crossbeam_channel::unbounded();
        assert!(tx.on_event(sample()).is_ok());
        assert_eq!(rx.recv().unwrap(), WatchSignal::Event(sample()));

        drop(rx);
        assert_eq!(tx.on_event(sample()), Err(Disconnected));
        assert_eq!(tx.on_warning(sample_error()), Err(Disconnected));
    }

    #[test]
    fn test_vec_collects_in_order() {
        let mut signals: Vec<WatchSignal> = Vec::new();
        signals.on_event(sample()).unwrap();
        signals.on_warning(sample_error()).unwrap();
        signals.on_error(sample_error());

        assert_eq!(
            signals,
            vec![
                WatchSignal::Event(sample()),
                WatchSignal::Warning(sample_error()),
                WatchSignal::Error(sample_error()),
            ]
        );
    }
}
