//! Recursive directory observation with a self-managing watch set.
//!
//! A [`WatchSession`] registers a root directory (and, in recursive mode,
//! every subdirectory), then forwards creations, modifications and deletions
//! as [`DirectoryEvent`]s. New subdirectories are watched as they appear and
//! watches retired by the OS are dropped; the session completes once nothing
//! is left to watch.
//!
//! ```no_run
//! use treewatch::WatchSignal;
//!
//! let subscription = treewatch::watch("/tmp/inbox", true)?;
//! for signal in subscription.iter() {
//!     match signal {
//!         WatchSignal::Event(event) => println!("{event}"),
//!         WatchSignal::Warning(error) => eprintln!("warning: {error}"),
//!         WatchSignal::Error(error) => eprintln!("{error}"),
//!         WatchSignal::Complete => break,
//!     }
//! }
//! # Ok::<(), treewatch::WatchError>(())
//! ```

pub mod config;
pub mod logging;
pub mod watcher;

use std::path::PathBuf;

pub use config::Settings;
pub use watcher::{
    AsyncSubscription, Backend, CancelToken, Canceller, DirectoryEvent, EventKind, SessionOutcome,
    Subscription, WatchConsumer, WatchError, WatchSession, WatchSessionBuilder, WatchSignal,
};

/// Watch `root` with the native backend on a background thread.
///
/// Dropping the returned subscription stops the session and releases the
/// OS watch resource.
pub fn watch(root: impl Into<PathBuf>, recursive: bool) -> Result<Subscription, WatchError> {
    let session = WatchSession::builder()
        .root(root)
        .recursive(recursive)
        .build()?;
    Subscription::spawn(session)
}
