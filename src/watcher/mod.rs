//! Recursive directory watching with a self-managing watch set.
//!
//! # Architecture
//!
//! ```text
//! WatchResource (notify, polling, ...)
//!        |  batches of raw events per handle
//!        v
//! WatchSession ---- register / invalidate ----> WatchRegistry
//!        |                                      (handle <-> directory)
//!        v
//! WatchConsumer (channel, Subscription, AsyncSubscription)
//! ```
//!
//! The session forwards every event in backend order. In recursive mode a
//! CREATE of a directory registers that directory and its subtree before the
//! next event is handled. Handles the backend reports invalid are pruned and
//! the session completes once nothing is left to watch.

mod consumer;
mod error;
mod event;
mod notify_backend;
mod registry;
mod resource;
mod session;
mod subscription;

#[cfg(test)]
mod testing;

pub use consumer::{Disconnected, WatchConsumer, WatchSignal};
pub use error::WatchError;
pub use event::{DirectoryEvent, EventBatch, EventKind, RawEvent, WatchHandle};
pub use notify_backend::{Backend, NotifyResource};
pub use registry::WatchRegistry;
pub use resource::{CancelToken, Canceller, Wait, WatchResource};
pub use session::{SessionOutcome, SessionState, WatchSession, WatchSessionBuilder};
pub use subscription::{AsyncSubscription, Subscription};
