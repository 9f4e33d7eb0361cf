//! Event and handle types shared by the registry, the session and backends.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Opaque token for one active directory registration.
///
/// Backends mint handles from a monotonically increasing counter, so a
/// handle is never reused once it has been invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WatchHandle(u64);

impl WatchHandle {
    /// Wrap a backend-issued identifier.
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// The backend-issued identifier.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The three primitive change kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Create,
    Modify,
    Delete,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Create => "CREATE",
            EventKind::Modify => "MODIFY",
            EventKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change reported for one entry of a watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: EventKind,
    /// Entry name relative to the handle's directory.
    pub context: PathBuf,
}

impl RawEvent {
    pub fn new(kind: EventKind, context: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            context: context.into(),
        }
    }
}

/// Pending events for a single handle, in the order the OS reported them.
///
/// An empty batch is legal: backends use it to make the session check the
/// handle's validity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatch {
    pub handle: WatchHandle,
    pub events: Vec<RawEvent>,
}

impl EventBatch {
    pub fn new(handle: WatchHandle) -> Self {
        Self {
            handle,
            events: Vec::new(),
        }
    }
}

/// An event as forwarded to consumers: kind, entry name and the watched
/// directory it was observed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEvent {
    pub kind: EventKind,
    pub context: PathBuf,
    pub directory: PathBuf,
}

impl DirectoryEvent {
    /// Full path of the affected entry.
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.context)
    }

    /// Whether this event names `context` inside `directory`.
    pub fn is(&self, kind: EventKind, context: &str, directory: &Path) -> bool {
        self.kind == kind && self.context == Path::new(context) && self.directory == directory
    }
}

impl fmt::Display for DirectoryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<6}  {}", self.kind, self.path().display())
    }
}
