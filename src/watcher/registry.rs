//! Watch registry: binds directories to backend watch handles.
//!
//! Keeps the handle -> directory mapping and its reverse in step with the
//! backend. The registry owns the backend; closing the registry releases it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::error::WatchError;
use super::event::WatchHandle;
use super::resource::{CancelToken, Wait, WatchResource};

/// Registry of watched directories for one session.
#[derive(Debug)]
pub struct WatchRegistry<R: WatchResource> {
    /// Backend; `None` once released.
    resource: Option<R>,
    /// Handle -> watched directory.
    directories: HashMap<WatchHandle, PathBuf>,
    /// Watched directory -> handle.
    handles: HashMap<PathBuf, WatchHandle>,
    /// Highest handle issued so far. Backends issue handles in increasing
    /// order, so any unmapped handle at or below it was retired.
    highest: Option<WatchHandle>,
}

impl<R: WatchResource> WatchRegistry<R> {
    /// Take ownership of a freshly opened backend.
    pub fn new(resource: R) -> Self {
        Self {
            resource: Some(resource),
            directories: HashMap::new(),
            handles: HashMap::new(),
            highest: None,
        }
    }

    fn resource(&mut self) -> &mut R {
        // Only `close`/`Drop` clear the slot and both consume the registry.
        match self.resource.as_mut() {
            Some(resource) => resource,
            None => unreachable!("watch registry used after close"),
        }
    }

    /// Watch `dir` and record the new handle.
    ///
    /// Not idempotent: registering the same path twice issues two handles.
    pub fn register(&mut self, dir: &Path) -> Result<WatchHandle, WatchError> {
        let handle = self.resource().register(dir)?;
        self.directories.insert(handle, dir.to_path_buf());
        self.handles.insert(dir.to_path_buf(), handle);
        self.highest = self.highest.max(Some(handle));
        tracing::trace!("[registry] {handle} -> {}", dir.display());
        Ok(handle)
    }

    /// Register `root` and every directory below it, parents first.
    ///
    /// Symlinks are not followed. Directories that are already watched are
    /// skipped but still descended into. Stops at the first failure; whatever
    /// was registered before that stays registered. Returns the number of
    /// directories newly registered.
    pub fn register_tree(&mut self, root: &Path) -> Result<usize, WatchError> {
        let mut registered = 0;

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry?;
            if !entry.file_type().is_dir() {
                if entry.depth() == 0 {
                    return Err(WatchError::registration(root, "not a directory"));
                }
                continue;
            }

            let dir = entry.path();
            if self.handles.contains_key(dir) {
                crate::debug_event!("registry", "already watched", "{}", dir.display());
                continue;
            }

            self.register(dir)?;
            registered += 1;
        }

        Ok(registered)
    }

    /// Directory bound to `handle`.
    ///
    /// `Ok(None)` means the handle was issued here and has since been
    /// invalidated. A handle this registry never issued is an
    /// [`WatchError::InternalConsistency`].
    pub fn resolve(&self, handle: WatchHandle) -> Result<Option<&Path>, WatchError> {
        match self.directories.get(&handle) {
            Some(dir) => Ok(Some(dir.as_path())),
            None if Some(handle) <= self.highest => Ok(None),
            None => Err(WatchError::InternalConsistency { handle }),
        }
    }

    /// Forget `handle` after the backend reported it invalid.
    pub fn invalidate(&mut self, handle: WatchHandle) -> Option<PathBuf> {
        let dir = self.directories.remove(&handle)?;
        if self.handles.get(&dir) == Some(&handle) {
            self.handles.remove(&dir);
        }
        tracing::trace!("[registry] {handle} retired ({})", dir.display());
        Some(dir)
    }

    /// Whether `dir` currently has a live handle.
    pub fn is_watched(&self, dir: &Path) -> bool {
        self.handles.contains_key(dir)
    }

    pub fn is_empty(&self) -> bool {
        self.directories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.directories.len()
    }

    /// Block for the next batch from the backend.
    pub fn next_batch(&mut self, cancel: &CancelToken) -> Result<Wait, WatchError> {
        self.resource().next_batch(cancel)
    }

    /// Re-arm `handle` in the backend; `false` when it is no longer valid.
    pub fn reset(&mut self, handle: WatchHandle) -> bool {
        self.resource().reset(handle)
    }

    /// Release the backend. Consumes the registry, so nothing can touch it
    /// afterwards.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut resource) = self.resource.take() {
            resource.close();
            crate::debug_event!(
                "registry",
                "closed",
                "{} directories still watched",
                self.directories.len()
            );
            self.directories.clear();
            self.handles.clear();
        }
    }
}

impl<R: WatchResource> Drop for WatchRegistry<R> {
    fn drop(&mut self) {
        self.release();
    }
}
