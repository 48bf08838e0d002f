//! Readiness registry.
//!
//! Each interest kind has its own ordered index keyed by handle, so a handle
//! may hold at most one read, one write and one error entry at a time.
//! Capacity is fixed per kind; callers treat `Full` as backpressure.

use crate::runtime::{Handle, Reactor};
use std::collections::BTreeMap;
use std::fmt;

/// Callback fired when a registered interest becomes ready.
pub type Callback<S> = fn(&mut Reactor<S>, &mut S, Handle);

/// Interest kind of a registered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    Read,
    Write,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Read, EventKind::Write, EventKind::Error];
}

/// A registered interest.
pub struct Entry<S> {
    pub handle: Handle,
    pub kind: EventKind,
    /// Persistent entries stay registered after firing; one-shot entries
    /// are retired before their callback runs.
    pub persistent: bool,
    pub callback: Callback<S>,
}

impl<S> Clone for Entry<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for Entry<S> {}

impl<S> fmt::Debug for Entry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("persistent", &self.persistent)
            .finish()
    }
}

/// Errors returned by `Registry::register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// An entry for this (handle, kind) pair already exists.
    AlreadyExists,
    /// The index for this kind is at capacity.
    Full,
    /// The handle is not attached to the reactor.
    UnknownHandle,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AlreadyExists => write!(f, "event already registered"),
            RegistryError::Full => write!(f, "event registry is full"),
            RegistryError::UnknownHandle => write!(f, "handle is not attached"),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<RegistryError> for std::io::Error {
    fn from(e: RegistryError) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, e)
    }
}

/// Three ordered indexes, one per interest kind.
pub struct Registry<S> {
    read: BTreeMap<Handle, Entry<S>>,
    write: BTreeMap<Handle, Entry<S>>,
    error: BTreeMap<Handle, Entry<S>>,
    capacity: usize,
}

impl<S> Registry<S> {
    /// Create a registry holding at most `capacity` entries per kind.
    pub fn new(capacity: usize) -> Self {
        Self {
            read: BTreeMap::new(),
            write: BTreeMap::new(),
            error: BTreeMap::new(),
            capacity,
        }
    }

    fn index(&self, kind: EventKind) -> &BTreeMap<Handle, Entry<S>> {
        match kind {
            EventKind::Read => &self.read,
            EventKind::Write => &self.write,
            EventKind::Error => &self.error,
        }
    }

    fn index_mut(&mut self, kind: EventKind) -> &mut BTreeMap<Handle, Entry<S>> {
        match kind {
            EventKind::Read => &mut self.read,
            EventKind::Write => &mut self.write,
            EventKind::Error => &mut self.error,
        }
    }

    /// Insert an entry for (handle, kind).
    pub fn register(
        &mut self,
        handle: Handle,
        kind: EventKind,
        persistent: bool,
        callback: Callback<S>,
    ) -> Result<(), RegistryError> {
        let capacity = self.capacity;
        let index = self.index_mut(kind);
        if index.contains_key(&handle) {
            return Err(RegistryError::AlreadyExists);
        }
        if index.len() >= capacity {
            return Err(RegistryError::Full);
        }
        index.insert(
            handle,
            Entry {
                handle,
                kind,
                persistent,
                callback,
            },
        );
        Ok(())
    }

    /// Remove every entry for `handle`. Returns true if anything was removed.
    pub fn unregister(&mut self, handle: Handle) -> bool {
        let mut removed = false;
        for kind in EventKind::ALL {
            removed |= self.index_mut(kind).remove(&handle).is_some();
        }
        removed
    }

    /// Remove the single entry for (handle, kind).
    pub fn remove(&mut self, handle: Handle, kind: EventKind) -> Option<Entry<S>> {
        self.index_mut(kind).remove(&handle)
    }

    pub fn find(&self, handle: Handle, kind: EventKind) -> Option<&Entry<S>> {
        self.index(kind).get(&handle)
    }

    /// The interest the OS poller must be armed with for `handle`.
    ///
    /// Error conditions are always reported by the poller, so a handle with
    /// only an error entry is armed for readability.
    pub fn interest(&self, handle: Handle) -> Option<mio::Interest> {
        let read = self.read.contains_key(&handle);
        let write = self.write.contains_key(&handle);
        let error = self.error.contains_key(&handle);
        match (read, write) {
            (true, true) => Some(mio::Interest::READABLE | mio::Interest::WRITABLE),
            (true, false) => Some(mio::Interest::READABLE),
            (false, true) => Some(mio::Interest::WRITABLE),
            (false, false) if error => Some(mio::Interest::READABLE),
            (false, false) => None,
        }
    }

    /// Number of entries of the given kind.
    pub fn len(&self, kind: EventKind) -> usize {
        self.index(kind).len()
    }
}
