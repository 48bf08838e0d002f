//! Reactor loop over mio.
//!
//! Each cycle runs three phases:
//! 1. **Poll**: arm the OS poller with the registry's current membership and
//!    wait for readiness with a bounded timeout.
//! 2. **Resolve**: map ready handles back to registry entries, building one
//!    batch ordered read events, then write events, then error events.
//! 3. **Dispatch**: fire each entry's callback once. One-shot entries are
//!    retired before their callback runs so the callback may re-register.
//!
//! mio is edge-triggered. A handle is re-armed (`reregister`) whenever its
//! entry set changes, which also re-reports readiness that is still pending,
//! so a one-shot write that re-registers itself fires again on the next
//! cycle. Read callbacks drain their socket until `WouldBlock`.

use crate::runtime::registry::{Entry, Registry};
use crate::runtime::{Callback, EventKind, Handle, RegistryError};
use mio::unix::SourceFd;
use mio::{Events, Poll};
use slab::Slab;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::{error, trace, warn};

/// Readiness reported for one handle in one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub handle: Handle,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

impl Readiness {
    fn from_event(event: &mio::event::Event) -> Self {
        Self {
            handle: event.token().into(),
            readable: event.is_readable() || event.is_read_closed(),
            writable: event.is_writable() || event.is_write_closed(),
            error: event.is_error(),
        }
    }
}

/// An attached OS socket.
struct Source {
    fd: RawFd,
    /// Whether the fd is currently registered with the OS poller.
    armed: bool,
    /// Whether the entry set changed since the poller was last armed.
    dirty: bool,
}

/// Slot in the ready batch. `None` marks an entry that was absent at
/// resolve time or whose handle was unregistered mid-batch.
type Slot = Option<(Handle, EventKind)>;

pub struct Reactor<S> {
    poll: Poll,
    events: Events,
    registry: Registry<S>,
    sources: Slab<Source>,
    batch: Vec<Slot>,
    timeout: Duration,
}

impl<S> Reactor<S> {
    /// Create a reactor holding up to `capacity` entries per interest kind.
    pub fn new(capacity: usize, timeout: Duration) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity.clamp(16, 1024)),
            registry: Registry::new(capacity),
            sources: Slab::with_capacity(capacity),
            batch: Vec::with_capacity(capacity.min(1024) * 3),
            timeout,
        })
    }

    /// Attach a socket and allocate its handle.
    ///
    /// The socket is handed to the OS poller once an interest is registered.
    pub fn attach(&mut self, fd: RawFd) -> Handle {
        let key = self.sources.insert(Source {
            fd,
            armed: false,
            dirty: false,
        });
        Handle(key)
    }

    /// Register interest of `kind` for `handle`.
    pub fn register(
        &mut self,
        handle: Handle,
        kind: EventKind,
        persistent: bool,
        callback: Callback<S>,
    ) -> Result<(), RegistryError> {
        let source = self
            .sources
            .get_mut(handle.0)
            .ok_or(RegistryError::UnknownHandle)?;
        self.registry.register(handle, kind, persistent, callback)?;
        source.dirty = true;
        Ok(())
    }

    /// Retire the single entry for (handle, kind). Returns true if present.
    pub fn remove(&mut self, handle: Handle, kind: EventKind) -> bool {
        let removed = self.registry.remove(handle, kind).is_some();
        if removed {
            self.mark_dirty(handle);
        }
        removed
    }

    /// Remove every interest for `handle` and drop it from the in-flight
    /// batch. The handle stays attached, so interests may be registered
    /// again afterwards.
    pub fn unregister(&mut self, handle: Handle) {
        self.registry.unregister(handle);

        for slot in self.batch.iter_mut() {
            if matches!(slot, Some((h, _)) if *h == handle) {
                *slot = None;
            }
        }
        self.mark_dirty(handle);
    }

    /// Unregister `handle` and release it.
    ///
    /// Must be called before the socket is closed. Calling it for a handle
    /// that is no longer attached is a no-op.
    pub fn detach(&mut self, handle: Handle) {
        self.unregister(handle);

        if let Some(source) = self.sources.try_remove(handle.0) {
            if source.armed {
                if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&source.fd)) {
                    trace!(%handle, error = %e, "Deregister failed");
                }
            }
        }
    }

    pub fn find(&self, handle: Handle, kind: EventKind) -> Option<&Entry<S>> {
        self.registry.find(handle, kind)
    }

    /// Number of attached handles.
    pub fn attached(&self) -> usize {
        self.sources.len()
    }

    fn mark_dirty(&mut self, handle: Handle) {
        if let Some(source) = self.sources.get_mut(handle.0) {
            source.dirty = true;
        }
    }

    /// Run cycles until the poller fails.
    pub fn run(&mut self, state: &mut S) -> io::Result<()> {
        loop {
            if let Err(e) = self.poll_once(state) {
                error!(error = %e, "Poll failed, stopping reactor");
                return Err(e);
            }
        }
    }

    /// Run a single poll → resolve → dispatch cycle.
    pub fn poll_once(&mut self, state: &mut S) -> io::Result<()> {
        self.arm();
        trace!(
            reads = self.registry.len(EventKind::Read),
            writes = self.registry.len(EventKind::Write),
            "Polling"
        );

        match self.poll.poll(&mut self.events, Some(self.timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        if self.events.is_empty() {
            // Timed out
            return Ok(());
        }

        let ready: Vec<Readiness> = self.events.iter().map(Readiness::from_event).collect();
        self.resolve(&ready);
        self.dispatch(state);
        Ok(())
    }

    /// Bring the OS poller in line with the registry for changed handles.
    fn arm(&mut self) {
        let Reactor {
            poll,
            registry,
            sources,
            ..
        } = self;

        for (key, source) in sources.iter_mut() {
            if !source.dirty {
                continue;
            }
            source.dirty = false;

            let handle = Handle(key);
            let fd = source.fd;
            let result = match (registry.interest(handle), source.armed) {
                (Some(interest), false) => poll
                    .registry()
                    .register(&mut SourceFd(&fd), handle.into(), interest)
                    .map(|()| true),
                (Some(interest), true) => poll
                    .registry()
                    .reregister(&mut SourceFd(&fd), handle.into(), interest)
                    .map(|()| true),
                (None, true) => poll
                    .registry()
                    .deregister(&mut SourceFd(&fd))
                    .map(|()| false),
                (None, false) => Ok(false),
            };

            match result {
                Ok(armed) => source.armed = armed,
                Err(e) => warn!(%handle, error = %e, "Failed to arm poller"),
            }
        }
    }

    /// Build the ready batch: all read events, then writes, then errors.
    pub fn resolve(&mut self, ready: &[Readiness]) {
        self.batch.clear();

        for r in ready.iter().filter(|r| r.readable) {
            self.batch.push(self.resolve_one(r.handle, EventKind::Read));
        }
        for r in ready.iter().filter(|r| r.writable) {
            self.batch.push(self.resolve_one(r.handle, EventKind::Write));
        }
        for r in ready.iter().filter(|r| r.error) {
            self.batch.push(self.resolve_one(r.handle, EventKind::Error));
        }
    }

    fn resolve_one(&self, handle: Handle, kind: EventKind) -> Slot {
        self.registry.find(handle, kind).map(|_| (handle, kind))
    }

    /// Fire every present entry in the ready batch, in order.
    pub fn dispatch(&mut self, state: &mut S) {
        let mut i = 0;
        while i < self.batch.len() {
            let slot = self.batch[i];
            i += 1;

            let Some((handle, kind)) = slot else {
                continue;
            };
            let Some(entry) = self.registry.find(handle, kind).copied() else {
                continue;
            };

            if !entry.persistent {
                self.registry.remove(handle, kind);
                self.mark_dirty(handle);
            }

            trace!(%handle, ?kind, "Dispatch");
            (entry.callback)(self, state, handle);
        }
        self.batch.clear();
    }
}
