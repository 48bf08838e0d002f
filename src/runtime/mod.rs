//! Single-threaded readiness runtime.
//!
//! The runtime is split into three pieces:
//! - `Registry`: ordered read/write/error interest indexes keyed by handle
//! - `Reactor`: the poll → resolve → dispatch loop over mio (epoll/kqueue)
//! - `listener`: listening socket creation with port fallback
//!
//! Callbacks are plain function pointers that receive the reactor and the
//! application state, so a callback may register or unregister interests
//! (including its own) while the batch it belongs to is being dispatched.

pub mod listener;
mod reactor;
mod registry;

pub use reactor::Reactor;
pub use registry::{Callback, EventKind, RegistryError};

use std::fmt;

/// Identifier of one socket attached to a reactor.
///
/// Handles are slab keys and double as the mio `Token` for the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub usize);

impl From<Handle> for mio::Token {
    fn from(handle: Handle) -> Self {
        mio::Token(handle.0)
    }
}

impl From<mio::Token> for Handle {
    fn from(token: mio::Token) -> Self {
        Handle(token.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
