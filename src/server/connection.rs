//! Connection state machine for client connections.
//!
//! Each connection tracks its current phase and the resources that phase
//! owns (upload sink, outbound reply), plus request bytes that arrived
//! ahead of time.

use crate::protocols::http::upload::Upload;
use crate::runtime::Handle;
use crate::server::transfer::Reply;
use bytes::BytesMut;
use mio::net::TcpStream;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Current phase of a connection.
pub enum Phase {
    /// Waiting for the first byte of a request.
    Idle,
    /// Accumulating a request head until the blank line.
    ReadingHead,
    /// Consuming a multipart body into files.
    StreamingUpload(Box<Upload>),
    /// Sending a reply. Further input is stashed, not parsed.
    Writing(Reply),
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::ReadingHead => "reading-head",
            Phase::StreamingUpload(_) => "streaming-upload",
            Phase::Writing(_) => "writing",
        }
    }
}

/// A single client connection.
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub phase: Phase,
    /// Request bytes not yet parsed.
    pub pending: BytesMut,
    /// Close once the current reply is flushed.
    pub close_after: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            phase: Phase::Idle,
            pending: BytesMut::new(),
            close_after: false,
        }
    }
}

/// Active connections keyed by reactor handle.
pub struct ConnectionTable {
    connections: HashMap<Handle, Connection>,
    max_connections: usize,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Insert a connection. Hands it back if the table is at capacity.
    pub fn insert(&mut self, handle: Handle, conn: Connection) -> Result<(), Connection> {
        if self.is_full() {
            return Err(conn);
        }
        self.connections.insert(handle, conn);
        Ok(())
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Connection> {
        self.connections.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: Handle) -> Option<Connection> {
        self.connections.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }
}
