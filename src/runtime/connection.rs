//! Connection state machine for WebSocket bulk streams.
//!
//! Each connection moves through three phases:
//! - `Handshaking`: accumulating the HTTP upgrade request.
//! - `Open`: upgraded; the producer streams the message while inbound
//!   frames are decoded and mostly discarded.
//! - `Closing`: a final response or close frame is queued; the connection
//!   goes away once it has been flushed.

use crate::protocols::bulk::producer::Phase;
use crate::protocols::bulk::{ChunkProducer, StreamSettings};
use crate::runtime::buffer::{Flush, WriteBuffer};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use slab::Slab;
use std::io;
use std::net::SocketAddr;

/// Current phase of a connection.
pub enum ConnPhase {
    /// Waiting for a complete upgrade request.
    Handshaking,
    /// Upgraded and streaming.
    Open {
        producer: ChunkProducer,
        /// Payload bytes of the current inbound data frame still to discard.
        skip: u64,
    },
    /// Flushing a last response before closing.
    Closing,
}

impl ConnPhase {
    /// Enter the open phase with a fresh producer.
    pub fn open(settings: StreamSettings) -> Self {
        ConnPhase::Open {
            producer: ChunkProducer::new(settings),
            skip: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConnPhase::Handshaking => "handshaking",
            ConnPhase::Open { producer, .. } => match producer.phase() {
                Phase::Fresh => "open",
                Phase::Streaming => "streaming",
                Phase::Done => "complete",
                Phase::Aborted => "aborted",
            },
            ConnPhase::Closing => "closing",
        }
    }
}

/// Socket plus everything needed to write to it.
pub struct Outbound {
    pub stream: TcpStream,
    pub token: Token,
    pub buf: WriteBuffer,
    /// A writable notification is owed to the producer.
    pub writable_requested: bool,
    interest: Interest,
}

impl Outbound {
    pub fn new(stream: TcpStream, token: Token, max_pending_write: usize) -> Self {
        Self {
            stream,
            token,
            buf: WriteBuffer::new(max_pending_write),
            writable_requested: false,
            interest: Interest::READABLE,
        }
    }

    /// Register the socket for reads.
    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stream, self.token, self.interest)
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }

    /// Owe the producer a writable notification.
    ///
    /// Always re-registers: that re-arms the readiness edge, so a socket
    /// that is already writable reports it again on the next poll.
    pub fn request_writable(&mut self, registry: &Registry) -> io::Result<()> {
        self.writable_requested = true;
        self.interest = Interest::READABLE | Interest::WRITABLE;
        registry.reregister(&mut self.stream, self.token, self.interest)
    }

    /// Write queued output and adjust interest to what is still wanted.
    pub fn flush(&mut self, registry: &Registry) -> io::Result<Flush> {
        let flush = self.buf.flush_to(&mut self.stream)?;

        let wanted = if flush == Flush::Blocked || self.writable_requested {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        if wanted != self.interest {
            self.interest = wanted;
            registry.reregister(&mut self.stream, self.token, self.interest)?;
        }

        Ok(flush)
    }
}

/// A single client connection.
pub struct Connection {
    pub out: Outbound,
    pub phase: ConnPhase,
    pub peer: SocketAddr,
    /// Inbound bytes not yet consumed.
    pub read_buf: Vec<u8>,
    pub filled: usize,
}

impl Connection {
    /// Create a new connection waiting for its handshake.
    pub fn new(
        stream: TcpStream,
        token: Token,
        peer: SocketAddr,
        read_buffer_size: usize,
        max_pending_write: usize,
    ) -> Self {
        Self {
            out: Outbound::new(stream, token, max_pending_write),
            phase: ConnPhase::Handshaking,
            peer,
            read_buf: vec![0u8; read_buffer_size],
            filled: 0,
        }
    }

    /// Drop the first `n` inbound bytes, keeping the rest at the front.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.filled);
        self.read_buf.copy_within(n..self.filled, 0);
        self.filled -= n;
    }

    /// Queue a last response and mark the connection for closing.
    pub fn close_with(&mut self, response: &[u8]) {
        self.out.buf.push(response);
        self.phase = ConnPhase::Closing;
    }
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations. The slab key doubles
/// as the connection's poll token.
pub struct ConnectionRegistry<C> {
    connections: Slab<C>,
    max_connections: usize,
}

impl<C> ConnectionRegistry<C> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a connection built from its id.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert_with(&mut self, build: impl FnOnce(usize) -> C) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        let entry = self.connections.vacant_entry();
        let id = entry.key();
        entry.insert(build(id));
        Some(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut C> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<C> {
        self.connections.try_remove(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }
}
