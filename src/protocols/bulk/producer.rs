//! Chunk producer: the per-connection streaming state machine.
//!
//! ```text
//!   Fresh --established--> Streaming --writable (last chunk)--> Done
//!                            |   ^
//!                            +---+ writable (more to send, re-arm)
//!                            |
//!                            +--short write / transport error--> Aborted
//! ```
//!
//! Each writable notification emits exactly one fragment of at most
//! `chunk_size` bytes. The producer re-arms the notification itself after
//! every non-final fragment, so the transport alone decides when the next
//! chunk goes out.

use super::payload::{Filler, PayloadMode};
use super::session::SessionState;
use super::transport::{FragmentRole, Transport};
use std::io;
use thiserror::Error;
use tracing::trace;

/// Shape of the message every connection receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Total message size in bytes.
    pub total_size: usize,
    /// Upper bound on bytes per fragment.
    pub chunk_size: usize,
    /// Payload content.
    pub mode: PayloadMode,
}

/// Fatal streaming failures. The connection must be torn down.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("short write: transport accepted {accepted} of {requested} bytes")]
    ShortWrite { requested: usize, accepted: usize },
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// Producer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Connection not yet established.
    Fresh,
    /// Message in flight.
    Streaming,
    /// Final fragment sent.
    Done,
    /// Stream abandoned after a fatal error.
    Aborted,
}

/// Outcome of a writable notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Nothing to send in the current phase.
    Idle,
    /// A fragment went out; another notification has been requested.
    Continuing,
    /// The final fragment went out.
    Complete,
}

/// Streams one message over one connection.
pub struct ChunkProducer {
    settings: StreamSettings,
    fill: Filler,
    session: SessionState,
    phase: Phase,
    chunk: Vec<u8>,
}

impl ChunkProducer {
    /// Create a producer. Both sizes must be non-zero.
    pub fn new(settings: StreamSettings) -> Self {
        debug_assert!(settings.total_size > 0 && settings.chunk_size > 0);
        Self {
            fill: settings.mode.filler(),
            session: SessionState::new(),
            phase: Phase::Fresh,
            chunk: vec![0u8; settings.chunk_size.min(settings.total_size)],
            settings,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Handle connection establishment: rewind and ask for the first
    /// writable notification.
    pub fn on_established<T: Transport>(&mut self, transport: &mut T) -> Result<(), StreamError> {
        self.session.reset();
        self.phase = Phase::Streaming;
        if let Err(e) = transport.request_writable() {
            self.phase = Phase::Aborted;
            return Err(e.into());
        }
        Ok(())
    }

    /// Handle a writable notification by emitting at most one fragment.
    pub fn on_writable<T: Transport>(&mut self, transport: &mut T) -> Result<Progress, StreamError> {
        if self.phase != Phase::Streaming {
            return Ok(Progress::Idle);
        }

        match self.send_chunk(transport) {
            Ok(progress) => Ok(progress),
            Err(e) => {
                self.phase = Phase::Aborted;
                Err(e)
            }
        }
    }

    fn send_chunk<T: Transport>(&mut self, transport: &mut T) -> Result<Progress, StreamError> {
        let total = self.settings.total_size;
        let role = if self.session.position == 0 {
            FragmentRole::First
        } else {
            FragmentRole::Continuation
        };

        let n = self.settings.chunk_size.min(self.session.remaining(total));
        let payload = &mut self.chunk[..n];
        (self.fill)(&mut self.session, payload);

        let fin = self.session.position == total;
        let accepted = transport.transmit(payload, role, fin)?;
        if accepted < n {
            return Err(StreamError::ShortWrite {
                requested: n,
                accepted,
            });
        }

        trace!(
            len = n,
            position = self.session.position,
            ?role,
            fin,
            "Sent fragment"
        );

        if fin {
            self.phase = Phase::Done;
            return Ok(Progress::Complete);
        }

        transport.request_writable()?;
        Ok(Progress::Continuing)
    }
}
