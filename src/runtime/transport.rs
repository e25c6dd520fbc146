//! mio-backed `Transport` for the bulk producer.

use crate::protocols::bulk::{FragmentRole, Transport};
use crate::protocols::websocket::frame;
use crate::runtime::connection::Outbound;
use mio::Registry;
use std::io;

/// Borrows a connection's outbound side for the length of one event.
pub struct MioTransport<'a> {
    out: &'a mut Outbound,
    registry: &'a Registry,
}

impl<'a> MioTransport<'a> {
    pub fn new(out: &'a mut Outbound, registry: &'a Registry) -> Self {
        Self { out, registry }
    }
}

impl Transport for MioTransport<'_> {
    fn request_writable(&mut self) -> io::Result<()> {
        self.out.request_writable(self.registry)
    }

    /// Queue the fragment as one frame, then push out as much as the socket
    /// takes. A fragment that does not fit in pending output is refused
    /// whole.
    fn transmit(&mut self, payload: &[u8], role: FragmentRole, fin: bool) -> io::Result<usize> {
        let accepted = self
            .out
            .buf
            .try_push_frame(frame::opcode_for(role), fin, payload)?;
        if accepted > 0 {
            self.out.flush(self.registry)?;
        }
        Ok(accepted)
    }
}
