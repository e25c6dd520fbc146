//! Per-connection pending output.
//!
//! Bytes handed to a connection land here first and are written to the
//! socket as far as it will take them. Whatever the socket refuses stays
//! queued until the next writable event. The buffer is bounded: frames that
//! would push it past its limit are refused whole.

use crate::protocols::websocket::frame;
use bytes::{Buf, BufMut, BytesMut};
use std::io::{self, Write};
use tungstenite::protocol::frame::coding::OpCode;

/// Outcome of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Everything queued has been written.
    Drained,
    /// The socket would block with bytes still queued.
    Blocked,
}

/// Bounded queue of bytes waiting for the socket.
#[derive(Debug)]
pub struct WriteBuffer {
    pending: BytesMut,
    limit: usize,
}

impl WriteBuffer {
    /// Create an empty buffer holding at most `limit` bytes of frames.
    pub fn new(limit: usize) -> Self {
        Self {
            pending: BytesMut::with_capacity(limit.min(64 * 1024)),
            limit,
        }
    }

    /// Bytes waiting to be written.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Room left before the limit.
    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.pending.len())
    }

    /// Queue raw bytes regardless of the limit (handshake responses).
    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Queue a whole frame regardless of the limit (small control frames).
    pub fn push_frame(&mut self, opcode: OpCode, fin: bool, payload: &[u8]) -> io::Result<()> {
        let mut header = (&mut self.pending).writer();
        frame::encode_header(opcode, fin, payload.len(), &mut header)?;
        self.pending.extend_from_slice(payload);
        Ok(())
    }

    /// Queue a whole frame if it fits under the limit.
    ///
    /// Returns the payload bytes accepted: all of them, or none.
    pub fn try_push_frame(&mut self, opcode: OpCode, fin: bool, payload: &[u8]) -> io::Result<usize> {
        let needed = frame::header_len(payload.len()) + payload.len();
        if needed > self.available() {
            return Ok(0);
        }
        self.push_frame(opcode, fin, payload)?;
        Ok(payload.len())
    }

    /// Write queued bytes until drained or the writer would block.
    pub fn flush_to<W: Write>(&mut self, writer: &mut W) -> io::Result<Flush> {
        while !self.pending.is_empty() {
            match writer.write(&self.pending) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => self.pending.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flush::Blocked),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Flush::Drained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tungstenite::protocol::frame::coding::{Control, Data};

    /// Accepts up to `budget` bytes, then reports WouldBlock.
    struct Throttled {
        written: Vec<u8>,
        budget: usize,
        per_call: usize,
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.budget).min(self.per_call);
            self.written.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_flush_partial_then_drain() {
        let mut buf = WriteBuffer::new(4096);
        buf.push(b"HTTP/1.1 101 Switching Protocols\r\n\r\n");
        let total = buf.len();

        let mut sink = Throttled {
            written: Vec::new(),
            budget: 10,
            per_call: 4,
        };
        assert_eq!(buf.flush_to(&mut sink).unwrap(), Flush::Blocked);
        assert_eq!(sink.written.len(), 10);
        assert_eq!(buf.len(), total - 10);

        sink.budget = usize::MAX;
        assert_eq!(buf.flush_to(&mut sink).unwrap(), Flush::Drained);
        assert!(buf.is_empty());
        assert_eq!(sink.written, b"HTTP/1.1 101 Switching Protocols\r\n\r\n");
    }

    #[test]
    fn test_flush_write_zero() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut buf = WriteBuffer::new(64);
        buf.push(b"x");
        let err = buf.flush_to(&mut Closed).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }

    #[test]
    fn test_try_push_frame_respects_limit() {
        let mut buf = WriteBuffer::new(1028);
        let payload = vec![b'@'; 1024];

        // 4 byte header + 1024 payload fills the buffer exactly.
        let accepted = buf
            .try_push_frame(OpCode::Data(Data::Text), false, &payload)
            .unwrap();
        assert_eq!(accepted, 1024);
        assert_eq!(buf.len(), 1028);
        assert_eq!(buf.available(), 0);

        let refused = buf
            .try_push_frame(OpCode::Data(Data::Continue), true, &payload)
            .unwrap();
        assert_eq!(refused, 0);
        assert_eq!(buf.len(), 1028);
    }

    #[test]
    fn test_push_frame_bypasses_limit() {
        let mut buf = WriteBuffer::new(0);
        buf.push_frame(OpCode::Control(Control::Close), true, &[])
            .unwrap();
        let mut sink = Throttled {
            written: Vec::new(),
            budget: usize::MAX,
            per_call: usize::MAX,
        };
        buf.flush_to(&mut sink).unwrap();
        assert_eq!(sink.written, vec![0x88, 0x00]);
    }
}
