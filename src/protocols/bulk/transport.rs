//! Boundary between the producer and whatever carries its fragments.

use std::io;

/// Position of a fragment within the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentRole {
    /// Opens the message.
    First,
    /// Continues a message opened earlier.
    Continuation,
}

/// The connection-handling side of a bulk stream.
///
/// Implementations deliver `on_established` and `on_writable` to the
/// producer, and take fragments back through this trait.
pub trait Transport {
    /// Ask for one `on_writable` call once the connection can take more data.
    ///
    /// Idempotent: asking twice before the notification fires yields a
    /// single notification.
    fn request_writable(&mut self) -> io::Result<()>;

    /// Send one fragment and return how many payload bytes were accepted.
    fn transmit(&mut self, payload: &[u8], role: FragmentRole, fin: bool) -> io::Result<usize>;
}
