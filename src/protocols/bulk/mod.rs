//! Bulk message streaming.
//!
//! Every connection receives one large text message, produced in bounded
//! chunks as the transport signals it can take more:
//!
//! ```text
//! established -> request_writable
//! writable    -> transmit(chunk, First, fin=false)        -> request_writable
//! writable    -> transmit(chunk, Continuation, fin=false) -> request_writable
//! ...
//! writable    -> transmit(chunk, Continuation, fin=true)  -> done
//! ```
//!
//! The payload is either pseudorandom printable ASCII, which defeats any
//! per-message compression underneath, or a repeated text corpus, which
//! compresses very well.

pub mod payload;
pub mod producer;
pub mod session;
pub mod transport;

pub use payload::PayloadMode;
pub use producer::{ChunkProducer, Progress, StreamError, StreamSettings};
pub use transport::{FragmentRole, Transport};
