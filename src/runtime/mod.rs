//! Custom runtime for writer-driven streaming.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS), one
//! event loop per worker thread. Shared abstractions:
//! - `WriteBuffer`: bounded per-connection pending output
//! - `Connection`: handshake / open / closing state machine
//! - `MioTransport`: the bulk producer's view of a connection

mod buffer;
mod connection;
mod event_loop;
mod transport;

pub use event_loop::run;
