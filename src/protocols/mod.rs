//! Protocol implementations.
//!
//! - `bulk`: the per-connection message producer, independent of any socket
//! - `websocket`: RFC 6455 handshake and framing used by the runtime

pub mod bulk;
pub mod websocket;
