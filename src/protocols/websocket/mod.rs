//! WebSocket (RFC 6455) server plumbing.
//!
//! Only what the bulk stream needs:
//! - `handshake`: the HTTP/1.1 upgrade exchange, with optional subprotocol
//!   selection. Extensions (permessage-deflate included) are never accepted.
//! - `frame`: unmasked outgoing headers, masked incoming headers.
//!
//! Incoming data frames are discarded. Pings are answered and a close
//! frame is echoed before the connection goes away.

pub mod frame;
pub mod handshake;
