//! RFC 6455 frame headers.
//!
//! Outgoing headers are formatted by `tungstenite`; server frames are never
//! masked. Incoming (client) frames are decoded here so that data payloads
//! can be skipped as they stream in rather than buffered whole.

use crate::protocols::bulk::FragmentRole;
use std::io::{self, Write};
use tungstenite::protocol::frame::coding::{Control, Data, OpCode};
use tungstenite::protocol::frame::FrameHeader;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Largest possible frame header: 64-bit length plus mask.
pub const MAX_HEADER_LEN: usize = 14;

/// Largest complete control frame a client may send.
pub const MAX_CONTROL_FRAME: usize = MAX_HEADER_LEN + MAX_CONTROL_PAYLOAD as usize;

/// Decoded frame header from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub fin: bool,
    pub opcode: OpCode,
    pub mask: [u8; 4],
    pub payload_len: u64,
    /// Bytes occupied by the header itself.
    pub header_len: usize,
}

/// Parse result.
#[derive(Debug)]
pub enum ParseResult {
    Complete(Header),
    Incomplete,
    /// Protocol violation; the connection must be dropped.
    Invalid(&'static str),
}

/// Opcode carried by a bulk fragment.
pub fn opcode_for(role: FragmentRole) -> OpCode {
    match role {
        FragmentRole::First => OpCode::Data(Data::Text),
        FragmentRole::Continuation => OpCode::Data(Data::Continue),
    }
}

/// Size of an unmasked header for a payload of `len` bytes.
pub fn header_len(len: usize) -> usize {
    match len {
        0..=125 => 2,
        126..=0xffff => 4,
        _ => 10,
    }
}

/// Write an unmasked frame header.
pub fn encode_header(opcode: OpCode, fin: bool, len: usize, out: &mut impl Write) -> io::Result<()> {
    let header = FrameHeader {
        is_final: fin,
        opcode,
        ..FrameHeader::default()
    };
    header
        .format(len as u64, out)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
}

/// Decode a client frame header from the front of `input`.
pub fn parse_header(input: &[u8]) -> ParseResult {
    if input.len() < 2 {
        return ParseResult::Incomplete;
    }

    let first = input[0];
    let second = input[1];

    if first & 0x70 != 0 {
        return ParseResult::Invalid("reserved bits set");
    }
    let fin = first & 0x80 != 0;
    let opcode = OpCode::from(first & 0x0f);
    if matches!(
        opcode,
        OpCode::Data(Data::Reserved(_)) | OpCode::Control(Control::Reserved(_))
    ) {
        return ParseResult::Invalid("reserved opcode");
    }

    if second & 0x80 == 0 {
        return ParseResult::Invalid("unmasked client frame");
    }

    let (payload_len, len_bytes) = match second & 0x7f {
        126 => {
            if input.len() < 4 {
                return ParseResult::Incomplete;
            }
            (u16::from_be_bytes([input[2], input[3]]) as u64, 2)
        }
        127 => {
            if input.len() < 10 {
                return ParseResult::Incomplete;
            }
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&input[2..10]);
            (u64::from_be_bytes(bytes), 8)
        }
        n => (n as u64, 0),
    };

    if let OpCode::Control(_) = opcode {
        if !fin || payload_len > MAX_CONTROL_PAYLOAD {
            return ParseResult::Invalid("malformed control frame");
        }
    }

    let mask_start = 2 + len_bytes;
    let header_len = mask_start + 4;
    if input.len() < header_len {
        return ParseResult::Incomplete;
    }

    let mut mask = [0u8; 4];
    mask.copy_from_slice(&input[mask_start..header_len]);

    ParseResult::Complete(Header {
        fin,
        opcode,
        mask,
        payload_len,
        header_len,
    })
}

/// Remove the client mask from a complete payload.
pub fn unmask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}
