//! HTTP/1.1 upgrade handshake (server side).

use tungstenite::handshake::derive_accept_key;

/// Parsed upgrade request. Header values are kept as sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub upgrade: Option<String>,
    pub connection: Option<String>,
    pub version: Option<String>,
    pub key: Option<String>,
    /// Offered subprotocols, in client preference order.
    pub protocols: Vec<String>,
}

/// Parse result.
#[derive(Debug)]
pub enum ParseResult {
    /// Full request head; the second field is the bytes it occupied.
    Complete(Request, usize),
    /// Need more data for the request head.
    Incomplete,
    /// Not an HTTP request we can read.
    Invalid,
}

/// What to send back.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    /// Switch to WebSocket; the response is ready to write.
    Accept {
        response: Vec<u8>,
        protocol: Option<String>,
    },
    /// Write the response, then close.
    Reject(Vec<u8>),
}

/// Parse an HTTP request head from the input buffer.
pub fn parse(input: &[u8]) -> ParseResult {
    let head_end = match find_head_end(input) {
        Some(pos) => pos,
        None => return ParseResult::Incomplete,
    };

    let head = match std::str::from_utf8(&input[..head_end]) {
        Ok(s) => s,
        Err(_) => return ParseResult::Invalid,
    };

    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split(' ');
    let (method, path, http) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(p), Some(h), None) if !m.is_empty() && !p.is_empty() => (m, p, h),
        _ => return ParseResult::Invalid,
    };
    if !http.starts_with("HTTP/1.") {
        return ParseResult::Invalid;
    }

    let mut request = Request {
        method: method.to_string(),
        path: path.to_string(),
        ..Request::default()
    };

    for line in lines {
        let (name, value) = match line.split_once(':') {
            Some((n, v)) => (n.trim(), v.trim()),
            None => return ParseResult::Invalid,
        };

        if name.eq_ignore_ascii_case("upgrade") {
            request.upgrade = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("connection") {
            request.connection = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("sec-websocket-version") {
            request.version = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("sec-websocket-key") {
            request.key = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("sec-websocket-protocol") {
            request.protocols.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string),
            );
        }
    }

    ParseResult::Complete(request, head_end + 4)
}

/// Decide how to answer `request`, offering `subprotocol` if the client
/// asked for it.
pub fn respond(request: &Request, subprotocol: &str) -> Reply {
    let upgrade_ok = request
        .upgrade
        .as_deref()
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection_ok = request.connection.as_deref().is_some_and(|v| {
        v.split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    });

    if request.method != "GET" || !upgrade_ok || !connection_ok {
        return Reply::Reject(status_response("400 Bad Request", ""));
    }

    if request.version.as_deref() != Some("13") {
        return Reply::Reject(status_response(
            "426 Upgrade Required",
            "Sec-WebSocket-Version: 13\r\n",
        ));
    }

    let key = match request.key.as_deref() {
        Some(key) if !key.is_empty() => key,
        _ => return Reply::Reject(status_response("400 Bad Request", "")),
    };

    let protocol = request
        .protocols
        .iter()
        .find(|p| p.as_str() == subprotocol)
        .cloned();

    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n",
        derive_accept_key(key.as_bytes())
    );
    if let Some(ref p) = protocol {
        response.push_str(&format!("Sec-WebSocket-Protocol: {p}\r\n"));
    }
    response.push_str("\r\n");

    Reply::Accept {
        response: response.into_bytes(),
        protocol,
    }
}

/// Response for a request head that outgrew the read buffer.
pub fn too_large() -> Vec<u8> {
    status_response("431 Request Header Fields Too Large", "")
}

/// Response for bytes that are not an HTTP request.
pub fn bad_request() -> Vec<u8> {
    status_response("400 Bad Request", "")
}

fn status_response(status: &str, extra_headers: &str) -> Vec<u8> {
    format!("HTTP/1.1 {status}\r\n{extra_headers}Content-Length: 0\r\nConnection: close\r\n\r\n")
        .into_bytes()
}

/// Find \r\n\r\n in buffer, returning the position of the first \r.
fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}
