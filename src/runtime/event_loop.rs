//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! ## Writer-driven streaming
//!
//! The bulk producer never writes in a loop. It asks for a writable
//! notification, and the loop delivers exactly one `on_writable` per
//! request, and only after all previously queued output has reached the
//! socket. A slow reader therefore throttles the producer directly.

use crate::config::Config;
use crate::protocols::bulk::{Progress, StreamError};
use crate::protocols::websocket::frame::{self, Header};
use crate::protocols::websocket::handshake::{self, Reply};
use crate::runtime::buffer::Flush;
use crate::runtime::connection::{ConnPhase, Connection, ConnectionRegistry};
use crate::runtime::transport::MioTransport;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Registry, Token};
use std::io::{self, Read};
use std::net::SocketAddr;
use std::thread;
use tracing::{debug, error, info, trace, warn};
use tungstenite::protocol::frame::coding::{Control, OpCode};

const LISTENER_TOKEN: Token = Token(usize::MAX);

const EVENTS_CAPACITY: usize = 1024;

/// Run the server: one worker thread per core (or as configured), each
/// with its own `SO_REUSEPORT` listener.
pub fn run(config: Config) -> io::Result<()> {
    let num_workers = if config.workers == 0 {
        num_cpus()
    } else {
        config.workers
    };

    let addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    info!(workers = num_workers, addr = %addr, "Starting mio runtime");

    let mut handles = Vec::with_capacity(num_workers);

    for worker_id in 0..num_workers {
        let config = config.clone();
        let listener = create_listener_with_reuseport(addr)?;

        let handle = thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || {
                if let Err(e) = serve(worker_id, listener, &config) {
                    error!(worker = worker_id, error = %e, "Worker failed");
                }
            })?;

        handles.push(handle);
    }

    // Wait for all workers
    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}

/// Accept and stream on `listener` until an unrecoverable poll error.
pub fn serve(worker_id: usize, listener: std::net::TcpListener, config: &Config) -> io::Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(EVENTS_CAPACITY);

    listener.set_nonblocking(true)?;
    let mut listener = TcpListener::from_std(listener);
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let mut connections = ConnectionRegistry::new(config.max_connections);

    info!(
        worker = worker_id,
        max_connections = config.max_connections,
        total_size = config.total_size,
        chunk_size = config.chunk_size,
        payload = ?config.payload,
        "Worker started"
    );

    loop {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    accept_connections(&listener, poll.registry(), &mut connections, config, worker_id);
                }
                Token(conn_id) => {
                    if let Err(e) =
                        handle_connection_event(conn_id, event, poll.registry(), &mut connections, config)
                    {
                        debug!(conn_id, error = %e, "Connection error");
                        close_connection(poll.registry(), &mut connections, conn_id);
                    }
                }
            }
        }
    }
}

fn accept_connections(
    listener: &TcpListener,
    registry: &Registry,
    connections: &mut ConnectionRegistry<Connection>,
    config: &Config,
    worker_id: usize,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if connections.is_full() {
                    warn!(peer = %peer_addr, "Connection limit reached");
                    continue;
                }

                let _ = stream.set_nodelay(true);
                let conn_id = connections.insert_with(|id| {
                    Connection::new(
                        stream,
                        Token(id),
                        peer_addr,
                        config.read_buffer_size,
                        config.max_pending_write,
                    )
                });
                let Some(conn_id) = conn_id else {
                    continue;
                };

                let registered = match connections.get_mut(conn_id) {
                    Some(conn) => conn.out.register(registry),
                    None => continue,
                };
                if let Err(e) = registered {
                    warn!(conn_id, error = %e, "Failed to register connection");
                    connections.remove(conn_id);
                    continue;
                }

                debug!(
                    worker = worker_id,
                    conn_id,
                    peer = %peer_addr,
                    active = connections.len(),
                    "Accepted connection"
                );
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(worker = worker_id, error = %e, "Accept error");
                break;
            }
        }
    }
}

fn handle_connection_event(
    conn_id: usize,
    event: &mio::event::Event,
    registry: &Registry,
    connections: &mut ConnectionRegistry<Connection>,
    config: &Config,
) -> io::Result<()> {
    let conn = match connections.get_mut(conn_id) {
        Some(conn) => conn,
        None => return Ok(()),
    };

    if event.is_readable() {
        handle_readable(conn_id, conn, registry, config)?;
    }

    // Anything queued while reading (handshake response, pong, close) goes
    // out now; the writable path also serves owed producer notifications.
    handle_writable(conn_id, conn, registry)
}

fn handle_readable(
    conn_id: usize,
    conn: &mut Connection,
    registry: &Registry,
    config: &Config,
) -> io::Result<()> {
    loop {
        if matches!(conn.phase, ConnPhase::Closing) {
            // Nothing more will be answered; just drain.
            conn.filled = 0;
        }

        if conn.filled == conn.read_buf.len() {
            // Only a handshake can fill the buffer: data payloads are skipped
            // as they arrive and the buffer holds a whole control frame.
            debug_assert!(matches!(conn.phase, ConnPhase::Handshaking));
            debug_assert!(conn.read_buf.len() > frame::MAX_CONTROL_FRAME);
            warn!(conn_id, peer = %conn.peer, "Handshake request too large");
            conn.close_with(&handshake::too_large());
            return Ok(());
        }

        let filled = conn.filled;
        let n = match conn.out.stream.read(&mut conn.read_buf[filled..]) {
            Ok(0) => {
                // Peer finished sending. Whatever is already queued (a reject,
                // a close reply) still goes out before the socket is dropped.
                debug!(conn_id, peer = %conn.peer, phase = conn.phase.name(), "Peer closed");
                conn.phase = ConnPhase::Closing;
                conn.filled = 0;
                return Ok(());
            }
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        conn.filled += n;

        process_input(conn_id, conn, registry, config)?;
    }
}

fn process_input(
    conn_id: usize,
    conn: &mut Connection,
    registry: &Registry,
    config: &Config,
) -> io::Result<()> {
    if matches!(conn.phase, ConnPhase::Handshaking) {
        process_handshake(conn_id, conn, registry, config)?;
    }
    if matches!(conn.phase, ConnPhase::Open { .. }) {
        process_frames(conn_id, conn)?;
    }
    Ok(())
}

fn process_handshake(
    conn_id: usize,
    conn: &mut Connection,
    registry: &Registry,
    config: &Config,
) -> io::Result<()> {
    let (request, consumed) = match handshake::parse(&conn.read_buf[..conn.filled]) {
        handshake::ParseResult::Complete(request, consumed) => (request, consumed),
        handshake::ParseResult::Incomplete => return Ok(()),
        handshake::ParseResult::Invalid => {
            debug!(conn_id, peer = %conn.peer, "Malformed HTTP request");
            conn.close_with(&handshake::bad_request());
            return Ok(());
        }
    };

    match handshake::respond(&request, &config.subprotocol) {
        Reply::Accept { response, protocol } => {
            conn.out.buf.push(&response);
            conn.consume(consumed);
            conn.phase = ConnPhase::open(config.stream_settings());

            debug!(
                conn_id,
                peer = %conn.peer,
                path = %request.path,
                protocol = protocol.as_deref().unwrap_or("-"),
                "WebSocket established"
            );

            let Connection { out, phase, .. } = conn;
            if let ConnPhase::Open { producer, .. } = phase {
                let mut transport = MioTransport::new(out, registry);
                producer.on_established(&mut transport).map_err(abort)?;
            }
        }
        Reply::Reject(response) => {
            debug!(conn_id, peer = %conn.peer, path = %request.path, "Rejected upgrade");
            conn.close_with(&response);
        }
    }

    Ok(())
}

/// Decode client frames: skip data, answer ping and close.
fn process_frames(conn_id: usize, conn: &mut Connection) -> io::Result<()> {
    let mut offset = 0;

    while offset < conn.filled {
        let ConnPhase::Open { skip, .. } = &mut conn.phase else {
            break;
        };

        if *skip > 0 {
            let n = (*skip).min((conn.filled - offset) as u64);
            *skip -= n;
            offset += n as usize;
            continue;
        }

        let header = match frame::parse_header(&conn.read_buf[offset..conn.filled]) {
            frame::ParseResult::Complete(header) => header,
            frame::ParseResult::Incomplete => break,
            frame::ParseResult::Invalid(reason) => {
                return Err(io::Error::new(io::ErrorKind::InvalidData, reason));
            }
        };

        match header.opcode {
            OpCode::Data(_) => {
                trace!(
                    conn_id,
                    len = header.payload_len,
                    fin = header.fin,
                    "Discarding data frame"
                );
                *skip = header.payload_len;
                offset += header.header_len;
            }
            OpCode::Control(control) => {
                let frame_len = header.header_len + header.payload_len as usize;
                if conn.filled - offset < frame_len {
                    break;
                }
                let start = offset + header.header_len;
                let mut payload = conn.read_buf[start..offset + frame_len].to_vec();
                offset += frame_len;
                handle_control(conn_id, conn, control, &header, &mut payload)?;
            }
        }
    }

    conn.consume(offset);
    Ok(())
}

fn handle_control(
    conn_id: usize,
    conn: &mut Connection,
    control: Control,
    header: &Header,
    payload: &mut [u8],
) -> io::Result<()> {
    match control {
        Control::Ping => {
            frame::unmask(payload, header.mask);
            conn.out
                .buf
                .push_frame(OpCode::Control(Control::Pong), true, payload)?;
        }
        Control::Close => {
            debug!(conn_id, "Close frame received");
            conn.out
                .buf
                .push_frame(OpCode::Control(Control::Close), true, &[])?;
            conn.phase = ConnPhase::Closing;
        }
        _ => {}
    }
    Ok(())
}

fn handle_writable(conn_id: usize, conn: &mut Connection, registry: &Registry) -> io::Result<()> {
    if conn.out.flush(registry)? == Flush::Blocked {
        return Ok(());
    }

    if matches!(conn.phase, ConnPhase::Closing) {
        return Err(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "closed after final response",
        ));
    }

    if !conn.out.writable_requested {
        return Ok(());
    }
    conn.out.writable_requested = false;

    let Connection { out, phase, .. } = conn;
    let ConnPhase::Open { producer, .. } = phase else {
        return Ok(());
    };

    let mut transport = MioTransport::new(out, registry);
    match producer.on_writable(&mut transport) {
        Ok(Progress::Complete) => {
            debug!(
                conn_id,
                bytes = producer.settings().total_size,
                "Message complete"
            );
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(e) => {
            error!(
                conn_id,
                position = producer.session().position,
                error = %e,
                "Aborting stream"
            );
            Err(abort(e))
        }
    }
}

/// Map a fatal stream error onto the connection-closing error path.
fn abort(e: StreamError) -> io::Error {
    match e {
        StreamError::Transport(e) => e,
        e @ StreamError::ShortWrite { .. } => io::Error::new(io::ErrorKind::WriteZero, e),
    }
}

fn close_connection(
    registry: &Registry,
    connections: &mut ConnectionRegistry<Connection>,
    conn_id: usize,
) {
    if let Some(mut conn) = connections.remove(conn_id) {
        let _ = conn.out.deregister(registry);
        debug!(
            conn_id,
            peer = %conn.peer,
            phase = conn.phase.name(),
            unsent = conn.out.buf.len(),
            "Connection closed"
        );
    }
}

/// Create a TCP listener with SO_REUSEPORT for kernel load balancing.
fn create_listener_with_reuseport(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_port(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
