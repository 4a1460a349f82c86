//! One logical HTTP channel: a deadline-aware socket plus its input and
//! output buffers.
//!
//! A `Connection` is a reference-counted handle; it is shared between the
//! request it delivered and the response that will be written back, and the
//! socket closes when the last holder drops. Parser and formatter calls
//! take the internal lock for their whole duration, so at most one of each
//! runs at a time.

use std::fmt::{self, Debug, Formatter};
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;

use crate::codec::{ChunkedDecoder, Http1Formatter, Http1Parser};
use crate::error::OperationStatus;
use crate::io::address::IPAddress;
use crate::io::buffer::{FramedReader, InputBuffer, OutputBuffer};
use crate::io::socket::{TimeoutSocket, Transport};
use crate::io::tls::{TlsConfig, TlsRole};
use crate::protocol::{BodyKind, MimeType, Protocol, Request, Response, Status, StatusCode};

pub(crate) struct ConnectionInner {
    pub socket: TimeoutSocket,
    pub input: InputBuffer,
    pub output: OutputBuffer,
}

/// A reference-counted connection handle.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Mutex<ConnectionInner>>,
}

impl Connection {
    pub fn new(transport: Transport) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ConnectionInner {
                socket: TimeoutSocket::new(transport),
                input: InputBuffer::new(),
                output: OutputBuffer::new(),
            })),
        }
    }

    /// A plain-TCP connection over an accepted or connected stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self::new(Transport::Plain(crate::io::socket::PlainSocket::from_stream(stream)))
    }

    /// A TLS connection over an accepted stream; the handshake still has to
    /// be run.
    pub fn tls_from_tcp(stream: TcpStream) -> Self {
        Self::new(Transport::Tls(crate::io::tls::TlsSocket::from_stream(stream)))
    }

    /// An in-memory connection: reads come from `input`, writes are
    /// captured for inspection via [`Connection::written`].
    pub fn memory(input: impl Into<Vec<u8>>) -> Self {
        Self::new(Transport::memory(input))
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bytes written so far (in-memory transport only).
    pub fn written(&self) -> Vec<u8> {
        match self.lock().socket.transport() {
            Transport::Memory(memory) => memory.written().to_vec(),
            _ => Vec::new(),
        }
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.lock().socket.set_timeout(timeout);
    }

    pub fn clear_timeout(&self) {
        self.lock().socket.clear_timeout();
    }

    pub fn timed_out(&self) -> bool {
        self.lock().socket.timed_out()
    }

    pub fn remote_address(&self) -> IPAddress {
        self.lock().socket.remote_address()
    }

    pub fn local_address(&self) -> IPAddress {
        self.lock().socket.local_address()
    }

    pub fn is_open(&self) -> bool {
        self.lock().socket.is_open()
    }

    /// Closes the underlying socket; safe to call repeatedly and after
    /// errors.
    pub fn close(&self, graceful: bool) -> OperationStatus {
        self.lock().socket.close(graceful)
    }

    /// Connects to the first reachable endpoint (client side).
    pub fn connect(&self, endpoints: &[SocketAddr]) -> OperationStatus {
        self.lock().socket.connect(endpoints)
    }

    /// Runs the TLS handshake in the given role; a no-op error on non-TLS
    /// transports.
    pub fn handshake(&self, role: TlsRole, config: &TlsConfig, server_name: &str) -> OperationStatus {
        self.lock().socket.handshake(role, config, server_name)
    }

    /// The negotiated TLS peer name, when there is one.
    pub fn peer_common_name(&self) -> Option<String> {
        self.lock().socket.peer_common_name()
    }

    /// Reads one request from the stream. Transport failures come back as
    /// `Err`; a parsed (possibly rejected) message comes back with its
    /// suggested status, its body left on the stream for lazy reads.
    pub fn read_request(
        &self,
        parser: &Http1Parser,
        max_request_size: u64,
    ) -> Result<(Request, Status), OperationStatus> {
        let parsed = {
            let mut inner = self.lock();
            let inner = &mut *inner;
            let mut io = FramedReader::new(&mut inner.socket, &mut inner.input);
            parser.request(&mut io, max_request_size)?
        };

        let mut request = parsed.request;
        if let Some(kind) = parsed.body {
            let content_type = MimeType::parse(request.headers.get_or("Content-Type", ""));
            request.body = crate::protocol::Body::attach_reader(self.clone(), kind, content_type);
        }
        request.connection = Some(self.clone());
        Ok((request, parsed.status))
    }

    /// Reads one response from the stream (client side).
    pub fn read_response(
        &self,
        parser: &Http1Parser,
        max_response_size: u64,
    ) -> Result<(Response, Status), OperationStatus> {
        let parsed = {
            let mut inner = self.lock();
            let inner = &mut *inner;
            let mut io = FramedReader::new(&mut inner.socket, &mut inner.input);
            parser.response(&mut io, max_response_size)?
        };

        let mut response = parsed.response;
        if let Some(kind) = parsed.body {
            let content_type = MimeType::parse(response.headers.get_or("Content-Type", ""));
            response.body = crate::protocol::Body::attach_reader(self.clone(), kind, content_type);
        }
        response.connection = Some(self.clone());
        Ok((response, parsed.status))
    }

    /// Attaches this connection to the response, formats it and flushes the
    /// output buffer in a single socket write.
    pub fn send_response(&self, response: &mut Response) -> OperationStatus {
        response.connection.get_or_insert_with(|| self.clone());
        // materialize the payload before locking: it may be a lazy view over
        // this same connection
        let payload = response.body.take_payload();

        let mut inner = self.lock();
        let inner = &mut *inner;
        if let Err(e) = Http1Formatter::new().response(response, payload, &mut inner.output) {
            return e.into();
        }
        inner.output.flush_to(&mut inner.socket)
    }

    /// Formats and flushes a client request.
    pub fn send_request(&self, request: &mut Request) -> OperationStatus {
        request.connection.get_or_insert_with(|| self.clone());
        let payload = request.body.take_payload();

        let mut inner = self.lock();
        let inner = &mut *inner;
        if let Err(e) = Http1Formatter::new().request(request, payload, &mut inner.output) {
            return e.into();
        }
        inner.output.flush_to(&mut inner.socket)
    }

    /// Writes the `100 Continue` interim response ahead of the body read.
    pub fn send_continue(&self, protocol: &Protocol) -> OperationStatus {
        let mut inner = self.lock();
        let inner = &mut *inner;
        let interim: Status = StatusCode::Continue.into();
        if let Err(e) =
            write!(inner.output, "{} {} {}\r\n\r\n", protocol, interim.code, interim.message)
        {
            return e.into();
        }
        inner.output.flush_to(&mut inner.socket)
    }

    /// Drains the message payload according to its framing.
    pub(crate) fn read_body(&self, kind: BodyKind) -> (Bytes, OperationStatus) {
        let mut inner = self.lock();
        let inner = &mut *inner;
        let mut io = FramedReader::new(&mut inner.socket, &mut inner.input);

        match kind {
            BodyKind::Exact(length) => {
                let bytes = io.read_exact(length);
                // data past the declared length is a framing violation
                if !io.buffer.is_empty() {
                    io.buffer.flag_unexpected_data();
                }
                let status = io.buffer.status().clone();
                (bytes, status)
            }
            BodyKind::Chunked => match ChunkedDecoder::read_all(&mut io) {
                Ok(bytes) => {
                    let status = io.buffer.status().clone();
                    (bytes, status)
                }
                Err(error) => (Bytes::new(), OperationStatus::error(error.to_string())),
            },
            BodyKind::UntilClose => {
                let bytes = io.read_to_end();
                let status = io.buffer.status().clone();
                (bytes, status)
            }
        }
    }

    /// Sets the read-side expectation directly (tests drive the buffer
    /// without a parser).
    pub(crate) fn expect_body(&self, byte_count: u64) {
        self.lock().input.expect_input(byte_count);
    }

    /// Read-side accounting, used to check framing invariants.
    pub fn input_stats(&self) -> (u64, u64) {
        let inner = self.lock();
        (inner.input.total_read_size(), inner.input.expected_input())
    }
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // try_lock: Debug must not deadlock while the channel is busy
        match self.inner.try_lock() {
            Ok(inner) => f
                .debug_struct("Connection")
                .field("remote", &inner.socket.remote_address().to_string())
                .finish(),
            Err(_) => f.write_str("Connection { .. }"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_is_idempotent() {
        let connection = Connection::memory(&b""[..]);
        assert!(connection.close(true).is_ok());
        assert!(connection.close(false).is_ok());
    }

    #[test]
    fn clones_share_the_channel() {
        let connection = Connection::memory(&b"abc"[..]);
        connection.expect_body(3);
        let other = connection.clone();

        let (bytes, status) = other.read_body(BodyKind::Exact(3));
        assert!(status.is_ok());
        assert_eq!(&bytes[..], b"abc");
        let (total_read, expected) = connection.input_stats();
        assert_eq!(total_read, 3);
        assert_eq!(expected, 0);
    }

    #[test]
    fn send_continue_writes_the_interim_line() {
        let connection = Connection::memory(&b""[..]);
        assert!(connection.send_continue(&Protocol::http_1_1()).is_ok());
        assert_eq!(connection.written(), b"HTTP/1.1 100 Continue\r\n\r\n");
    }
}
