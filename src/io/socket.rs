//! Socket layer: a capability interface over plain TCP, TLS and in-memory
//! transports, and the deadline-enforcing wrapper the rest of the crate
//! reads and writes through.

use std::fmt::{self, Debug, Formatter};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::error::OperationStatus;
use crate::io::address::IPAddress;
use crate::io::tls::TlsSocket;

/// Concrete transports, selected by tag at construction time.
pub enum Transport {
    Plain(PlainSocket),
    Tls(TlsSocket),
    Memory(MemorySocket),
}

impl Transport {
    pub fn plain() -> Self {
        Self::Plain(PlainSocket::new())
    }

    pub fn tls() -> Self {
        Self::Tls(TlsSocket::new())
    }

    pub fn memory(input: impl Into<Vec<u8>>) -> Self {
        Self::Memory(MemorySocket::new(input.into()))
    }

    fn close(&mut self, graceful: bool) -> OperationStatus {
        match self {
            Self::Plain(socket) => socket.close(graceful),
            Self::Tls(socket) => socket.close(graceful),
            Self::Memory(socket) => socket.close(),
        }
    }

    fn is_open(&self) -> bool {
        match self {
            Self::Plain(socket) => socket.stream.is_some(),
            Self::Tls(socket) => socket.is_open(),
            Self::Memory(socket) => socket.open,
        }
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(socket) => socket.stream_mut()?.read(buf),
            Self::Tls(socket) => socket.read_some(buf),
            Self::Memory(socket) => socket.input.read(buf),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Plain(socket) => socket.stream_mut()?.write_all(data),
            Self::Tls(socket) => socket.write_all(data),
            Self::Memory(socket) => {
                socket.output.extend_from_slice(data);
                Ok(())
            }
        }
    }

    fn set_io_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let stream = match self {
            Self::Plain(socket) => socket.stream.as_ref(),
            Self::Tls(socket) => socket.tcp(),
            Self::Memory(_) => None,
        };
        if let Some(stream) = stream {
            stream.set_read_timeout(timeout)?;
            stream.set_write_timeout(timeout)?;
        }
        Ok(())
    }

    fn install(&mut self, stream: TcpStream) {
        match self {
            Self::Plain(socket) => socket.stream = Some(stream),
            Self::Tls(socket) => socket.install(stream),
            Self::Memory(_) => {}
        }
    }

    fn remote_address(&self) -> IPAddress {
        match self {
            Self::Plain(socket) => socket.remote_address(),
            Self::Tls(socket) => socket.remote_address(),
            Self::Memory(_) => IPAddress::default(),
        }
    }

    fn local_address(&self) -> IPAddress {
        match self {
            Self::Plain(socket) => socket.local_address(),
            Self::Tls(socket) => socket.local_address(),
            Self::Memory(_) => IPAddress::default(),
        }
    }
}

/// Plain TCP transport.
pub struct PlainSocket {
    stream: Option<TcpStream>,
}

impl PlainSocket {
    pub fn new() -> Self {
        Self { stream: None }
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream: Some(stream) }
    }

    fn stream_mut(&mut self) -> io::Result<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }

    fn close(&mut self, graceful: bool) -> OperationStatus {
        if let Some(stream) = self.stream.take() {
            let how = if graceful { Shutdown::Write } else { Shutdown::Both };
            if let Err(e) = stream.shutdown(how) {
                if e.kind() != io::ErrorKind::NotConnected {
                    return OperationStatus::error(e.to_string());
                }
            }
        }
        OperationStatus::ok()
    }

    fn remote_address(&self) -> IPAddress {
        self.stream
            .as_ref()
            .and_then(|s| s.peer_addr().ok())
            .map(IPAddress::from)
            .unwrap_or_default()
    }

    fn local_address(&self) -> IPAddress {
        self.stream
            .as_ref()
            .and_then(|s| s.local_addr().ok())
            .map(IPAddress::from)
            .unwrap_or_default()
    }
}

impl Default for PlainSocket {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory transport; reads come from a fixed buffer, writes accumulate.
/// Stands in for a peer when exercising the codec without a network.
pub struct MemorySocket {
    input: io::Cursor<Vec<u8>>,
    output: Vec<u8>,
    open: bool,
}

impl MemorySocket {
    pub fn new(input: Vec<u8>) -> Self {
        Self { input: io::Cursor::new(input), output: Vec::new(), open: true }
    }

    pub fn written(&self) -> &[u8] {
        &self.output
    }

    fn close(&mut self) -> OperationStatus {
        self.open = false;
        OperationStatus::ok()
    }
}

/// A transport with an overall deadline applied to every blocking call.
///
/// The deadline is enforced by computing the remaining time before each
/// syscall and applying it as the OS-level socket timeout; once it fires,
/// subsequent calls short-circuit with `timeout` until the timeout is reset.
pub struct TimeoutSocket {
    transport: Transport,
    deadline: Option<Instant>,
    timed_out: bool,
}

impl TimeoutSocket {
    pub fn new(transport: Transport) -> Self {
        Self { transport, deadline: None, timed_out: false }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
        self.timed_out = false;
    }

    pub fn clear_timeout(&mut self) {
        self.deadline = None;
        self.timed_out = false;
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
            || self.deadline.map(|deadline| deadline <= Instant::now()).unwrap_or(false)
    }

    pub(crate) fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub(crate) fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Remaining time before the deadline, or an immediate `timeout` status.
    pub(crate) fn remaining(&mut self) -> Result<Option<Duration>, OperationStatus> {
        match self.deadline {
            None => Ok(None),
            Some(deadline) => {
                let now = Instant::now();
                if self.timed_out || deadline <= now {
                    self.timed_out = true;
                    Err(OperationStatus::timeout())
                } else {
                    Ok(Some(deadline - now))
                }
            }
        }
    }

    fn begin_io(&mut self) -> Result<(), OperationStatus> {
        let remaining = self.remaining()?;
        self.transport.set_io_timeout(remaining).map_err(OperationStatus::from)?;
        Ok(())
    }

    fn fail(&mut self, error: io::Error) -> OperationStatus {
        let status = OperationStatus::from(error);
        if status.is_timeout() {
            self.timed_out = true;
        }
        status
    }

    /// Reads whatever is available, up to `buf.len()` bytes. Zero bytes with
    /// an ok status means the peer closed the stream.
    pub fn read_some(&mut self, buf: &mut [u8]) -> (usize, OperationStatus) {
        if let Err(status) = self.begin_io() {
            return (0, status);
        }
        match self.transport.read_some(buf) {
            Ok(size) => (size, OperationStatus::ok()),
            Err(e) => (0, self.fail(e)),
        }
    }

    /// Writes all of `data` or fails.
    pub fn write(&mut self, data: &[u8]) -> OperationStatus {
        if let Err(status) = self.begin_io() {
            return status;
        }
        match self.transport.write_all(data) {
            Ok(()) => OperationStatus::ok(),
            Err(e) => self.fail(e),
        }
    }

    /// Tries `endpoints` in order until one connects or the deadline fires.
    pub fn connect(&mut self, endpoints: &[SocketAddr]) -> OperationStatus {
        if endpoints.is_empty() {
            return OperationStatus::error("no endpoints to connect to");
        }

        let mut last_error = OperationStatus::error("connect failed");
        for endpoint in endpoints {
            let attempt = match self.remaining() {
                Ok(Some(remaining)) => TcpStream::connect_timeout(endpoint, remaining),
                Ok(None) => TcpStream::connect(endpoint),
                Err(status) => return status,
            };
            match attempt {
                Ok(stream) => {
                    self.transport.install(stream);
                    return OperationStatus::ok();
                }
                Err(e) => last_error = self.fail(e),
            }
        }
        last_error
    }

    /// Resolves `host` and `service` (a port number or a scheme name) to a
    /// list of endpoints. Resolution itself is not deadline-bounded; the
    /// system resolver owns its own timeouts.
    pub fn resolve(host: &str, service: &str) -> Result<Vec<SocketAddr>, OperationStatus> {
        let port: u16 = match service.parse() {
            Ok(port) => port,
            Err(_) => match service {
                "http" => 80,
                "https" => 443,
                _ => return Err(OperationStatus::error(format!("unknown service: {service}"))),
            },
        };

        let endpoints: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| OperationStatus::error(e.to_string()))?
            .collect();

        if endpoints.is_empty() {
            Err(OperationStatus::error(format!("no addresses for {host}")))
        } else {
            Ok(endpoints)
        }
    }

    /// Runs the TLS handshake under the current deadline. Fails on non-TLS
    /// transports.
    pub fn handshake(
        &mut self,
        role: crate::io::tls::TlsRole,
        config: &crate::io::tls::TlsConfig,
        server_name: &str,
    ) -> OperationStatus {
        if let Err(status) = self.begin_io() {
            return status;
        }
        match &mut self.transport {
            Transport::Tls(socket) => match socket.handshake(role, config, server_name) {
                Ok(()) => OperationStatus::ok(),
                Err(status) => {
                    if status.is_timeout() {
                        self.timed_out = true;
                    }
                    status
                }
            },
            _ => OperationStatus::error("not a TLS transport"),
        }
    }

    /// The negotiated TLS peer name, when this is a TLS transport.
    pub fn peer_common_name(&self) -> Option<String> {
        match &self.transport {
            Transport::Tls(socket) => socket.peer_common_name().map(str::to_string),
            _ => None,
        }
    }

    /// Closing twice is fine; a graceful close lets queued writes drain.
    pub fn close(&mut self, graceful: bool) -> OperationStatus {
        self.transport.close(graceful)
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn remote_address(&self) -> IPAddress {
        self.transport.remote_address()
    }

    pub fn local_address(&self) -> IPAddress {
        self.transport.local_address()
    }
}

impl Debug for TimeoutSocket {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let kind = match self.transport {
            Transport::Plain(_) => "plain",
            Transport::Tls(_) => "tls",
            Transport::Memory(_) => "memory",
        };
        f.debug_struct("TimeoutSocket")
            .field("transport", &kind)
            .field("remote", &self.remote_address().to_string())
            .field("timed_out", &self.timed_out)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_transport_reads_and_records_writes() {
        let mut socket = TimeoutSocket::new(Transport::memory(&b"hello"[..]));
        let mut buf = [0u8; 3];

        let (size, status) = socket.read_some(&mut buf);
        assert!(status.is_ok());
        assert_eq!(&buf[..size], b"hel");

        assert!(socket.write(b"out").is_ok());
        match socket.transport() {
            Transport::Memory(memory) => assert_eq!(memory.written(), b"out"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn expired_deadline_short_circuits() {
        let mut socket = TimeoutSocket::new(Transport::memory(&b"data"[..]));
        socket.set_timeout(Duration::from_secs(0));

        let (size, status) = socket.read_some(&mut [0u8; 4]);
        assert_eq!(size, 0);
        assert!(status.is_timeout());
        assert!(socket.timed_out());

        // still timed out until the timeout is reset
        assert!(socket.write(b"x").is_timeout());
        socket.clear_timeout();
        assert!(!socket.timed_out());
        assert!(socket.write(b"x").is_ok());
    }

    #[test]
    fn resolve_maps_schemes_to_ports() {
        let endpoints = TimeoutSocket::resolve("127.0.0.1", "http").unwrap();
        assert!(endpoints.iter().all(|e| e.port() == 80));
        let endpoints = TimeoutSocket::resolve("127.0.0.1", "8080").unwrap();
        assert!(endpoints.iter().all(|e| e.port() == 8080));
        assert!(TimeoutSocket::resolve("127.0.0.1", "gopher").is_err());
    }

    #[test]
    fn close_is_idempotent() {
        let mut socket = TimeoutSocket::new(Transport::plain());
        assert!(socket.close(true).is_ok());
        assert!(socket.close(false).is_ok());
        assert!(!socket.is_open());
    }
}
