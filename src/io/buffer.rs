//! Read-side and write-side buffers between the codec and the socket.
//!
//! The input buffer carries the parser's "expected input" hint: how many
//! more bytes the message framing says the socket owes us. Refills are sized
//! from that hint, and anything past it is flagged as unexpected data.

use bytes::{Bytes, BytesMut};

use crate::error::OperationStatus;
use crate::io::socket::TimeoutSocket;

/// Refill granularity when the expected size is unknown or large.
pub const CHUNK_SIZE: usize = 1024;

/// Sentinel for "read until the peer closes".
pub const UNLIMITED: u64 = u64::MAX;

/// Buffered byte source over a socket.
#[derive(Debug, Default)]
pub struct InputBuffer {
    data: BytesMut,
    expected: u64,
    total_read: u64,
    status: OperationStatus,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect `byte_count` more message bytes to be readable, counting what
    /// is already buffered.
    pub fn expect_input(&mut self, byte_count: u64) {
        let buffered = self.data.len() as u64;
        self.expected = if byte_count == UNLIMITED {
            UNLIMITED
        } else if byte_count > buffered {
            byte_count - buffered
        } else {
            0
        };
    }

    /// Expect an unspecified number of bytes; refills run in [`CHUNK_SIZE`]
    /// steps until the peer stops delivering.
    pub fn expect_unlimited_input(&mut self) {
        self.expected = UNLIMITED;
    }

    pub fn expected_input(&self) -> u64 {
        self.expected
    }

    /// Bytes pulled from the socket through this buffer so far.
    pub fn total_read_size(&self) -> u64 {
        self.total_read
    }

    /// What `total_read_size` will be once the expected input has arrived.
    pub fn total_expected_size(&self) -> u64 {
        if self.expected == UNLIMITED {
            UNLIMITED
        } else {
            self.total_read + self.expected
        }
    }

    pub fn status(&self) -> &OperationStatus {
        &self.status
    }

    pub fn error(&self) -> bool {
        self.status.is_error()
    }

    /// Marks data beyond the declared framing; the HTTP layer treats this as
    /// a bad request.
    pub fn flag_unexpected_data(&mut self) {
        self.status = OperationStatus::error("unexpected data in the stream");
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Pulls one refill from the socket, honoring the expected-input hint.
    /// Returns whether any bytes arrived.
    fn refill(&mut self, socket: &mut TimeoutSocket) -> bool {
        if self.expected == 0 {
            return false;
        }

        let request_size = if self.expected == UNLIMITED {
            CHUNK_SIZE
        } else {
            self.expected.min(CHUNK_SIZE as u64) as usize
        };

        let mut chunk = [0u8; CHUNK_SIZE];
        let (read_size, status) = socket.read_some(&mut chunk[..request_size]);
        if status.is_error() {
            self.status = status;
            return false;
        }

        self.total_read += read_size as u64;
        if self.expected != UNLIMITED {
            if read_size as u64 <= self.expected {
                self.expected -= read_size as u64;
            } else {
                self.flag_unexpected_data();
            }
        }
        if read_size == 0 && self.expected != UNLIMITED {
            // peer stopped short of the declared length
            self.expected = 0;
        }

        self.data.extend_from_slice(&chunk[..read_size]);
        read_size > 0
    }

    /// Next byte without consuming it; refills on underflow.
    pub fn peek(&mut self, socket: &mut TimeoutSocket) -> Option<u8> {
        if self.data.is_empty() && !self.refill(socket) {
            return None;
        }
        self.data.first().copied()
    }

    /// Consumes and returns the next byte.
    pub fn get(&mut self, socket: &mut TimeoutSocket) -> Option<u8> {
        let byte = self.peek(socket)?;
        let _ = self.data.split_to(1);
        Some(byte)
    }

    /// Consumes exactly `count` bytes, or everything available if the stream
    /// ends first.
    pub fn read_exact(&mut self, socket: &mut TimeoutSocket, count: u64) -> Bytes {
        while (self.data.len() as u64) < count {
            if !self.refill(socket) {
                break;
            }
        }
        let take = count.min(self.data.len() as u64) as usize;
        self.data.split_to(take).freeze()
    }

    /// Consumes until the peer closes the stream or an error fires.
    pub fn read_to_end(&mut self, socket: &mut TimeoutSocket) -> Bytes {
        while self.refill(socket) {}
        self.data.split().freeze()
    }
}

/// Accumulates a whole message and flushes it as one socket write.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    data: BytesMut,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn flush_to(&mut self, socket: &mut TimeoutSocket) -> OperationStatus {
        if self.data.is_empty() {
            return OperationStatus::ok();
        }
        let message = self.data.split();
        socket.write(&message)
    }
}

impl std::io::Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A borrow of the socket and its input buffer for the duration of one
/// parser call.
pub struct FramedReader<'a> {
    pub socket: &'a mut TimeoutSocket,
    pub buffer: &'a mut InputBuffer,
}

impl<'a> FramedReader<'a> {
    pub fn new(socket: &'a mut TimeoutSocket, buffer: &'a mut InputBuffer) -> Self {
        Self { socket, buffer }
    }

    pub fn peek(&mut self) -> Option<u8> {
        self.buffer.peek(self.socket)
    }

    pub fn get(&mut self) -> Option<u8> {
        self.buffer.get(self.socket)
    }

    pub fn read_exact(&mut self, count: u64) -> Bytes {
        self.buffer.read_exact(self.socket, count)
    }

    pub fn read_to_end(&mut self) -> Bytes {
        self.buffer.read_to_end(self.socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::socket::Transport;

    fn socket(input: &[u8]) -> TimeoutSocket {
        TimeoutSocket::new(Transport::memory(input))
    }

    #[test]
    fn expected_input_counts_buffered_bytes() {
        let mut socket = socket(b"abcdef");
        let mut buffer = InputBuffer::new();
        buffer.expect_unlimited_input();

        assert_eq!(buffer.get(&mut socket), Some(b'a'));
        // "bcdef" is already buffered, so expecting 5 means owing 0
        buffer.expect_input(5);
        assert_eq!(buffer.expected_input(), 0);
        assert_eq!(buffer.total_read_size(), 6);
        assert_eq!(buffer.total_expected_size(), 6);
    }

    #[test]
    fn exact_reads_stop_at_the_declared_length() {
        let mut socket = socket(b"0123456789");
        let mut buffer = InputBuffer::new();
        buffer.expect_input(4);

        let bytes = buffer.read_exact(&mut socket, 4);
        assert_eq!(&bytes[..], b"0123");
        assert_eq!(buffer.expected_input(), 0);
        assert_eq!(buffer.total_read_size(), 4);
        assert!(!buffer.error());
    }

    #[test]
    fn short_delivery_ends_the_stream() {
        let mut socket = socket(b"ab");
        let mut buffer = InputBuffer::new();
        buffer.expect_input(10);

        let bytes = buffer.read_exact(&mut socket, 10);
        assert_eq!(&bytes[..], b"ab");
        assert_eq!(buffer.expected_input(), 0);
    }

    #[test]
    fn read_to_end_drains_the_peer() {
        let data = vec![b'x'; CHUNK_SIZE * 2 + 17];
        let mut socket = socket(&data);
        let mut buffer = InputBuffer::new();
        buffer.expect_unlimited_input();

        let bytes = buffer.read_to_end(&mut socket);
        assert_eq!(bytes.len(), data.len());
        assert_eq!(buffer.total_read_size(), data.len() as u64);
    }

    #[test]
    fn drained_buffer_stops_reading() {
        let mut socket = socket(b"data");
        let mut buffer = InputBuffer::new();
        assert_eq!(buffer.expected_input(), 0);
        assert_eq!(buffer.get(&mut socket), None);
    }

    #[test]
    fn output_buffer_flushes_once() {
        use std::io::Write;

        let mut socket = socket(b"");
        let mut output = OutputBuffer::new();
        output.write_all(b"HTTP/1.1 200 OK\r\n").unwrap();
        output.write_all(b"\r\n").unwrap();

        assert!(output.flush_to(&mut socket).is_ok());
        assert!(output.is_empty());
        match socket.transport() {
            Transport::Memory(memory) => {
                assert_eq!(memory.written(), b"HTTP/1.1 200 OK\r\n\r\n")
            }
            _ => unreachable!(),
        }
    }
}
