//! Message payloads.
//!
//! A [`Body`] is in one of three states: empty, an output buffer being
//! written by the application, or a lazy view over the connection the
//! message arrived on. Input bodies are consumed at most once; a second
//! `read_all` yields nothing and raises the error flag.

use std::io::{self, Write};

use bytes::{Bytes, BytesMut};

use crate::codec::Payload;
use crate::io::Connection;

use super::mime::MimeType;

/// How the remaining payload bytes are framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Exactly this many bytes (`Content-Length`).
    Exact(u64),
    /// `Transfer-Encoding: chunked` framing.
    Chunked,
    /// Everything until the peer closes.
    UntilClose,
}

#[derive(Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    Writer(BodyWriter),
    Reader(BodyReader),
}

/// Output-buffer state: application-written bytes with a fixed media type.
#[derive(Debug, Default)]
pub struct BodyWriter {
    content_type: MimeType,
    data: BytesMut,
}

/// Input-view state: attached to the upstream buffered stream.
#[derive(Debug)]
pub struct BodyReader {
    connection: Connection,
    kind: BodyKind,
    content_type: MimeType,
    consumed: bool,
    failed: bool,
    read_size: u64,
}

impl Body {
    /// Switches to the writable state, discarding any previous content.
    pub fn start_output(&mut self, content_type: impl Into<MimeType>) {
        *self = Body::Writer(BodyWriter { content_type: content_type.into(), data: BytesMut::new() });
    }

    pub(crate) fn attach_reader(
        connection: Connection,
        kind: BodyKind,
        content_type: MimeType,
    ) -> Self {
        Body::Reader(BodyReader {
            connection,
            kind,
            content_type,
            consumed: false,
            failed: false,
            read_size: 0,
        })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    pub fn has_data(&self) -> bool {
        !self.is_empty()
    }

    pub fn content_type(&self) -> MimeType {
        match self {
            Body::Empty => MimeType::default(),
            Body::Writer(writer) => writer.content_type.clone(),
            Body::Reader(reader) => reader.content_type.clone(),
        }
    }

    /// Payload size when known up front.
    pub fn content_length(&self) -> Option<u64> {
        match self {
            Body::Empty => Some(0),
            Body::Writer(writer) => Some(writer.data.len() as u64),
            Body::Reader(reader) => match reader.kind {
                BodyKind::Exact(size) => Some(size),
                BodyKind::Chunked | BodyKind::UntilClose => None,
            },
        }
    }

    /// Total bytes the framing says will have been read once drained.
    pub fn total_expected(&self) -> Option<u64> {
        self.content_length()
    }

    /// Bytes consumed from the stream so far (input state only).
    pub fn read_size(&self) -> u64 {
        match self {
            Body::Reader(reader) => reader.read_size,
            _ => 0,
        }
    }

    pub fn error(&self) -> bool {
        matches!(self, Body::Reader(reader) if reader.failed)
    }

    /// The payload bytes.
    ///
    /// In the input state this is a consuming read: the first call drains
    /// the stream, any further call returns empty and sets the error flag.
    /// In the output state the buffered bytes are returned repeatably.
    pub fn read_all(&mut self) -> Bytes {
        match self {
            Body::Empty => Bytes::new(),
            Body::Writer(writer) => Bytes::copy_from_slice(&writer.data),
            Body::Reader(reader) => reader.read_all(),
        }
    }

    /// Copies output-state content into `out`; repeatable.
    pub fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        if let Body::Writer(writer) = self {
            out.write_all(&writer.data)?;
        }
        Ok(())
    }

    pub(crate) fn take_payload(&mut self) -> Payload {
        match self {
            Body::Empty => Payload::Empty,
            Body::Writer(writer) => Payload::Sized(writer.data.split().freeze()),
            Body::Reader(reader) => {
                let known = matches!(reader.kind, BodyKind::Exact(_));
                let bytes = reader.read_all();
                if known {
                    Payload::Sized(bytes)
                } else {
                    Payload::Streamed(bytes)
                }
            }
        }
    }
}

impl Write for Body {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Body::Writer(writer) => {
                writer.data.extend_from_slice(buf);
                Ok(buf.len())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "body is not in the output state; call start_output first",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BodyReader {
    fn read_all(&mut self) -> Bytes {
        if self.consumed {
            self.failed = true;
            return Bytes::new();
        }
        self.consumed = true;

        let (bytes, status) = self.connection.read_body(self.kind);
        self.read_size += bytes.len() as u64;

        if status.is_error() {
            self.failed = true;
        }
        if let BodyKind::Exact(expected) = self.kind {
            if (bytes.len() as u64) < expected {
                self.failed = true;
            }
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_state_is_repeatable() {
        let mut body = Body::default();
        assert!(body.is_empty());
        assert!(body.write(b"x").is_err());

        body.start_output(MimeType::new("text", "plain"));
        body.write_all(b"hello\n").unwrap();

        assert_eq!(&body.read_all()[..], b"hello\n");
        assert_eq!(&body.read_all()[..], b"hello\n");
        assert_eq!(body.content_length(), Some(6));
        assert_eq!(body.content_type().to_string(), "text/plain");

        let mut copy = Vec::new();
        body.write_to(&mut copy).unwrap();
        body.write_to(&mut copy).unwrap();
        assert_eq!(copy, b"hello\nhello\n");
    }

    #[test]
    fn reader_state_consumes_once() {
        let connection = Connection::memory(&b"abc"[..]);
        connection.expect_body(3);
        let mut body =
            Body::attach_reader(connection, BodyKind::Exact(3), MimeType::new("text", "plain"));

        assert_eq!(body.content_length(), Some(3));
        assert_eq!(&body.read_all()[..], b"abc");
        assert!(!body.error());

        // second consuming read: empty, error flag raised
        assert!(body.read_all().is_empty());
        assert!(body.error());
    }

    #[test]
    fn short_stream_flags_an_error() {
        let connection = Connection::memory(&b"ab"[..]);
        connection.expect_body(5);
        let mut body =
            Body::attach_reader(connection, BodyKind::Exact(5), MimeType::default());
        assert_eq!(&body.read_all()[..], b"ab");
        assert!(body.error());
    }
}
