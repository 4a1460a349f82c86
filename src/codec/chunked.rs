//! Chunked transfer framing: `size CRLF data CRLF` repeated until a zero
//! size, then optional trailer headers and a final blank line.

use std::io::{self, Write};

use bytes::{Bytes, BytesMut};

use crate::io::FramedReader;

use super::error::{DecodeError, MalformedChunkSnafu};

/// Reads chunked bodies from a framed stream.
pub struct ChunkedDecoder;

impl ChunkedDecoder {
    /// Drains the whole chunked body, discarding extensions and trailers.
    pub fn read_all(io: &mut FramedReader<'_>) -> Result<Bytes, DecodeError> {
        let mut output = BytesMut::new();
        loop {
            let size = Self::read_size_line(io)?;
            if size == 0 {
                Self::read_trailers(io)?;
                return Ok(output.freeze());
            }

            let data = io.read_exact(size);
            if (data.len() as u64) < size {
                return MalformedChunkSnafu { reason: "truncated chunk data" }.fail();
            }
            output.extend_from_slice(&data);
            Self::expect_crlf(io)?;
        }
    }

    /// `HEX[; extension] CRLF`. Linear whitespace may follow the digits; no
    /// digits may follow it.
    fn read_size_line(io: &mut FramedReader<'_>) -> Result<u64, DecodeError> {
        let mut size: u64 = 0;
        let mut digits = 0usize;
        loop {
            let byte = io
                .get()
                .ok_or_else(|| build_chunk_error("truncated chunk size"))?;
            match byte {
                b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' => {
                    let digit = (byte as char).to_digit(16).unwrap() as u64;
                    size = size
                        .checked_mul(16)
                        .and_then(|s| s.checked_add(digit))
                        .ok_or_else(|| build_chunk_error("chunk size overflow"))?;
                    digits += 1;
                }
                b' ' | b'\t' if digits > 0 => {
                    Self::skip_until_cr(io, true)?;
                    break;
                }
                b';' if digits > 0 => {
                    Self::skip_until_cr(io, false)?;
                    break;
                }
                b'\r' if digits > 0 => break,
                _ => return MalformedChunkSnafu { reason: "invalid chunk size" }.fail(),
            }
        }
        match io.get() {
            Some(b'\n') => Ok(size),
            _ => MalformedChunkSnafu { reason: "missing chunk size LF" }.fail(),
        }
    }

    /// Skips to the CR ending the size line. In whitespace mode only more
    /// whitespace or an extension may follow; extensions are ignored but may
    /// not contain a raw LF.
    fn skip_until_cr(io: &mut FramedReader<'_>, whitespace_only: bool) -> Result<(), DecodeError> {
        let mut in_extension = !whitespace_only;
        loop {
            match io.get() {
                Some(b'\r') => return Ok(()),
                Some(b'\n') => {
                    return MalformedChunkSnafu { reason: "newline inside chunk extension" }.fail()
                }
                Some(b' ') | Some(b'\t') => {}
                Some(b';') => in_extension = true,
                Some(_) if in_extension => {}
                Some(_) => {
                    return MalformedChunkSnafu { reason: "garbage after chunk size" }.fail()
                }
                None => return MalformedChunkSnafu { reason: "truncated chunk size" }.fail(),
            }
        }
    }

    fn expect_crlf(io: &mut FramedReader<'_>) -> Result<(), DecodeError> {
        if io.get() != Some(b'\r') || io.get() != Some(b'\n') {
            return MalformedChunkSnafu { reason: "chunk data not followed by CRLF" }.fail();
        }
        Ok(())
    }

    /// Consumes trailer lines up to and including the final blank line.
    fn read_trailers(io: &mut FramedReader<'_>) -> Result<(), DecodeError> {
        loop {
            let mut line_len = 0usize;
            loop {
                match io.get() {
                    Some(b'\n') => break,
                    Some(b'\r') => {}
                    Some(_) => line_len += 1,
                    None => {
                        return MalformedChunkSnafu { reason: "truncated trailers" }.fail()
                    }
                }
            }
            if line_len == 0 {
                return Ok(());
            }
        }
    }
}

fn build_chunk_error(reason: &'static str) -> DecodeError {
    DecodeError::MalformedChunk { reason }
}

/// Writes chunked framing.
pub struct ChunkedEncoder;

impl ChunkedEncoder {
    /// Frames one chunk; empty input writes nothing (a zero size would
    /// terminate the body).
    pub fn chunk(data: &[u8], out: &mut dyn Write) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        write!(out, "{:X}\r\n", data.len())?;
        out.write_all(data)?;
        out.write_all(b"\r\n")
    }

    /// Writes the terminating zero chunk.
    pub fn finish(out: &mut dyn Write) -> io::Result<()> {
        out.write_all(b"0\r\n\r\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{InputBuffer, TimeoutSocket, Transport};

    fn decode(input: &[u8]) -> Result<Bytes, DecodeError> {
        let mut socket = TimeoutSocket::new(Transport::memory(input));
        let mut buffer = InputBuffer::new();
        buffer.expect_unlimited_input();
        let mut io = FramedReader::new(&mut socket, &mut buffer);
        ChunkedDecoder::read_all(&mut io)
    }

    #[test]
    fn basic_chunks() {
        let body = decode(b"10\r\n1234567890abcdef\r\n3\r\nxyz\r\n0\r\n\r\n").unwrap();
        assert_eq!(&body[..], b"1234567890abcdefxyz");
    }

    #[test]
    fn extensions_and_trailers_are_skipped() {
        let body =
            decode(b"3;name=value\r\nabc\r\n0\r\nTrailer: ignored\r\n\r\n").unwrap();
        assert_eq!(&body[..], b"abc");
    }

    #[test]
    fn size_may_be_followed_by_whitespace() {
        let body = decode(b"3  \r\nabc\r\n0\r\n\r\n").unwrap();
        assert_eq!(&body[..], b"abc");
    }

    #[test]
    fn bad_size_is_rejected() {
        assert!(decode(b"zz\r\nabc\r\n0\r\n\r\n").is_err());
        assert!(decode(b"3\r\nabcde\r\n0\r\n\r\n").is_err());
        assert!(decode(b"3\r\nab").is_err());
    }

    #[test]
    fn round_trip_through_the_encoder() {
        let mut wire = Vec::new();
        ChunkedEncoder::chunk(b"hello ", &mut wire).unwrap();
        ChunkedEncoder::chunk(b"world", &mut wire).unwrap();
        ChunkedEncoder::finish(&mut wire).unwrap();

        let body = decode(&wire).unwrap();
        assert_eq!(&body[..], b"hello world");
    }
}
