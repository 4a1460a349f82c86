//! The HTTP/1.x message parser.
//!
//! Reads a request (server role) or response (client role) from a framed
//! stream, leaving the payload attached to the stream for lazy reads. The
//! return value carries the *suggested status*: what the framing and headers
//! say the server should answer, handed to the handler as a starting point.

use tracing::trace;

use crate::error::OperationStatus;
use crate::io::buffer::UNLIMITED;
use crate::io::FramedReader;
use crate::protocol::{
    cookie, Auth, BodyKind, CompoundHeader, DataMap, Headers, Multipart, Protocol, Request,
    Response, Status, StatusCode,
};
use crate::uri::Uri;

use super::error::{
    DecodeError, ExpectationFailedSnafu, InvalidContentLengthSnafu, LengthRequiredSnafu,
    MalformedHeaderSnafu, MalformedRequestLineSnafu, MalformedStatusLineSnafu,
    PayloadTooLargeSnafu, TooLargeHeaderSnafu,
};

/// Grammar toggles.
///
/// Folded headers are an obsolete construct; it is compliant to either parse
/// them or reject the message, so the choice is a flag. Cookie headers are
/// normally consumed into the cookie multimap instead of the header map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserFlags {
    pub parse_folded_headers: bool,
    pub preserve_cookie_headers: bool,
}

/// A parsed request plus its payload framing and suggested status.
#[derive(Debug)]
pub struct ParsedRequest {
    pub request: Request,
    pub body: Option<BodyKind>,
    pub status: Status,
}

/// A parsed response head plus its payload framing.
#[derive(Debug)]
pub struct ParsedResponse {
    pub response: Response,
    pub body: Option<BodyKind>,
    pub status: Status,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Http1Parser {
    pub flags: ParserFlags,
}

impl Http1Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flags(flags: ParserFlags) -> Self {
        Self { flags }
    }

    /// Reads one request head, setting the stream's expected-input hint for
    /// the body.
    ///
    /// Transport-level failures (timeout, peer closed before a byte arrived)
    /// come back as `Err`; anything the peer actually sent yields `Ok` with
    /// the appropriate suggested status.
    pub fn request(
        &self,
        io: &mut FramedReader<'_>,
        max_request_size: u64,
    ) -> Result<ParsedRequest, OperationStatus> {
        let start_total = io.buffer.total_read_size();
        io.buffer.expect_unlimited_input();

        self.request_inner(io, max_request_size, start_total).or_else(|error| {
            if io.socket.timed_out() {
                return Err(OperationStatus::timeout());
            }
            if io.buffer.error() {
                return Err(io.buffer.status().clone());
            }
            if io.buffer.total_read_size() == start_total {
                return Err(OperationStatus::error("connection closed"));
            }
            trace!(error = %error, "request rejected");
            Ok(ParsedRequest {
                request: Request::default(),
                body: None,
                status: error.suggested_status(),
            })
        })
    }

    fn request_inner(
        &self,
        io: &mut FramedReader<'_>,
        max_request_size: u64,
        start_total: u64,
    ) -> Result<ParsedRequest, DecodeError> {
        // request line: METHOD SP TARGET SP PROTOCOL CRLF
        let line = read_line(io).ok_or_else(|| MalformedRequestLineSnafu.build())?;
        let mut parts = line.split_ascii_whitespace();
        let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(method), Some(target), Some(version), None) => (method, target, version),
            _ => return MalformedRequestLineSnafu.fail(),
        };

        let protocol: Protocol =
            version.parse().map_err(|_| MalformedRequestLineSnafu.build())?;
        if !protocol.valid() {
            return MalformedRequestLineSnafu.fail();
        }

        let uri = Uri::parse(target);
        let mut request = Request::new(method, uri, protocol);

        let mut cookies = DataMap::new();
        self.read_headers(
            io,
            &mut request.headers,
            if self.flags.preserve_cookie_headers { None } else { Some(&mut cookies) },
            max_request_size,
            start_total,
        )?;
        request.cookies = cookies;

        if let Some(value) = request.headers.get("User-Agent") {
            request.user_agent = value.clone();
        }
        if request.auth.is_empty() {
            if let Some(auth) = request.headers.get("Authorization").and_then(|v| Auth::parse_header(v))
            {
                request.auth = auth;
            }
        }

        // headers are in; the stream owes nothing until framing says so
        io.buffer.expect_input(0);
        let (body, status) =
            self.request_framing(io, &request.headers, &request.protocol, max_request_size)?;

        Ok(ParsedRequest { request, body, status })
    }

    /// Decides the payload framing and the suggested status from the header
    /// section.
    fn request_framing(
        &self,
        io: &mut FramedReader<'_>,
        headers: &Headers,
        protocol: &Protocol,
        max_request_size: u64,
    ) -> Result<(Option<BodyKind>, Status), DecodeError> {
        let continue_expected = protocol >= &Protocol::http_1_1()
            && headers.get_or("Expect", "").eq_ignore_ascii_case("100-continue");
        let suggested = || -> Status {
            if continue_expected {
                StatusCode::Continue.into()
            } else {
                Status::ok()
            }
        };

        if is_chunked(headers) {
            io.buffer.expect_unlimited_input();
            return Ok((Some(BodyKind::Chunked), suggested()));
        }

        if let Some(value) = headers.get("Content-Length") {
            let length: u64 = value
                .trim()
                .parse()
                .map_err(|_| InvalidContentLengthSnafu { value: value.clone() }.build())?;
            io.buffer.expect_input(length);
            if max_request_size != UNLIMITED && io.buffer.total_expected_size() > max_request_size
            {
                return PayloadTooLargeSnafu {
                    expected: io.buffer.total_expected_size(),
                    max: max_request_size,
                }
                .fail();
            }
            return Ok((Some(BodyKind::Exact(length)), suggested()));
        }

        if protocol >= &Protocol::http_1_1() && headers.contains("Expect") {
            return ExpectationFailedSnafu.fail();
        }

        // bytes already on the stream with no declared length
        if !io.buffer.is_empty() {
            return LengthRequiredSnafu.fail();
        }

        Ok((None, Status::ok()))
    }

    /// Reads one response head: `PROTOCOL SP CODE SP MESSAGE CRLF` plus
    /// headers.
    pub fn response(
        &self,
        io: &mut FramedReader<'_>,
        max_response_size: u64,
    ) -> Result<ParsedResponse, OperationStatus> {
        let start_total = io.buffer.total_read_size();
        io.buffer.expect_unlimited_input();

        match self.response_inner(io, max_response_size, start_total) {
            Ok(parsed) => Ok(parsed),
            Err(DecodeError::PayloadTooLarge { expected, max }) => Err(OperationStatus::error(
                format!("response too large: {expected} bytes, limit {max}"),
            )),
            Err(error) => {
                if io.socket.timed_out() {
                    return Err(OperationStatus::timeout());
                }
                if io.buffer.total_read_size() == start_total {
                    return Err(OperationStatus::error("connection closed"));
                }
                trace!(error = %error, "response rejected");
                Ok(ParsedResponse {
                    response: Response::default(),
                    body: None,
                    status: error.suggested_status(),
                })
            }
        }
    }

    fn response_inner(
        &self,
        io: &mut FramedReader<'_>,
        max_response_size: u64,
        start_total: u64,
    ) -> Result<ParsedResponse, DecodeError> {
        let line = read_line(io).ok_or_else(|| MalformedStatusLineSnafu.build())?;
        let mut parts = line.splitn(3, ' ');
        let (version, code) = match (parts.next(), parts.next()) {
            (Some(version), Some(code)) => (version, code),
            _ => return MalformedStatusLineSnafu.fail(),
        };
        let message = parts.next().unwrap_or("");

        let protocol: Protocol = version.parse().map_err(|_| MalformedStatusLineSnafu.build())?;
        if !protocol.valid() {
            return MalformedStatusLineSnafu.fail();
        }
        let code: u16 = code.parse().map_err(|_| MalformedStatusLineSnafu.build())?;

        let mut response = Response::new(protocol);
        response.status = Status::with_message(code, message);

        let mut headers = Headers::new();
        self.read_headers(io, &mut headers, None, max_response_size, start_total)?;

        if !self.flags.preserve_cookie_headers {
            for value in headers.get_all("Set-Cookie") {
                if let Some((name, cookie)) = cookie::parse_set_cookie(value) {
                    response.cookies.append(name, cookie);
                }
            }
            headers.remove("Set-Cookie");
        }
        response.headers = headers;

        io.buffer.expect_input(0);
        let body = self.response_framing(io, &response.headers, max_response_size)?;

        Ok(ParsedResponse { response, body, status: Status::ok() })
    }

    fn response_framing(
        &self,
        io: &mut FramedReader<'_>,
        headers: &Headers,
        max_response_size: u64,
    ) -> Result<Option<BodyKind>, DecodeError> {
        if is_chunked(headers) {
            io.buffer.expect_unlimited_input();
            return Ok(Some(BodyKind::Chunked));
        }

        if let Some(value) = headers.get("Content-Length") {
            let length: u64 = value
                .trim()
                .parse()
                .map_err(|_| InvalidContentLengthSnafu { value: value.clone() }.build())?;
            io.buffer.expect_input(length);
            if max_response_size != UNLIMITED
                && io.buffer.total_expected_size() > max_response_size
            {
                return PayloadTooLargeSnafu {
                    expected: io.buffer.total_expected_size(),
                    max: max_response_size,
                }
                .fail();
            }
            return Ok(Some(BodyKind::Exact(length)));
        }

        // no framing headers: the body runs until the peer closes
        io.buffer.expect_unlimited_input();
        Ok(Some(BodyKind::UntilClose))
    }

    /// Header block: `name: value CRLF` lines up to an empty line.
    fn read_headers(
        &self,
        io: &mut FramedReader<'_>,
        headers: &mut Headers,
        mut cookies: Option<&mut DataMap>,
        max_size: u64,
        start_total: u64,
    ) -> Result<(), DecodeError> {
        if let Some(jar) = cookies.as_deref_mut() {
            jar.clear();
        }

        loop {
            if max_size != UNLIMITED && io.buffer.total_read_size() - start_total > max_size {
                return TooLargeHeaderSnafu {
                    current: io.buffer.total_read_size() - start_total,
                    max: max_size,
                }
                .fail();
            }

            match io.peek() {
                None => return MalformedHeaderSnafu { reason: "truncated header block" }.fail(),
                Some(b'\r') => {
                    io.get();
                    return match io.get() {
                        Some(b'\n') => Ok(()),
                        _ => MalformedHeaderSnafu { reason: "stray CR in header block" }.fail(),
                    };
                }
                Some(b'\n') => {
                    io.get();
                    return Ok(());
                }
                Some(b' ') | Some(b'\t') => {
                    // (obsolete) header folding: continuation joined by a space
                    if !self.flags.parse_folded_headers {
                        return MalformedHeaderSnafu { reason: "folded header" }.fail();
                    }
                    while matches!(io.peek(), Some(b' ') | Some(b'\t')) {
                        io.get();
                    }
                    let continuation = read_line(io)
                        .ok_or_else(|| MalformedHeaderSnafu { reason: "truncated header" }.build())?;
                    let Some((_, value)) = headers.back_mut() else {
                        return MalformedHeaderSnafu { reason: "continuation before any header" }
                            .fail();
                    };
                    value.push(' ');
                    value.push_str(&continuation);
                }
                Some(_) => {
                    let name = read_header_name(io)?;
                    skip_spaces(io);

                    if !self.flags.preserve_cookie_headers
                        && name.eq_ignore_ascii_case("Cookie")
                        && cookies.is_some()
                    {
                        let line = read_line(io).ok_or_else(|| {
                            MalformedHeaderSnafu { reason: "truncated cookie header" }.build()
                        })?;
                        let jar = cookies.as_deref_mut().unwrap();
                        if !cookie::parse_cookies(&line, jar) {
                            return MalformedHeaderSnafu { reason: "malformed cookie list" }.fail();
                        }
                        continue;
                    }

                    let value = if io.peek() == Some(b'"') {
                        read_quoted_value(io)?
                    } else {
                        read_line(io).ok_or_else(|| {
                            MalformedHeaderSnafu { reason: "truncated header" }.build()
                        })?
                    };
                    headers.append(name, value);
                }
            }
        }
    }

    /// Parses a multipart body against `boundary`. Returns `None` on
    /// malformed framing.
    pub fn multipart(&self, content: &[u8], boundary: &str) -> Option<Multipart> {
        if boundary.is_empty() {
            return None;
        }

        let delimiter = format!("--{boundary}").into_bytes();
        let separator = format!("\r\n--{boundary}").into_bytes();

        let mut multipart = Multipart::new(boundary);

        // anything before the first delimiter is preamble
        let first = find(content, &delimiter)?;
        let mut cursor = &content[first + delimiter.len()..];

        loop {
            if cursor.starts_with(b"--") {
                return Some(multipart);
            }

            // transport padding, then the line break opening the part
            while let Some((&(b' ' | b'\t'), rest)) = cursor.split_first() {
                cursor = rest;
            }
            cursor = cursor
                .strip_prefix(b"\r\n")
                .or_else(|| cursor.strip_prefix(b"\n"))?;

            let end = find(cursor, &separator)?;
            let region = &cursor[..end];

            let (header_text, part_content) = if let Some(rest) = region.strip_prefix(b"\r\n") {
                (&region[..0], rest)
            } else if let Some(split) = find(region, b"\r\n\r\n") {
                (&region[..split], &region[split + 4..])
            } else {
                return None;
            };

            let headers =
                self.parse_header_block(&String::from_utf8_lossy(header_text))?;
            multipart.push(headers, part_content.to_vec());

            cursor = &cursor[end + separator.len()..];
        }
    }

    /// Parses a standalone header block (multipart part headers).
    fn parse_header_block(&self, text: &str) -> Option<Headers> {
        let mut headers = Headers::new();
        for line in text.split_terminator('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                if !self.flags.parse_folded_headers {
                    return None;
                }
                let (_, value) = headers.back_mut()?;
                value.push(' ');
                value.push_str(line.trim_start());
                continue;
            }
            let (name, value) = line.split_once(':')?;
            headers.append(name, value.trim_start());
        }
        Some(headers)
    }

    /// Parses a `token; param=value; ...` header value.
    pub fn compound_header(&self, value: &str) -> CompoundHeader {
        CompoundHeader::parse(value)
    }
}

/// `Transfer-Encoding` applies chunked framing when chunked is the final
/// coding.
fn is_chunked(headers: &Headers) -> bool {
    headers
        .get("Transfer-Encoding")
        .and_then(|encodings| encodings.rsplit(',').next())
        .map(|last| last.trim().eq_ignore_ascii_case("chunked"))
        .unwrap_or(false)
}

/// Reads up to and including a LF, tolerating a lone LF where obsolete
/// practice established it; the CR is stripped. `None` means the stream
/// ended first.
fn read_line(io: &mut FramedReader<'_>) -> Option<String> {
    let mut line: Vec<u8> = Vec::new();
    loop {
        match io.get()? {
            b'\n' => {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Some(String::from_utf8_lossy(&line).into_owned());
            }
            byte => line.push(byte),
        }
    }
}

/// Reads a header name up to the colon; CR, LF or EOF first is malformed.
fn read_header_name(io: &mut FramedReader<'_>) -> Result<String, DecodeError> {
    let mut name: Vec<u8> = Vec::new();
    loop {
        match io.get() {
            Some(b':') => {
                return Ok(String::from_utf8_lossy(&name).into_owned());
            }
            Some(b'\r') | Some(b'\n') | None => {
                return MalformedHeaderSnafu { reason: "header line without a colon" }.fail()
            }
            Some(byte) => name.push(byte),
        }
    }
}

fn skip_spaces(io: &mut FramedReader<'_>) {
    while matches!(io.peek(), Some(b' ') | Some(b'\t')) {
        io.get();
    }
}

/// Reads a `"..."` header value with backslash escapes, then discards the
/// rest of the line.
fn read_quoted_value(io: &mut FramedReader<'_>) -> Result<String, DecodeError> {
    io.get(); // opening quote
    let mut value: Vec<u8> = Vec::new();
    loop {
        match io.get() {
            Some(b'"') => break,
            Some(b'\\') => match io.get() {
                Some(escaped) if escaped != b'\r' && escaped != b'\n' => value.push(escaped),
                _ => return MalformedHeaderSnafu { reason: "unterminated quoted value" }.fail(),
            },
            Some(b'\r') | Some(b'\n') | None => {
                return MalformedHeaderSnafu { reason: "unterminated quoted value" }.fail()
            }
            Some(byte) => value.push(byte),
        }
    }
    read_line(io)
        .ok_or_else(|| MalformedHeaderSnafu { reason: "truncated header" }.build())?;
    Ok(String::from_utf8_lossy(&value).into_owned())
}

/// First occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
