//! The HTTP/1.x message formatter: the write-side twin of the parser.
//!
//! Serializes a response (server role) or request (client role) into a byte
//! sink, choosing the body framing from what is known about the payload:
//! a known size gets `Content-Length`, an unknown size gets chunked framing
//! on HTTP/1.1, and everything else falls back to write-then-close.

use std::io::{self, Write};
use std::time::SystemTime;

use bytes::Bytes;
use httpdate::fmt_http_date;

use crate::protocol::{CompoundHeader, Headers, Multipart, Protocol, Request, Response};

use super::chunked::ChunkedEncoder;

/// A materialized payload with what the formatter needs to know about it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Payload {
    #[default]
    Empty,
    /// Bytes whose length is part of the message framing.
    Sized(Bytes),
    /// Bytes drawn from a stream of unknown length.
    Streamed(Bytes),
}

/// Framing headers the formatter owns; user copies are dropped.
const FRAMING_HEADERS: &[&str] = &["Content-Length", "Transfer-Encoding"];

#[derive(Debug, Clone, Copy, Default)]
pub struct Http1Formatter;

impl Http1Formatter {
    pub fn new() -> Self {
        Self
    }

    /// Writes a whole response: status line, headers in insertion order,
    /// one `Set-Cookie` per cookie, then the framed body.
    pub fn response(
        &self,
        response: &Response,
        payload: Payload,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        write!(
            out,
            "{} {} {}\r\n",
            response.protocol, response.status.code, response.status.message
        )?;

        self.write_headers(&response.headers, out)?;
        if !response.headers.contains("Date") {
            write!(out, "Date: {}\r\n", fmt_http_date(SystemTime::now()))?;
        }
        for (name, cookie) in response.cookies.iter() {
            write!(out, "Set-Cookie: {name}={cookie}\r\n")?;
        }
        self.write_framing(&response.protocol, &response.headers, &payload, out)?;

        out.write_all(b"\r\n")?;
        self.write_payload(&response.protocol, payload, out)
    }

    /// Writes a whole client request.
    pub fn request(
        &self,
        request: &Request,
        payload: Payload,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        let mut target = request.uri.path.url_encoded(true);
        target.push_str(&request.uri.query_string(true));
        write!(out, "{} {} {}\r\n", request.method, target, request.protocol)?;

        if !request.headers.contains("Host") && !request.uri.authority.host.is_empty() {
            let mut host = Headers::new();
            let authority = &request.uri.authority;
            let name = if authority.host.contains(':') {
                format!("[{}]", authority.host)
            } else {
                authority.host.clone()
            };
            match authority.port {
                Some(port) => host.append("Host", format!("{name}:{port}")),
                None => host.append("Host", name),
            }
            self.write_headers(&host, out)?;
        }

        self.write_headers(&request.headers, out)?;
        if !request.user_agent.is_empty() && !request.headers.contains("User-Agent") {
            write!(out, "User-Agent: {}\r\n", request.user_agent)?;
        }
        if !request.auth.is_empty() && !request.headers.contains("Authorization") {
            write!(out, "Authorization: {}\r\n", request.auth.to_header())?;
        }
        if !request.cookies.is_empty() {
            let pairs: Vec<String> =
                request.cookies.iter().map(|(name, value)| format!("{name}={value}")).collect();
            write!(out, "Cookie: {}\r\n", pairs.join("; "))?;
        }

        match &payload {
            // requests without a payload carry no framing headers at all
            Payload::Empty => {}
            payload => self.write_framing(&request.protocol, &request.headers, payload, out)?,
        }

        out.write_all(b"\r\n")?;
        self.write_payload(&request.protocol, payload, out)
    }

    fn write_headers(&self, headers: &Headers, out: &mut dyn Write) -> io::Result<()> {
        for (name, value) in headers.iter() {
            if FRAMING_HEADERS.iter().any(|owned| name.eq_ignore_ascii_case(owned)) {
                continue;
            }
            write!(out, "{name}: {value}\r\n")?;
        }
        Ok(())
    }

    fn write_framing(
        &self,
        protocol: &Protocol,
        headers: &Headers,
        payload: &Payload,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        match payload {
            Payload::Empty => write!(out, "Content-Length: 0\r\n"),
            Payload::Sized(bytes) => write!(out, "Content-Length: {}\r\n", bytes.len()),
            Payload::Streamed(_) => {
                if protocol >= &Protocol::http_1_1() {
                    write!(out, "Transfer-Encoding: chunked\r\n")
                } else if !headers.contains("Connection") {
                    write!(out, "Connection: close\r\n")
                } else {
                    Ok(())
                }
            }
        }
    }

    fn write_payload(
        &self,
        protocol: &Protocol,
        payload: Payload,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        match payload {
            Payload::Empty => Ok(()),
            Payload::Sized(bytes) => out.write_all(&bytes),
            Payload::Streamed(bytes) => {
                if protocol >= &Protocol::http_1_1() {
                    ChunkedEncoder::chunk(&bytes, out)?;
                    ChunkedEncoder::finish(out)
                } else {
                    out.write_all(&bytes)
                }
            }
        }
    }

    /// Formats a `token; param=value; ...` header value.
    pub fn compound_header(&self, header: &CompoundHeader) -> String {
        header.to_string()
    }

    /// Writes multipart framing: each part behind a `--boundary` delimiter,
    /// closed by `--boundary--`.
    pub fn multipart(&self, multipart: &Multipart, out: &mut dyn Write) -> io::Result<()> {
        for part in &multipart.parts {
            write!(out, "--{}\r\n", multipart.boundary)?;
            for (name, value) in part.headers.iter() {
                write!(out, "{name}: {value}\r\n")?;
            }
            out.write_all(b"\r\n")?;
            out.write_all(&part.content)?;
            out.write_all(b"\r\n")?;
        }
        write!(out, "--{}--\r\n", multipart.boundary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{SetCookie, Status};

    fn render_response(response: &Response, payload: Payload) -> String {
        let formatter = Http1Formatter::new();
        let mut wire = Vec::new();
        formatter.response(response, payload, &mut wire).unwrap();
        String::from_utf8(wire).unwrap()
    }

    #[test]
    fn sized_payloads_get_a_content_length() {
        let mut response = Response::new(Protocol::http_1_1());
        response.headers.append("X-One", "1");
        let wire = render_response(&response, Payload::Sized(Bytes::from_static(b"hello")));

        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.contains("X-One: 1\r\n"));
        assert!(wire.contains("Content-Length: 5\r\n"));
        assert!(wire.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn streamed_payloads_get_chunked_framing_on_1_1() {
        let response = Response::new(Protocol::http_1_1());
        let wire = render_response(&response, Payload::Streamed(Bytes::from_static(b"hello")));
        assert!(wire.contains("Transfer-Encoding: chunked\r\n"));
        assert!(wire.ends_with("\r\n5\r\nhello\r\n0\r\n\r\n"));
    }

    #[test]
    fn streamed_payloads_close_the_connection_on_1_0() {
        let response = Response::new(Protocol::http_1_0());
        let wire = render_response(&response, Payload::Streamed(Bytes::from_static(b"hello")));
        assert!(wire.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(wire.contains("Connection: close\r\n"));
        assert!(wire.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn set_cookie_is_emitted_once_per_cookie() {
        let mut response = Response::new(Protocol::http_1_1());
        response.cookies.append("a", SetCookie::new("1"));
        response.cookies.append("b", SetCookie::new("2").with_attribute("Path", "/"));
        let wire = render_response(&response, Payload::Empty);

        assert!(wire.contains("Set-Cookie: a=1\r\n"));
        assert!(wire.contains("Set-Cookie: b=2; Path=/\r\n"));
    }

    #[test]
    fn user_framing_headers_are_dropped() {
        let mut response = Response::from_status(Status::new(204), Protocol::http_1_1());
        response.headers.append("content-length", "999");
        let wire = render_response(&response, Payload::Empty);
        assert!(wire.contains("Content-Length: 0\r\n"));
        assert!(!wire.contains("999"));
    }

    #[test]
    fn request_line_and_host() {
        let request = Request::get("http://example.com:8080/a%20b?q=1");
        let formatter = Http1Formatter::new();
        let mut wire = Vec::new();
        formatter.request(&request, Payload::Empty, &mut wire).unwrap();
        let wire = String::from_utf8(wire).unwrap();

        assert!(wire.starts_with("GET /a%20b?q=1 HTTP/1.1\r\n"));
        assert!(wire.contains("Host: example.com:8080\r\n"));
        assert!(!wire.contains("Content-Length"));
    }
}
