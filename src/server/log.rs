//! Apache-style access-log formatting.
//!
//! Supported placeholders: `%h` remote host, `%l` (always `-`), `%u` auth
//! user, `%t` request time, `%r` request line, `%s` status code, `%b` body
//! size (`-` when empty), `%{Name}i` request header, `%P` worker index and
//! `%%`. Unknown placeholders are emitted verbatim.

use std::io::{self, Write};
use std::time::SystemTime;

use httpdate::fmt_http_date;

use crate::protocol::{Request, Response};

pub fn log_response(
    format: &str,
    worker: usize,
    request: &Request,
    response: &Response,
    output: &mut dyn Write,
) -> io::Result<()> {
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            write!(output, "{c}")?;
            continue;
        }

        match chars.next() {
            Some('%') => write!(output, "%")?,
            Some('h') => {
                let remote = request
                    .connection
                    .as_ref()
                    .map(|connection| connection.remote_address())
                    .unwrap_or_default();
                if remote.valid() {
                    write!(output, "{}", remote.host)?
                } else {
                    write!(output, "-")?
                }
            }
            Some('l') => write!(output, "-")?,
            Some('u') => {
                if request.auth.user.is_empty() {
                    write!(output, "-")?
                } else {
                    write!(output, "{}", request.auth.user)?
                }
            }
            Some('t') => write!(output, "[{}]", fmt_http_date(SystemTime::now()))?,
            Some('r') => {
                let mut target = request.uri.path.url_encoded(true);
                target.push_str(&request.uri.query_string(true));
                write!(output, "{} {} {}", request.method, target, request.protocol)?
            }
            Some('s') => write!(output, "{}", response.status.code)?,
            Some('b') => match response.body.content_length() {
                Some(size) if size > 0 => write!(output, "{size}")?,
                _ => write!(output, "-")?,
            },
            Some('P') => write!(output, "{worker}")?,
            Some('{') => {
                let name: String = chars.by_ref().take_while(|&c| c != '}').collect();
                match chars.next() {
                    Some('i') => {
                        write!(output, "{}", request.headers.get_or(&name, "-"))?
                    }
                    // not a request-header lookup: reproduce the input
                    Some(other) => write!(output, "%{{{name}}}{other}")?,
                    None => write!(output, "%{{{name}}}")?,
                }
            }
            Some(other) => write!(output, "%{other}")?,
            None => write!(output, "%")?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Auth, Protocol, Request, Response, Status};
    use std::io::Write as _;

    fn sample() -> (Request, Response) {
        let mut request = Request::get("/ping?x=1");
        request.headers.append("User-Agent", "curl/8.0");
        request.headers.append("Referer", "http://example.com/");
        request.auth = Auth::new("alice", "");

        let mut response = Response::new(Protocol::http_1_1());
        response.status = Status::new(404);
        response.body.start_output("text/plain");
        response.body.write_all(b"Not Found\n").unwrap();
        (request, response)
    }

    fn render(format: &str) -> String {
        let (request, response) = sample();
        let mut out = Vec::new();
        log_response(format, 2, &request, &response, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn request_line_status_and_size() {
        assert_eq!(render("\"%r\" %s %b"), "\"GET /ping?x=1 HTTP/1.1\" 404 10");
    }

    #[test]
    fn identity_placeholders() {
        assert_eq!(render("%h %l %u"), "- - alice");
    }

    #[test]
    fn header_lookups() {
        assert_eq!(
            render("\"%{Referer}i\" \"%{User-Agent}i\" \"%{Missing}i\""),
            "\"http://example.com/\" \"curl/8.0\" \"-\""
        );
    }

    #[test]
    fn worker_index_and_literal_percent() {
        assert_eq!(render("%P%%"), "2%");
    }

    #[test]
    fn unknown_placeholders_pass_through() {
        assert_eq!(render("%z %q"), "%z %q");
    }

    #[test]
    fn empty_body_logs_a_dash() {
        let (request, mut response) = sample();
        response.body = crate::protocol::Body::Empty;
        let mut out = Vec::new();
        log_response("%b", 0, &request, &response, &mut out).unwrap();
        assert_eq!(out, b"-");
    }
}
