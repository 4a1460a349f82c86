use crate::io::Connection;
use crate::uri::Uri;

use super::body::Body;
use super::cookie::CookieJar;
use super::headers::Headers;
use super::request::Request;
use super::status::{Status, StatusCode};
use super::version::Protocol;

/// An HTTP response: status, headers, cookies and payload.
#[derive(Debug, Default)]
pub struct Response {
    pub status: Status,
    pub protocol: Protocol,
    pub headers: Headers,
    pub cookies: CookieJar,
    pub body: Body,
    pub connection: Option<Connection>,
}

impl Response {
    /// A `200 OK` response speaking `protocol`.
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol, ..Self::default() }
    }

    pub fn from_status(status: impl Into<Status>, protocol: Protocol) -> Self {
        Self { status: status.into(), protocol, ..Self::default() }
    }

    /// A `302 Found` pointing at `location`.
    pub fn redirect(location: &Uri, protocol: Protocol) -> Self {
        let mut response = Self::from_status(StatusCode::Found, protocol);
        response.headers.append("Location", location.full());
        response
    }

    /// Discards the body when HTTP mandates one must not be sent: responses
    /// to `HEAD`, and the 1xx / 204 / 304 statuses.
    pub fn clean_body(&mut self, request: &Request) {
        if request.method == "HEAD" || self.is_bodyless() {
            self.body = Body::Empty;
        }
    }

    fn is_bodyless(&self) -> bool {
        matches!(self.status.code, 100..=199 | 204 | 304)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Method;
    use std::io::Write;

    fn response_with_body() -> Response {
        let mut response = Response::new(Protocol::http_1_1());
        response.body.start_output("text/plain");
        response.body.write_all(b"payload").unwrap();
        response
    }

    #[test]
    fn clean_body_for_head_requests() {
        let mut request = Request::default();
        request.method = Method::new("HEAD");

        let mut response = response_with_body();
        response.clean_body(&request);
        assert!(response.body.is_empty());
    }

    #[test]
    fn clean_body_for_bodyless_statuses() {
        let request = Request::default();
        for code in [100u16, 204, 304] {
            let mut response = response_with_body();
            response.status = Status::new(code);
            response.clean_body(&request);
            assert!(response.body.is_empty(), "status {code}");
        }

        let mut response = response_with_body();
        response.clean_body(&request);
        assert!(response.body.has_data());
    }

    #[test]
    fn redirect_sets_location() {
        let target = Uri::parse("http://example.com/next");
        let response = Response::redirect(&target, Protocol::http_1_1());
        assert_eq!(response.status, StatusCode::Found);
        assert_eq!(response.headers.get_or("Location", ""), "http://example.com/next");
    }
}
