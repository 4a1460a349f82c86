//! The client engine: connect, send, receive, follow redirects.

mod async_client;

pub use async_client::AsyncClient;

use std::time::Duration;

use tracing::debug;

use crate::codec::{Http1Parser, ParserFlags};
use crate::error::OperationStatus;
use crate::io::buffer::UNLIMITED;
use crate::io::{Connection, TimeoutSocket, TlsConfig, TlsRole, Transport};
use crate::protocol::{Request, Response, StatusType};
use crate::uri::Uri;

/// The library-qualified default `User-Agent`.
pub const DEFAULT_USER_AGENT: &str = concat!("mono-http/", env!("CARGO_PKG_VERSION"));

/// A synchronous HTTP/1.x client.
#[derive(Debug, Clone)]
pub struct Client {
    user_agent: String,
    max_redirects: u32,
    timeout: Option<Duration>,
    max_response_size: u64,
    tls: TlsConfig,
    flags: ParserFlags,
}

impl Default for Client {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_redirects: 0,
            timeout: None,
            max_response_size: UNLIMITED,
            tls: TlsConfig::default(),
            flags: ParserFlags::default(),
        }
    }
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn set_user_agent(&mut self, user_agent: impl Into<String>) {
        self.user_agent = user_agent.into();
    }

    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    /// How many `3xx` responses to follow before surfacing the last one
    /// verbatim.
    pub fn set_max_redirects(&mut self, max_redirects: u32) {
        self.max_redirects = max_redirects;
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    pub fn clear_timeout(&mut self) {
        self.timeout = None;
    }

    pub fn max_response_size(&self) -> u64 {
        self.max_response_size
    }

    /// Responses framed larger than this fail the query.
    pub fn set_max_response_size(&mut self, size: u64) {
        self.max_response_size = size;
    }

    pub fn set_unlimited_response_size(&mut self) {
        self.max_response_size = UNLIMITED;
    }

    pub fn set_tls_config(&mut self, tls: TlsConfig) {
        self.tls = tls;
    }

    pub fn tls_config_mut(&mut self) -> &mut TlsConfig {
        &mut self.tls
    }

    pub fn set_parser_flags(&mut self, flags: ParserFlags) {
        self.flags = flags;
    }

    /// Opens a connection to the target of `uri`, running the TLS handshake
    /// for `https` targets.
    pub fn connect(&self, target: &Uri) -> Result<Connection, OperationStatus> {
        let scheme = if target.scheme.is_empty() { "http" } else { target.scheme.as_str() };
        let secure = scheme == "https";

        let connection =
            Connection::new(if secure { Transport::tls() } else { Transport::plain() });
        match self.timeout {
            Some(timeout) => connection.set_timeout(timeout),
            None => connection.clear_timeout(),
        }

        let service = match target.authority.port {
            Some(port) => port.to_string(),
            None => scheme.to_string(),
        };
        let endpoints = TimeoutSocket::resolve(&target.authority.host, &service)?;

        let status = connection.connect(&endpoints);
        if status.is_error() {
            return Err(status);
        }

        let status = self.on_connect(target, &connection);
        if status.is_error() {
            return Err(status);
        }
        Ok(connection)
    }

    /// Ran right after the transport connects; handshakes `https` targets.
    fn on_connect(&self, target: &Uri, connection: &Connection) -> OperationStatus {
        if target.scheme == "https" {
            connection.handshake(TlsRole::Client, &self.tls, &target.authority.host)
        } else {
            OperationStatus::ok()
        }
    }

    /// Connects, sends `request` and parses the response.
    pub fn query(&self, mut request: Request) -> Result<Response, OperationStatus> {
        self.process_request(&mut request);
        let connection = self.connect(&request.uri)?;
        self.get_response(connection, &mut request)
    }

    /// Writes the request and retrieves the response over an existing
    /// connection, following redirects up to the configured limit.
    pub fn get_response(
        &self,
        mut connection: Connection,
        request: &mut Request,
    ) -> Result<Response, OperationStatus> {
        let parser = Http1Parser::with_flags(self.flags);
        let mut attempt: u32 = 0;

        loop {
            let status = connection.send_request(request);
            if status.is_error() {
                return Err(status);
            }

            let (response, suggested) =
                connection.read_response(&parser, self.max_response_size)?;
            if suggested.is_error() {
                return Err(OperationStatus::error(format!("malformed response: {suggested}")));
            }

            if response.status.status_type() == StatusType::Redirection
                && attempt < self.max_redirects
            {
                if let Some(location) = response.headers.get("Location") {
                    let target = request.uri.resolve(location);
                    debug!(location = %target, "following redirect");

                    let mut redirected =
                        Request::new(request.method.clone(), target, request.protocol.clone());
                    redirected.user_agent = request.user_agent.clone();
                    *request = redirected;

                    connection.close(true);
                    connection = self.connect(&request.uri)?;
                    attempt += 1;
                    continue;
                }
            }
            return Ok(response);
        }
    }

    /// Applied to every outgoing request: the default user agent, and an
    /// implicit `format_post` when form fields are set but no body is.
    pub(crate) fn process_request(&self, request: &mut Request) {
        if request.user_agent.is_empty() {
            request.user_agent = self.user_agent.clone();
        }
        if !request.post.is_empty() && !request.body.has_data() {
            request.format_post();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_user_agent_is_library_qualified() {
        assert!(DEFAULT_USER_AGENT.starts_with("mono-http/"));
        let client = Client::new();
        assert_eq!(client.user_agent(), DEFAULT_USER_AGENT);
    }

    #[test]
    fn process_request_formats_pending_post_fields() {
        let client = Client::new();
        let mut request = Request::get("http://example.com/submit");
        request.post.append("a", "1");

        client.process_request(&mut request);
        assert!(request.body.has_data());
        assert_eq!(request.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(&request.body.read_all()[..], b"a=1");
    }
}
