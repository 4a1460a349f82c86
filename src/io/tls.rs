//! TLS transport over rustls: same contract as the plain socket plus a
//! deadline-bounded handshake and certificate configuration.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConnection, OwnedTrustAnchor, PrivateKey, ServerConnection};
use tracing::debug;

use crate::error::OperationStatus;
use crate::io::address::IPAddress;

/// How hard to look at the peer's certificate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VerifyMode {
    /// No verification requested.
    Disabled,
    /// Accept any presented certificate.
    Loose,
    /// Verify against the webpki roots plus any configured CA file.
    #[default]
    Strict,
}

/// Which end of the handshake this socket plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsRole {
    Client,
    Server,
}

/// Certificate material and verification policy.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    pub verify: VerifyMode,
}

impl TlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cert(mut self, cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        self.cert_file = Some(cert_file.into());
        self.key_file = Some(key_file.into());
        self
    }

    pub fn with_ca_file(mut self, ca_file: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(ca_file.into());
        self
    }

    pub fn set_verify_mode(&mut self, verify: VerifyMode) {
        self.verify = verify;
    }

    fn server_config(&self) -> Result<Arc<rustls::ServerConfig>, OperationStatus> {
        let cert_file = self
            .cert_file
            .as_ref()
            .ok_or_else(|| OperationStatus::error("server TLS requires a certificate file"))?;
        let key_file = self
            .key_file
            .as_ref()
            .ok_or_else(|| OperationStatus::error("server TLS requires a private key file"))?;

        let certs = load_certs(cert_file)?;
        let key = load_private_key(key_file)?;

        let config = rustls::ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| OperationStatus::error(format!("bad certificate or key: {e}")))?;
        Ok(Arc::new(config))
    }

    fn client_config(&self) -> Result<Arc<rustls::ClientConfig>, OperationStatus> {
        let mut roots = rustls::RootCertStore::empty();
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|anchor| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                anchor.subject,
                anchor.spki,
                anchor.name_constraints,
            )
        }));
        if let Some(ca_file) = &self.ca_file {
            for cert in load_certs(ca_file)? {
                roots
                    .add(&cert)
                    .map_err(|e| OperationStatus::error(format!("bad CA certificate: {e}")))?;
            }
        }

        let mut config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();

        if self.verify != VerifyMode::Strict {
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(AcceptAnyCertificate));
        }
        Ok(Arc::new(config))
    }
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>, OperationStatus> {
    let file = File::open(path)
        .map_err(|e| OperationStatus::error(format!("cannot open {}: {e}", path.display())))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .map_err(|e| OperationStatus::error(format!("cannot read {}: {e}", path.display())))?;
    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_private_key(path: &Path) -> Result<PrivateKey, OperationStatus> {
    let open = || {
        File::open(path)
            .map(BufReader::new)
            .map_err(|e| OperationStatus::error(format!("cannot open {}: {e}", path.display())))
    };

    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut open()?)
        .map_err(|e| OperationStatus::error(format!("cannot read {}: {e}", path.display())))?;
    if keys.is_empty() {
        keys = rustls_pemfile::rsa_private_keys(&mut open()?)
            .map_err(|e| OperationStatus::error(format!("cannot read {}: {e}", path.display())))?;
    }
    keys.into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| OperationStatus::error(format!("no private key in {}", path.display())))
}

/// Accepts whatever certificate the peer presents (Disabled / Loose modes).
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

enum Session {
    Client(Box<ClientConnection>),
    Server(Box<ServerConnection>),
}

/// TLS transport: a TCP stream plus, once the handshake ran, a rustls session.
pub struct TlsSocket {
    tcp: Option<TcpStream>,
    session: Option<Session>,
    peer_name: Option<String>,
}

impl TlsSocket {
    pub fn new() -> Self {
        Self { tcp: None, session: None, peer_name: None }
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self { tcp: Some(stream), session: None, peer_name: None }
    }

    pub(crate) fn install(&mut self, stream: TcpStream) {
        self.tcp = Some(stream);
    }

    pub(crate) fn tcp(&self) -> Option<&TcpStream> {
        self.tcp.as_ref()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.tcp.is_some()
    }

    /// Runs the handshake; the caller has already applied the deadline as the
    /// stream's I/O timeout.
    pub(crate) fn handshake(
        &mut self,
        role: TlsRole,
        config: &TlsConfig,
        server_name: &str,
    ) -> Result<(), OperationStatus> {
        let tcp = self
            .tcp
            .as_mut()
            .ok_or_else(|| OperationStatus::error("handshake on an unconnected socket"))?;

        let mut session = match role {
            TlsRole::Client => {
                let name = rustls::ServerName::try_from(server_name).map_err(|_| {
                    OperationStatus::error(format!("invalid TLS server name: {server_name}"))
                })?;
                let connection = ClientConnection::new(config.client_config()?, name)
                    .map_err(|e| OperationStatus::error(e.to_string()))?;
                self.peer_name = Some(server_name.to_string());
                Session::Client(Box::new(connection))
            }
            TlsRole::Server => {
                let connection = ServerConnection::new(config.server_config()?)
                    .map_err(|e| OperationStatus::error(e.to_string()))?;
                Session::Server(Box::new(connection))
            }
        };

        let result = match &mut session {
            Session::Client(connection) => drive_handshake(connection.as_mut(), tcp),
            Session::Server(connection) => {
                let result = drive_handshake(connection.as_mut(), tcp);
                self.peer_name = connection.server_name().map(str::to_string);
                result
            }
        };
        result?;

        debug!(peer = self.peer_name.as_deref().unwrap_or(""), "TLS handshake complete");
        self.session = Some(session);
        Ok(())
    }

    /// The negotiated peer name: SNI in the server role, the target host in
    /// the client role.
    pub fn peer_common_name(&self) -> Option<&str> {
        self.peer_name.as_deref()
    }

    pub(crate) fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let tcp = self.tcp.as_mut().ok_or(io::ErrorKind::NotConnected)?;
        match &mut self.session {
            Some(Session::Client(c)) => rustls::Stream::new(c.as_mut(), tcp).read(buf),
            Some(Session::Server(c)) => rustls::Stream::new(c.as_mut(), tcp).read(buf),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    pub(crate) fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let tcp = self.tcp.as_mut().ok_or(io::ErrorKind::NotConnected)?;
        match &mut self.session {
            Some(Session::Client(c)) => rustls::Stream::new(c.as_mut(), tcp).write_all(data),
            Some(Session::Server(c)) => rustls::Stream::new(c.as_mut(), tcp).write_all(data),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Graceful close sends the TLS close-notify record best effort, then
    /// shuts the TCP stream down.
    pub(crate) fn close(&mut self, graceful: bool) -> OperationStatus {
        if graceful {
            if let (Some(session), Some(tcp)) = (&mut self.session, &mut self.tcp) {
                match session {
                    Session::Client(c) => {
                        c.send_close_notify();
                        let _ = c.complete_io(tcp);
                    }
                    Session::Server(c) => {
                        c.send_close_notify();
                        let _ = c.complete_io(tcp);
                    }
                }
            }
        }
        self.session = None;
        if let Some(tcp) = self.tcp.take() {
            let _ = tcp.shutdown(Shutdown::Both);
        }
        OperationStatus::ok()
    }

    pub(crate) fn remote_address(&self) -> IPAddress {
        self.tcp.as_ref().and_then(|s| s.peer_addr().ok()).map(IPAddress::from).unwrap_or_default()
    }

    pub(crate) fn local_address(&self) -> IPAddress {
        self.tcp.as_ref().and_then(|s| s.local_addr().ok()).map(IPAddress::from).unwrap_or_default()
    }
}

impl Default for TlsSocket {
    fn default() -> Self {
        Self::new()
    }
}

fn drive_handshake<C, S>(connection: &mut C, tcp: &mut TcpStream) -> Result<(), OperationStatus>
where
    C: std::ops::DerefMut<Target = rustls::ConnectionCommon<S>>,
{
    while connection.is_handshaking() {
        connection.complete_io(tcp).map_err(OperationStatus::from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_mode_defaults_to_strict() {
        assert_eq!(TlsConfig::new().verify, VerifyMode::Strict);
    }

    #[test]
    fn server_config_requires_certificate() {
        let config = TlsConfig::new();
        assert!(config.server_config().is_err());
    }

    #[test]
    fn client_config_builds_without_ca_file() {
        let mut config = TlsConfig::new();
        assert!(config.client_config().is_ok());
        config.set_verify_mode(VerifyMode::Loose);
        assert!(config.client_config().is_ok());
    }
}
