use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Address family of an [`IPAddress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AddressType {
    #[default]
    Invalid,
    IPv4,
    IPv6,
}

/// A host (IP literal or name) together with a port.
///
/// IPv6 literals print bracketed: `[::1]:80`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IPAddress {
    pub kind: AddressType,
    pub host: String,
    pub port: u16,
}

impl IPAddress {
    pub fn new(kind: AddressType, host: impl Into<String>, port: u16) -> Self {
        Self { kind, host: host.into(), port }
    }

    /// The IPv6 wildcard on the given port.
    pub fn any(port: u16) -> Self {
        Self::new(AddressType::IPv6, "::", port)
    }

    /// Parses `host`, `host:port`, `v4:port` or `[v6]:port`.
    pub fn parse(input: &str) -> Self {
        let (host, port) = if let Some(rest) = input.strip_prefix('[') {
            match rest.split_once(']') {
                Some((host, rest)) => {
                    (host.to_string(), rest.strip_prefix(':').and_then(|p| p.parse().ok()))
                }
                None => (rest.to_string(), None),
            }
        } else {
            match input.rsplit_once(':') {
                // a second colon means an unbracketed IPv6 literal, not a port
                Some((host, port))
                    if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) =>
                {
                    (host.to_string(), port.parse().ok())
                }
                _ => (input.to_string(), None),
            }
        };

        let kind = match IpAddr::from_str(&host) {
            Ok(IpAddr::V4(_)) => AddressType::IPv4,
            Ok(IpAddr::V6(_)) => AddressType::IPv6,
            // host names resolve later; default them to IPv6 like the wildcard
            Err(_) if !host.is_empty() => AddressType::IPv6,
            Err(_) => AddressType::Invalid,
        };

        Self { kind, host, port: port.unwrap_or(0) }
    }

    pub fn valid(&self) -> bool {
        self.kind != AddressType::Invalid
    }

    /// The concrete socket address, when the host is an IP literal.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        IpAddr::from_str(&self.host).ok().map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl From<SocketAddr> for IPAddress {
    fn from(addr: SocketAddr) -> Self {
        let kind = match addr {
            SocketAddr::V4(_) => AddressType::IPv4,
            SocketAddr::V6(_) => AddressType::IPv6,
        };
        Self::new(kind, addr.ip().to_string(), addr.port())
    }
}

impl From<&str> for IPAddress {
    fn from(input: &str) -> Self {
        Self::parse(input)
    }
}

impl Display for IPAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if !self.valid() {
            return f.write_str("(invalid)");
        }
        if self.kind == AddressType::IPv6 && self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v6_formats_bracketed() {
        assert_eq!(IPAddress::new(AddressType::IPv6, "::1", 80).to_string(), "[::1]:80");
        assert_eq!(IPAddress::new(AddressType::IPv4, "127.0.0.1", 80).to_string(), "127.0.0.1:80");
        assert_eq!(IPAddress::default().to_string(), "(invalid)");
    }

    #[test]
    fn parse_bracketed_v6() {
        let addr = IPAddress::parse("[::]:80");
        assert_eq!(addr.kind, AddressType::IPv6);
        assert_eq!(addr.host, "::");
        assert_eq!(addr.port, 80);
    }

    #[test]
    fn parse_v4_and_hostname() {
        let addr = IPAddress::parse("127.0.0.1:8080");
        assert_eq!(addr.kind, AddressType::IPv4);
        assert_eq!(addr.port, 8080);

        let addr = IPAddress::parse("localhost:80");
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port, 80);
        assert!(addr.valid());
    }

    #[test]
    fn socket_addr_conversion() {
        let addr = IPAddress::parse("[::1]:443");
        assert_eq!(addr.socket_addr().unwrap().port(), 443);
        assert!(IPAddress::parse("example.com:80").socket_addr().is_none());

        let from: IPAddress = "1.2.3.4:5".parse::<SocketAddr>().unwrap().into();
        assert_eq!(from.to_string(), "1.2.3.4:5");
    }
}
