use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Protocol identity: a name plus a major/minor version pair.
///
/// The recognized identities are `HTTP/1.0` and `HTTP/1.1`; other triples
/// still compare and print, they just fail [`Protocol::valid`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Protocol {
    pub name: String,
    pub major: u32,
    pub minor: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidProtocol;

impl Display for InvalidProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("invalid protocol identifier")
    }
}

impl std::error::Error for InvalidProtocol {}

impl Protocol {
    pub fn new(name: impl Into<String>, major: u32, minor: u32) -> Self {
        Self { name: name.into(), major, minor }
    }

    pub fn http_1_0() -> Self {
        Self::new("HTTP", 1, 0)
    }

    pub fn http_1_1() -> Self {
        Self::new("HTTP", 1, 1)
    }

    pub fn valid(&self) -> bool {
        self.name == "HTTP" && self.major == 1 && (self.minor == 0 || self.minor == 1)
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Self::http_1_1()
    }
}

impl PartialOrd for Protocol {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Protocol {
    /// Ordered by (major, minor); the name only breaks ties so that the
    /// ordering stays consistent with equality.
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, &self.name).cmp(&(other.major, other.minor, &other.name))
    }
}

impl FromStr for Protocol {
    type Err = InvalidProtocol;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (name, version) = input.split_once('/').ok_or(InvalidProtocol)?;
        let (major, minor) = version.split_once('.').ok_or(InvalidProtocol)?;
        if name.is_empty() {
            return Err(InvalidProtocol);
        }
        Ok(Self {
            name: name.to_string(),
            major: major.parse().map_err(|_| InvalidProtocol)?,
            minor: minor.parse().map_err(|_| InvalidProtocol)?,
        })
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}", self.name, self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_print() {
        let protocol: Protocol = "HTTP/1.1".parse().unwrap();
        assert_eq!(protocol, Protocol::http_1_1());
        assert_eq!(protocol.to_string(), "HTTP/1.1");
        assert!("HTTP1.1".parse::<Protocol>().is_err());
        assert!("HTTP/1x".parse::<Protocol>().is_err());
    }

    #[test]
    fn ordering_by_version() {
        assert!(Protocol::http_1_0() < Protocol::http_1_1());
        assert!(Protocol::http_1_1() >= Protocol::http_1_1());
        assert!(Protocol::new("HTTP", 2, 0) > Protocol::http_1_1());
    }

    #[test]
    fn validity() {
        assert!(Protocol::http_1_0().valid());
        assert!(Protocol::http_1_1().valid());
        assert!(!Protocol::new("HTTP", 2, 0).valid());
        assert!(!Protocol::new("ICY", 1, 1).valid());
    }
}
