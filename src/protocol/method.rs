use std::fmt::{self, Display, Formatter};

/// Request method: an uninterpreted token.
///
/// The server does not restrict the set; handlers decide what they accept.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Method(String);

impl Method {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Method {
    fn default() -> Self {
        Self::new("GET")
    }
}

impl From<&str> for Method {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for Method {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl PartialEq<str> for Method {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Method {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
