//! Uniform resource identifiers: percent-coding, paths as decoded segment
//! lists, authorities and query multimaps.

use std::fmt::{self, Display, Formatter};

use crate::protocol::DataMap;

/// Percent-encodes everything outside the RFC 3986 unreserved set.
/// With `plus_spaces`, spaces become `+` (query-string convention).
pub fn urlencode(input: &str, plus_spaces: bool) -> String {
    let mut output = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                output.push(byte as char)
            }
            b' ' if plus_spaces => output.push('+'),
            _ => {
                output.push('%');
                output.push(char::from_digit((byte >> 4) as u32, 16).unwrap().to_ascii_uppercase());
                output.push(char::from_digit((byte & 0xf) as u32, 16).unwrap().to_ascii_uppercase());
            }
        }
    }
    output
}

/// Decodes percent escapes; malformed escapes are kept verbatim.
/// With `plus_spaces`, `+` decodes to a space.
pub fn urldecode(input: &str, plus_spaces: bool) -> String {
    let mut output = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'%' if index + 2 < bytes.len() => {
                let high = (bytes[index + 1] as char).to_digit(16);
                let low = (bytes[index + 2] as char).to_digit(16);
                match (high, low) {
                    (Some(high), Some(low)) => {
                        output.push((high * 16 + low) as u8);
                        index += 3;
                        continue;
                    }
                    _ => output.push(b'%'),
                }
                index += 1;
            }
            b'+' if plus_spaces => {
                output.push(b' ');
                index += 1;
            }
            byte => {
                output.push(byte);
                index += 1;
            }
        }
    }
    String::from_utf8_lossy(&output).into_owned()
}

/// A path as an ordered list of already-decoded segments.
///
/// `..` and `.` are collapsed during construction, so two paths compare equal
/// exactly when they name the same resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// Splits `input` on `/`, collapsing `.` and `..` segments.
    pub fn new(input: &str) -> Self {
        Self::build(input, false)
    }

    /// Like [`Path::new`], additionally percent-decoding each segment.
    pub fn decoded(input: &str) -> Self {
        Self::build(input, true)
    }

    fn build(input: &str, url_decode: bool) -> Self {
        let mut segments: Vec<String> = Vec::new();
        for segment in input.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }
            if segment == ".." {
                segments.pop();
                continue;
            }
            segments.push(if url_decode { urldecode(segment, false) } else { segment.to_string() });
        }
        Self { segments }
    }

    pub fn from_segments(segments: Vec<String>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn parent(&self) -> Path {
        let mut segments = self.segments.clone();
        segments.pop();
        Self { segments }
    }

    pub fn child(&self, segment: impl Into<String>) -> Path {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// `/`-joined decoded form; the empty path prints as `/`.
    pub fn string(&self) -> String {
        let mut output = String::from("/");
        output.push_str(&self.segments.join("/"));
        output
    }

    /// `/`-joined with each segment percent-encoded. The empty path yields
    /// `""`, or `"/"` when `empty_root` is set (request targets need one).
    pub fn url_encoded(&self, empty_root: bool) -> String {
        if self.segments.is_empty() {
            return if empty_root { "/".to_string() } else { String::new() };
        }
        let mut output = String::new();
        for segment in &self.segments {
            output.push('/');
            output.push_str(&urlencode(segment, false));
        }
        output
    }
}

impl From<&str> for Path {
    fn from(input: &str) -> Self {
        Self::new(input)
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string())
    }
}

/// URI authority: `[user[:password]@]host[:port]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authority {
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl Authority {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into(), ..Self::default() }
    }

    pub fn parse(input: &str) -> Self {
        let mut authority = Self::default();

        let host_part = match input.rsplit_once('@') {
            Some((userinfo, host_part)) => {
                match userinfo.split_once(':') {
                    Some((user, password)) => {
                        authority.user = Some(urldecode(user, false));
                        authority.password = Some(urldecode(password, false));
                    }
                    None => authority.user = Some(urldecode(userinfo, false)),
                }
                host_part
            }
            None => input,
        };

        // IPv6 literals keep their colons inside brackets
        if let Some(rest) = host_part.strip_prefix('[') {
            if let Some((host, rest)) = rest.split_once(']') {
                authority.host = host.to_string();
                if let Some(port) = rest.strip_prefix(':') {
                    authority.port = port.parse().ok();
                }
                return authority;
            }
        }

        match host_part.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => {
                authority.host = host.to_string();
                authority.port = port.parse().ok();
            }
            _ => authority.host = host_part.to_string(),
        }
        authority
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.password.is_none() && self.host.is_empty() && self.port.is_none()
    }

    /// Canonical string form; IPv6 hosts are bracketed.
    pub fn full(&self) -> String {
        let mut output = String::new();
        if let Some(user) = &self.user {
            output.push_str(&urlencode(user, false));
            if let Some(password) = &self.password {
                output.push(':');
                output.push_str(&urlencode(password, false));
            }
            output.push('@');
        }
        if self.host.contains(':') {
            output.push('[');
            output.push_str(&self.host);
            output.push(']');
        } else {
            output.push_str(&self.host);
        }
        if let Some(port) = self.port {
            output.push(':');
            output.push_str(&port.to_string());
        }
        output
    }
}

impl Display for Authority {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full())
    }
}

/// Parses `a=1&b=2` into an ordered multimap, `+` decoding to space.
pub fn parse_query_string(input: &str) -> DataMap {
    let mut output = DataMap::new();
    for pair in input.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((name, value)) => {
                output.append(urldecode(name, true), urldecode(value, true))
            }
            None => output.append(urldecode(pair, true), ""),
        }
    }
    output
}

/// Formats a multimap as `a=1&b=2`, optionally with a leading `?`.
pub fn build_query_string(query: &DataMap, question_mark: bool) -> String {
    let mut output = String::new();
    for (name, value) in query.iter() {
        if !output.is_empty() {
            output.push('&');
        }
        output.push_str(&urlencode(name, true));
        output.push('=');
        output.push_str(&urlencode(value, true));
    }
    if question_mark && !output.is_empty() {
        output.insert(0, '?');
    }
    output
}

/// Uniform resource identifier.
///
/// Round-trip invariant: for a URI whose components are already canonical,
/// `Uri::parse(&uri.full()) == uri`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Uri {
    pub scheme: String,
    pub authority: Authority,
    pub path: Path,
    pub query: DataMap,
    pub fragment: String,
}

impl Uri {
    pub fn new(
        scheme: impl Into<String>,
        authority: Authority,
        path: Path,
        query: DataMap,
        fragment: impl Into<String>,
    ) -> Self {
        Self { scheme: scheme.into(), authority, path, query, fragment: fragment.into() }
    }

    /// Parses an absolute URI or a relative request target.
    pub fn parse(input: &str) -> Self {
        let mut uri = Self::default();
        let mut rest = input;

        if let Some((scheme, remainder)) = rest.split_once("://") {
            uri.scheme = scheme.to_ascii_lowercase();
            let authority_end = remainder
                .find(|c| c == '/' || c == '?' || c == '#')
                .unwrap_or(remainder.len());
            uri.authority = Authority::parse(&remainder[..authority_end]);
            rest = &remainder[authority_end..];
        }

        if let Some((remainder, fragment)) = rest.split_once('#') {
            uri.fragment = urldecode(fragment, false);
            rest = remainder;
        }
        // careful: split off the fragment before the query so `#` wins
        if let Some((path, query)) = rest.split_once('?') {
            uri.query = parse_query_string(query);
            rest = path;
        }
        uri.path = Path::decoded(rest);
        uri
    }

    /// Query string, optionally with the leading `?`.
    pub fn query_string(&self, question_mark: bool) -> String {
        build_query_string(&self.query, question_mark)
    }

    /// Full canonical form.
    pub fn full(&self) -> String {
        let mut output = String::new();
        if !self.scheme.is_empty() {
            output.push_str(&self.scheme);
            output.push_str("://");
        }
        output.push_str(&self.authority.full());
        output.push_str(&self.path.url_encoded(self.authority.is_empty() && self.scheme.is_empty()));
        output.push_str(&self.query_string(true));
        if !self.fragment.is_empty() {
            output.push('#');
            output.push_str(&urlencode(&self.fragment, false));
        }
        output
    }

    /// Resolves a `Location`-style reference against this URI.
    pub fn resolve(&self, reference: &str) -> Uri {
        let target = Uri::parse(reference);
        if !target.scheme.is_empty() {
            return target;
        }
        let mut resolved = target;
        resolved.scheme = self.scheme.clone();
        resolved.authority = self.authority.clone();
        resolved
    }
}

impl From<&str> for Uri {
    fn from(input: &str) -> Self {
        Self::parse(input)
    }
}

impl Display for Uri {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_collapses_dots() {
        assert_eq!(Path::new("/a/b/../c").string(), "/a/c");
        assert_eq!(Path::new("/a/./b").string(), "/a/b");
        assert_eq!(Path::new("/").string(), "/");
        assert_eq!(Path::new("/../..").string(), "/");
    }

    #[test]
    fn path_encoding() {
        let path = Path::decoded("/a%20b/c");
        assert_eq!(path.segments(), ["a b", "c"]);
        assert_eq!(path.url_encoded(false), "/a%20b/c");
        assert_eq!(Path::default().url_encoded(true), "/");
        assert_eq!(Path::default().url_encoded(false), "");
    }

    #[test]
    fn percent_coding_round_trip() {
        let input = "a b+c/d\u{e9}";
        assert_eq!(urldecode(&urlencode(input, false), false), input);
        assert_eq!(urlencode("a b", true), "a+b");
        assert_eq!(urldecode("a+b", true), "a b");
        assert_eq!(urldecode("a%2Bb", true), "a+b");
        assert_eq!(urldecode("100%", false), "100%");
    }

    #[test]
    fn authority_forms() {
        let authority = Authority::parse("user:pw@example.com:8080");
        assert_eq!(authority.user.as_deref(), Some("user"));
        assert_eq!(authority.password.as_deref(), Some("pw"));
        assert_eq!(authority.host, "example.com");
        assert_eq!(authority.port, Some(8080));
        assert_eq!(authority.full(), "user:pw@example.com:8080");

        let v6 = Authority::parse("[::1]:80");
        assert_eq!(v6.host, "::1");
        assert_eq!(v6.port, Some(80));
        assert_eq!(v6.full(), "[::1]:80");
    }

    #[test]
    fn uri_parse() {
        let uri = Uri::parse("https://example.com:8080/a/b?x=1&y=2#frag");
        assert_eq!(uri.scheme, "https");
        assert_eq!(uri.authority.host, "example.com");
        assert_eq!(uri.authority.port, Some(8080));
        assert_eq!(uri.path.segments(), ["a", "b"]);
        assert_eq!(uri.query.get_or("x", ""), "1");
        assert_eq!(uri.query.get_or("y", ""), "2");
        assert_eq!(uri.fragment, "frag");
    }

    #[test]
    fn uri_round_trip() {
        for input in [
            "https://example.com/a/b?x=1&y=2#frag",
            "http://user:pw@example.com:8080/a%20b",
            "http://[::1]:8080/x",
            "/just/a/path?q=v",
            "/",
        ] {
            let uri = Uri::parse(input);
            assert_eq!(Uri::parse(&uri.full()), uri, "round-tripping {input}");
        }
    }

    #[test]
    fn query_multimap_keeps_duplicates() {
        let query = parse_query_string("a=1&b=2&a=3");
        let values: Vec<&String> = query.get_all("a").collect();
        assert_eq!(values, ["1", "3"]);
        assert_eq!(build_query_string(&query, false), "a=1&b=2&a=3");
    }

    #[test]
    fn reference_resolution() {
        let base = Uri::parse("http://example.com:8080/a?x=1");
        let moved = base.resolve("/b/c?y=2");
        assert_eq!(moved.full(), "http://example.com:8080/b/c?y=2");
        let absolute = base.resolve("https://other.net/z");
        assert_eq!(absolute.full(), "https://other.net/z");
    }
}
