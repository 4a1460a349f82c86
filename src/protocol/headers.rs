//! Ordered multimaps for headers, cookies and form data, plus the
//! `name=value; ...` header-parameter grammar shared by compound headers,
//! content dispositions and media type parameters.

use std::fmt::{self, Debug, Display, Formatter};
use std::marker::PhantomData;

/// Key comparison policy for [`OrderedMultimap`].
pub trait KeyCompare {
    fn key_eq(a: &str, b: &str) -> bool;
}

/// Exact key matching (cookies, query parameters, form fields).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaseSensitive;

/// ASCII case-insensitive key matching (header names).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaseInsensitive;

impl KeyCompare for CaseSensitive {
    fn key_eq(a: &str, b: &str) -> bool {
        a == b
    }
}

impl KeyCompare for CaseInsensitive {
    fn key_eq(a: &str, b: &str) -> bool {
        a.eq_ignore_ascii_case(b)
    }
}

/// A multimap that preserves both insertion order and duplicate keys.
///
/// Duplicates matter on the wire (`Set-Cookie` is emitted once per entry) and
/// insertion order is what the formatter writes, so neither can be folded
/// into a hash map.
#[derive(Clone, PartialEq, Eq)]
pub struct OrderedMultimap<V = String, K = CaseSensitive> {
    entries: Vec<(String, V)>,
    _keys: PhantomData<K>,
}

/// Header map: case-insensitive keys, original spelling preserved.
pub type Headers = OrderedMultimap<String, CaseInsensitive>;

/// Plain string multimap with exact keys.
pub type DataMap = OrderedMultimap<String, CaseSensitive>;

impl<V, K> OrderedMultimap<V, K> {
    pub fn new() -> Self {
        Self { entries: Vec::new(), _keys: PhantomData }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Appends an entry, keeping any existing entries with the same key.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<V>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The most recently appended entry.
    pub fn back_mut(&mut self) -> Option<&mut (String, V)> {
        self.entries.last_mut()
    }
}

impl<V, K: KeyCompare> OrderedMultimap<V, K> {
    /// The first value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| K::key_eq(k, key)).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries.iter_mut().find(|(k, _)| K::key_eq(k, key)).map(|(_, v)| v)
    }

    /// All values stored under `key`, in insertion order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a V> + 'a {
        self.entries.iter().filter(move |(k, _)| K::key_eq(k, key)).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| K::key_eq(k, key))
    }

    /// Replaces the first entry under `key` and removes the rest; appends when
    /// the key is absent.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<V>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter().position(|(k, _)| K::key_eq(k, &key)) {
            Some(index) => {
                self.entries[index].1 = value;
                let mut next = index + 1;
                while next < self.entries.len() {
                    if K::key_eq(&self.entries[next].0, &key) {
                        self.entries.remove(next);
                    } else {
                        next += 1;
                    }
                }
            }
            None => self.entries.push((key, value)),
        }
    }

    /// Removes every entry under `key`.
    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| !K::key_eq(k, key));
    }
}

impl<K: KeyCompare> OrderedMultimap<String, K> {
    /// The first value under `key`, or `default` when absent.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).map(String::as_str).unwrap_or(default)
    }
}

impl<V, K> Default for OrderedMultimap<V, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Debug, K> Debug for OrderedMultimap<V, K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter().map(|(k, v)| (k, v))).finish()
    }
}

impl<V, K, KeyT: Into<String>, ValueT: Into<V>> FromIterator<(KeyT, ValueT)>
    for OrderedMultimap<V, K>
{
    fn from_iter<I: IntoIterator<Item = (KeyT, ValueT)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            _keys: PhantomData,
        }
    }
}

impl<'a, V, K> IntoIterator for &'a OrderedMultimap<V, K> {
    type Item = &'a (String, V);
    type IntoIter = std::slice::Iter<'a, (String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<V, K> IntoIterator for OrderedMultimap<V, K> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// A header of the shape `token; param=value; ...`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompoundHeader {
    pub value: String,
    pub parameters: Headers,
}

impl CompoundHeader {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into(), parameters: Headers::new() }
    }

    /// Parses `token; param=value; ...`; parameters that fail the grammar are
    /// dropped, the leading token is always kept.
    pub fn parse(input: &str) -> Self {
        let boundary = |c: char| c.is_ascii_whitespace() || c == ';';
        let token_end = input.find(boundary).unwrap_or(input.len());
        let value = input[..token_end].to_string();
        let parameters =
            parse_header_parameters(&input[token_end..], ';').unwrap_or_default();
        Self { value, parameters }
    }
}

impl Display for CompoundHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)?;
        for (name, value) in self.parameters.iter() {
            write!(f, "; {}", format_header_parameter(name, value))?;
        }
        Ok(())
    }
}

/// Characters that force a parameter value into quoted form.
const NEEDS_QUOTING: &[char] = &['"', ' ', '\t', '\\'];

/// Parses `name=value` pairs separated by `delimiter`, where a value may be a
/// double-quoted string with backslash escapes. Returns `None` when a quoted
/// value is left unterminated.
pub fn parse_header_parameters(input: &str, delimiter: char) -> Option<Headers> {
    let mut output = Headers::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == delimiter);
        if rest.is_empty() {
            return Some(output);
        }

        let name_end = rest.find('=').unwrap_or(rest.len());
        let name = &rest[..name_end];
        rest = rest.get(name_end + 1..).unwrap_or("");

        let value;
        if let Some(quoted) = rest.strip_prefix('"') {
            let (unquoted, remaining) = read_quoted(quoted)?;
            value = unquoted;
            rest = remaining;
        } else {
            let value_end = rest
                .find(|c: char| c.is_ascii_whitespace() || c == delimiter)
                .unwrap_or(rest.len());
            value = rest[..value_end].to_string();
            rest = &rest[value_end..];
        }

        output.append(name, value);
    }
}

/// Consumes a backslash-escaped quoted string up to the closing quote.
fn read_quoted(input: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = input.char_indices();
    while let Some((index, c)) = chars.next() {
        match c {
            '"' => return Some((value, &input[index + 1..])),
            '\\' => {
                let (_, escaped) = chars.next()?;
                value.push(escaped);
            }
            _ => value.push(c),
        }
    }
    None
}

/// Formats a single `name=value` parameter, quoting the value when it
/// contains whitespace, a quote or a backslash.
pub fn format_header_parameter(name: &str, value: &str) -> String {
    let mut result = String::with_capacity(name.len() + value.len() + 1);
    result.push_str(name);
    result.push('=');
    if value.contains(NEEDS_QUOTING) {
        result.push('"');
        for c in value.chars() {
            if NEEDS_QUOTING.contains(&c) {
                result.push('\\');
            }
            result.push(c);
        }
        result.push('"');
    } else {
        result.push_str(value);
    }
    result
}

/// Formats a parameter map as `name=value<delimiter> ...`.
pub fn format_header_parameters<K>(input: &OrderedMultimap<String, K>, delimiter: char) -> String {
    let mut result = String::new();
    for (name, value) in input.iter() {
        if !result.is_empty() {
            result.push(delimiter);
            result.push(' ');
        }
        result.push_str(&format_header_parameter(name, value));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_insensitive() {
        let mut headers = Headers::new();
        headers.append("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some(&"text/plain".to_string()));
        assert_eq!(headers.get("CONTENT-TYPE"), Some(&"text/plain".to_string()));
        assert!(headers.contains("cONTENT-tYPE"));
    }

    #[test]
    fn duplicates_and_order_are_preserved() {
        let mut headers = Headers::new();
        headers.append("Set-Cookie", "a=1");
        headers.append("Accept", "*/*");
        headers.append("Set-Cookie", "b=2");

        let keys: Vec<&str> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["Set-Cookie", "Accept", "Set-Cookie"]);

        let cookies: Vec<&String> = headers.get_all("set-cookie").collect();
        assert_eq!(cookies, ["a=1", "b=2"]);
    }

    #[test]
    fn set_replaces_all_duplicates() {
        let mut headers = Headers::new();
        headers.append("Connection", "keep-alive");
        headers.append("Host", "example.com");
        headers.append("connection", "upgrade");
        headers.set("Connection", "close");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("Connection"), Some(&"close".to_string()));
        let keys: Vec<&str> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["Connection", "Host"]);
    }

    #[test]
    fn data_map_is_case_sensitive() {
        let mut map = DataMap::new();
        map.append("Name", "a");
        assert!(map.contains("Name"));
        assert!(!map.contains("name"));
    }

    #[test]
    fn parameters_round_trip() {
        let mut params = Headers::new();
        params.append("name", "field");
        params.append("filename", "with space.txt");
        params.append("tricky", "a\"b\\c");

        let formatted = format_header_parameters(&params, ';');
        assert_eq!(formatted, r#"name=field; filename="with space.txt"; tricky="a\"b\\c""#);

        let parsed = parse_header_parameters(&formatted, ';').unwrap();
        assert_eq!(parsed, params);
    }

    #[test]
    fn unterminated_quote_is_rejected() {
        assert!(parse_header_parameters(r#"name="oops"#, ';').is_none());
    }

    #[test]
    fn compound_header_parse() {
        let header = CompoundHeader::parse(r#"form-data; name=f; filename="a b.txt""#);
        assert_eq!(header.value, "form-data");
        assert_eq!(header.parameters.get_or("name", ""), "f");
        assert_eq!(header.parameters.get_or("filename", ""), "a b.txt");
    }

    #[test]
    fn compound_header_display() {
        let mut header = CompoundHeader::new("form-data");
        header.parameters.append("name", "g");
        header.parameters.append("filename", "a.txt");
        assert_eq!(header.to_string(), "form-data; name=g; filename=a.txt");
    }
}
