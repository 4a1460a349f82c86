use std::fmt::{self, Display, Formatter};

use super::headers::{format_header_parameter, parse_header_parameters};

/// A media type: `type/subtype` plus at most one `name=value` parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MimeType {
    type_: String,
    subtype: String,
    parameter: Option<(String, String)>,
}

impl MimeType {
    pub fn new(type_: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self {
            type_: type_.into().to_ascii_lowercase(),
            subtype: subtype.into().to_ascii_lowercase(),
            parameter: None,
        }
    }

    pub fn with_parameter(
        type_: impl Into<String>,
        subtype: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let mut mime = Self::new(type_, subtype);
        mime.parameter = Some((name.into(), value.into()));
        mime
    }

    /// Parses `type/subtype[; name=value]`, e.g. a `Content-Type` value.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        let token_end = input
            .find(|c: char| c.is_ascii_whitespace() || c == ';')
            .unwrap_or(input.len());
        let Some((type_, subtype)) = input[..token_end].split_once('/') else {
            return Self::default();
        };

        let mut mime = Self::new(type_, subtype);
        if let Some(parameters) = parse_header_parameters(&input[token_end..], ';') {
            mime.parameter = parameters
                .iter()
                .next()
                .map(|(name, value)| (name.to_string(), value.clone()));
        }
        mime
    }

    pub fn valid(&self) -> bool {
        !self.type_.is_empty() && !self.subtype.is_empty()
    }

    pub fn type_(&self) -> &str {
        &self.type_
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn parameter(&self) -> Option<(&str, &str)> {
        self.parameter.as_ref().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Wildcard match on each component: `*` matches anything.
    pub fn matches_type(&self, type_: &str, subtype: &str) -> bool {
        let component_match = |pattern: &str, value: &str| {
            pattern == "*" || value == "*" || pattern.eq_ignore_ascii_case(value)
        };
        component_match(type_, &self.type_) && component_match(subtype, &self.subtype)
    }

    pub fn string(&self) -> String {
        self.to_string()
    }
}

impl From<&str> for MimeType {
    fn from(input: &str) -> Self {
        Self::parse(input)
    }
}

impl Display for MimeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_, self.subtype)?;
        if let Some((name, value)) = &self.parameter {
            write!(f, "; {}", format_header_parameter(name, value))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_parameter() {
        let mime = MimeType::parse("multipart/form-data; boundary=xyz");
        assert_eq!(mime.type_(), "multipart");
        assert_eq!(mime.subtype(), "form-data");
        assert_eq!(mime.parameter(), Some(("boundary", "xyz")));
        assert!(mime.valid());
    }

    #[test]
    fn parse_plain() {
        let mime = MimeType::parse("Text/Plain");
        assert_eq!(mime.to_string(), "text/plain");
        assert_eq!(mime.parameter(), None);
    }

    #[test]
    fn invalid_without_slash() {
        assert!(!MimeType::parse("nonsense").valid());
        assert!(!MimeType::default().valid());
    }

    #[test]
    fn wildcard_matching() {
        let mime = MimeType::parse("multipart/form-data");
        assert!(mime.matches_type("multipart", "form-data"));
        assert!(mime.matches_type("multipart", "*"));
        assert!(mime.matches_type("*", "*"));
        assert!(!mime.matches_type("text", "*"));
    }
}
