use bytes::Bytes;

use super::headers::Headers;

/// Multipart content: a boundary and the parts it frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Multipart {
    pub boundary: String,
    pub parts: Vec<Part>,
}

/// One part: its own header block plus raw content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Part {
    pub headers: Headers,
    pub content: Bytes,
}

impl Multipart {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self { boundary: boundary.into(), parts: Vec::new() }
    }

    pub fn push(&mut self, headers: Headers, content: impl Into<Bytes>) {
        self.parts.push(Part { headers, content: content.into() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_parts() {
        let mut multipart = Multipart::new("frontier");
        multipart.push(Headers::new(), "data");
        assert_eq!(multipart.boundary, "frontier");
        assert_eq!(multipart.parts.len(), 1);
        assert_eq!(&multipart.parts[0].content[..], b"data");
    }
}
