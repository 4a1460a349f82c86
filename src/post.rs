//! POST body formats: `application/x-www-form-urlencoded` and
//! `multipart/form-data`.
//!
//! `Request::parse_post` walks the registry and hands the request to the
//! first format whose `Content-Type` matches; `format_post` is the inverse.

use std::io::Write;

use crate::codec::{Http1Formatter, Http1Parser};
use crate::protocol::{
    CompoundHeader, Headers, MimeType, Multipart, Request, RequestFile,
};
use crate::uri::{build_query_string, parse_query_string};

/// A POST payload codec.
pub trait PostFormat: Send + Sync {
    fn can_parse(&self, request: &Request) -> bool;
    fn parse(&self, request: &mut Request) -> bool;
    fn can_format(&self, request: &Request) -> bool;
    fn format(&self, request: &mut Request) -> bool;
}

/// The registered formats, tried in order.
pub fn formats() -> &'static [&'static dyn PostFormat] {
    static FORMATS: &[&dyn PostFormat] = &[&UrlEncoded, &FormData];
    FORMATS
}

/// `application/x-www-form-urlencoded`: the query-string grammar in a body.
pub struct UrlEncoded;

impl PostFormat for UrlEncoded {
    fn can_parse(&self, request: &Request) -> bool {
        request.body.content_type().matches_type("application", "x-www-form-urlencoded")
    }

    fn parse(&self, request: &mut Request) -> bool {
        let bytes = request.body.read_all();
        if request.body.error() {
            return false;
        }
        request.post = parse_query_string(&String::from_utf8_lossy(&bytes));
        true
    }

    fn can_format(&self, request: &Request) -> bool {
        request.files.is_empty()
    }

    fn format(&self, request: &mut Request) -> bool {
        request.body.start_output(MimeType::new("application", "x-www-form-urlencoded"));
        let encoded = build_query_string(&request.post, false);
        request.body.write_all(encoded.as_bytes()).is_ok()
    }
}

/// `multipart/form-data` (RFC 2388): file parts are the ones carrying a
/// `filename` disposition parameter.
pub struct FormData;

impl PostFormat for FormData {
    fn can_parse(&self, request: &Request) -> bool {
        request.body.content_type().matches_type("multipart", "form-data")
    }

    fn parse(&self, request: &mut Request) -> bool {
        let content_type = request.body.content_type();
        let boundary = match content_type.parameter() {
            Some(("boundary", boundary)) => boundary.to_string(),
            _ => return false,
        };

        let bytes = request.body.read_all();
        if request.body.error() {
            return false;
        }

        let parser = Http1Parser::new();
        let Some(form_data) = parser.multipart(&bytes, &boundary) else {
            return false;
        };

        for part in form_data.parts {
            let disposition =
                parser.compound_header(part.headers.get_or("Content-Disposition", ""));
            if disposition.value != "form-data" || !disposition.parameters.contains("name") {
                return false;
            }
            let name = disposition.parameters.get_or("name", "").to_string();

            match disposition.parameters.get("filename") {
                None => {
                    request
                        .post
                        .append(name, String::from_utf8_lossy(&part.content).into_owned());
                }
                Some(filename) => {
                    let mut headers = part.headers.clone();
                    let content_type =
                        MimeType::parse(headers.get_or("Content-Type", "text/plain"));
                    headers.remove("Content-Type");
                    headers.remove("Content-Disposition");

                    request.files.append(
                        name,
                        RequestFile {
                            filename: filename.clone(),
                            content_type,
                            headers,
                            contents: part.content,
                        },
                    );
                }
            }
        }
        true
    }

    fn can_format(&self, _request: &Request) -> bool {
        true
    }

    fn format(&self, request: &mut Request) -> bool {
        let boundary = {
            let mut values: Vec<&[u8]> =
                request.post.iter().map(|(_, value)| value.as_bytes()).collect();
            values.extend(request.files.iter().map(|(_, file)| &file.contents[..]));
            generate_boundary(&values)
        };

        let formatter = Http1Formatter::new();
        let mut form_data = Multipart::new(boundary.clone());

        for (name, value) in request.post.iter() {
            let mut disposition = CompoundHeader::new("form-data");
            disposition.parameters.append("name", name);

            let mut headers = Headers::new();
            headers.append("Content-Disposition", formatter.compound_header(&disposition));
            form_data.push(headers, value.as_bytes().to_vec());
        }

        for (name, file) in request.files.iter() {
            let mut headers = file.headers.clone();
            if !headers.contains("Content-Type") && file.content_type.valid() {
                headers.append("Content-Type", file.content_type.string());
            }

            let mut disposition = CompoundHeader::new("form-data");
            disposition.parameters.append("name", name);
            disposition.parameters.append("filename", file.filename.clone());
            headers.set("Content-Disposition", formatter.compound_header(&disposition));

            form_data.push(headers, file.contents.clone());
        }

        request.body.start_output(MimeType::with_parameter(
            "multipart",
            "form-data",
            "boundary",
            boundary,
        ));
        formatter.multipart(&form_data, &mut request.body).is_ok()
    }
}

/// Picks a boundary that does not occur in any of `values`.
///
/// Position `i` of the boundary is chosen to differ from byte `i` of every
/// value long enough to matter, so no value has the boundary as a prefix;
/// the trailing loop then rules out matches at other offsets.
fn generate_boundary(values: &[&[u8]]) -> String {
    let mut boundary = String::new();
    for value in values {
        if value.len() <= boundary.len() {
            boundary.push('p');
        } else {
            boundary.push(differing_char(value[boundary.len()]));
        }
    }
    if boundary.is_empty() {
        boundary.push_str("p0ny");
    }
    while values
        .iter()
        .any(|value| value.windows(boundary.len()).any(|window| window == boundary.as_bytes()))
    {
        boundary.push('y');
    }
    boundary
}

fn differing_char(input: u8) -> char {
    if input.is_ascii_alphabetic() {
        '0'
    } else if input.is_ascii_digit() {
        'n'
    } else {
        'y'
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_boundary_for_empty_input() {
        assert_eq!(generate_boundary(&[]), "p0ny");
    }

    #[test]
    fn boundary_differs_from_value_prefixes() {
        let values: Vec<&[u8]> = vec![b"alpha", b"12345", b"!!"];
        let boundary = generate_boundary(&values);
        assert_eq!(boundary.len(), 3);
        for value in &values {
            assert!(
                !value.windows(boundary.len()).any(|w| w == boundary.as_bytes()),
                "boundary {boundary:?} occurs in {value:?}"
            );
        }
    }

    #[test]
    fn boundary_never_occurs_in_content() {
        // adversarial content built from the characters the generator uses
        let values: Vec<&[u8]> = vec![b"p0ny", b"0ny", b"yyyyyyyy", b"p0"];
        let boundary = generate_boundary(&values);
        for value in &values {
            assert!(!value.windows(boundary.len()).any(|w| w == boundary.as_bytes()));
        }
    }

    #[test]
    fn urlencoded_round_trip() {
        let mut request = Request::default();
        request.post.append("a", "1");
        request.post.append("b", "two words");
        assert!(UrlEncoded.format(&mut request));

        assert_eq!(&request.body.read_all()[..], b"a=1&b=two+words");
        assert!(request
            .body
            .content_type()
            .matches_type("application", "x-www-form-urlencoded"));
    }
}
