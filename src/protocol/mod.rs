//! The HTTP message data model: protocol identities, methods, statuses,
//! header multimaps, media types, cookies, bodies and the request/response
//! pair itself.

pub mod body;
pub mod cookie;
pub mod headers;
pub mod method;
pub mod mime;
pub mod multipart;
pub mod request;
pub mod response;
pub mod status;
pub mod version;

pub use body::{Body, BodyKind};
pub use cookie::{parse_cookies, parse_set_cookie, CookieJar, SetCookie};
pub use headers::{
    format_header_parameter, format_header_parameters, parse_header_parameters, CaseInsensitive,
    CaseSensitive, CompoundHeader, DataMap, Headers, OrderedMultimap,
};
pub use method::Method;
pub use mime::MimeType;
pub use multipart::{Multipart, Part};
pub use request::{Auth, FileMap, Request, RequestFile};
pub use response::Response;
pub use status::{Status, StatusCode, StatusType};
pub use version::Protocol;
