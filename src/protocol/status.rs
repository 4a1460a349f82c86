use std::fmt::{self, Display, Formatter};

/// Standard status codes with their registered reason messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StatusCode {
    Continue = 100,
    SwitchingProtocols = 101,
    Ok = 200,
    Created = 201,
    Accepted = 202,
    NonAuthoritativeInformation = 203,
    NoContent = 204,
    ResetContent = 205,
    PartialContent = 206,
    MultipleChoices = 300,
    MovedPermanently = 301,
    Found = 302,
    SeeOther = 303,
    NotModified = 304,
    UseProxy = 305,
    TemporaryRedirect = 307,
    PermanentRedirect = 308,
    BadRequest = 400,
    Unauthorized = 401,
    PaymentRequired = 402,
    Forbidden = 403,
    NotFound = 404,
    MethodNotAllowed = 405,
    NotAcceptable = 406,
    ProxyAuthenticationRequired = 407,
    RequestTimeout = 408,
    Conflict = 409,
    Gone = 410,
    LengthRequired = 411,
    PreconditionFailed = 412,
    PayloadTooLarge = 413,
    UriTooLong = 414,
    UnsupportedMediaType = 415,
    RangeNotSatisfiable = 416,
    ExpectationFailed = 417,
    UpgradeRequired = 426,
    PreconditionRequired = 428,
    TooManyRequests = 429,
    RequestHeaderFieldsTooLarge = 431,
    InternalServerError = 500,
    NotImplemented = 501,
    BadGateway = 502,
    ServiceUnavailable = 503,
    GatewayTimeout = 504,
    HttpVersionNotSupported = 505,
    NetworkAuthenticationRequired = 511,
}

impl StatusCode {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn message(self) -> &'static str {
        standard_message(self as u16)
    }
}

fn standard_message(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        511 => "Network Authentication Required",
        _ => "",
    }
}

/// The five registered response classes, plus a bucket for nonsense codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusType {
    Invalid,
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
}

/// A status code together with its (possibly non-standard) reason message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: u16,
    pub message: String,
}

impl Status {
    /// Builds a status with the registered message for `code`.
    pub fn new(code: u16) -> Self {
        Self { code, message: standard_message(code).to_string() }
    }

    pub fn with_message(code: u16, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn ok() -> Self {
        StatusCode::Ok.into()
    }

    pub fn status_type(&self) -> StatusType {
        match self.code {
            100..=199 => StatusType::Informational,
            200..=299 => StatusType::Success,
            300..=399 => StatusType::Redirection,
            400..=499 => StatusType::ClientError,
            500..=599 => StatusType::ServerError,
            _ => StatusType::Invalid,
        }
    }

    pub fn is_error(&self) -> bool {
        self.code >= 400
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl From<StatusCode> for Status {
    fn from(code: StatusCode) -> Self {
        Self { code: code.code(), message: code.message().to_string() }
    }
}

impl PartialEq<StatusCode> for Status {
    fn eq(&self, other: &StatusCode) -> bool {
        self.code == other.code()
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_lookup() {
        assert_eq!(Status::new(404).message, "Not Found");
        assert_eq!(Status::new(100).message, "Continue");
        assert_eq!(Status::new(799).message, "");
    }

    #[test]
    fn classes() {
        assert_eq!(Status::new(100).status_type(), StatusType::Informational);
        assert_eq!(Status::new(204).status_type(), StatusType::Success);
        assert_eq!(Status::new(302).status_type(), StatusType::Redirection);
        assert_eq!(Status::new(404).status_type(), StatusType::ClientError);
        assert_eq!(Status::new(500).status_type(), StatusType::ServerError);
        assert_eq!(Status::new(42).status_type(), StatusType::Invalid);
        assert!(Status::new(417).is_error());
        assert!(!Status::ok().is_error());
    }

    #[test]
    fn compares_against_codes() {
        assert_eq!(Status::ok(), StatusCode::Ok);
        assert_eq!(Status::with_message(404, "gone fishing"), StatusCode::NotFound);
    }
}
