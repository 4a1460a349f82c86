use snafu::Snafu;

use crate::protocol::{Status, StatusCode};

/// Everything that can go wrong while reading a message off the wire.
///
/// Each variant maps to the HTTP status the server should suggest to the
/// handler; none of them abort the process.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DecodeError {
    #[snafu(display("malformed request line"))]
    MalformedRequestLine,

    #[snafu(display("malformed status line"))]
    MalformedStatusLine,

    #[snafu(display("malformed header: {reason}"))]
    MalformedHeader { reason: &'static str },

    #[snafu(display("invalid content length: {value}"))]
    InvalidContentLength { value: String },

    #[snafu(display("header section too large, current size: {current}, max size: {max}"))]
    TooLargeHeader { current: u64, max: u64 },

    #[snafu(display("payload too large, expected size: {expected}, max size: {max}"))]
    PayloadTooLarge { expected: u64, max: u64 },

    #[snafu(display("length required"))]
    LengthRequired,

    #[snafu(display("expectation failed"))]
    ExpectationFailed,

    #[snafu(display("malformed chunked framing: {reason}"))]
    MalformedChunk { reason: &'static str },
}

impl DecodeError {
    /// The status a server should answer with when this error fires.
    pub fn suggested_status(&self) -> Status {
        let code = match self {
            Self::LengthRequired => StatusCode::LengthRequired,
            Self::ExpectationFailed => StatusCode::ExpectationFailed,
            Self::PayloadTooLarge { .. } => StatusCode::PayloadTooLarge,
            _ => StatusCode::BadRequest,
        };
        code.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(DecodeError::MalformedRequestLine.suggested_status().code, 400);
        assert_eq!(DecodeError::LengthRequired.suggested_status().code, 411);
        assert_eq!(DecodeError::ExpectationFailed.suggested_status().code, 417);
        assert_eq!(
            DecodeError::PayloadTooLarge { expected: 10, max: 5 }.suggested_status().code,
            413
        );
        assert_eq!(
            DecodeError::MalformedChunk { reason: "bad size" }.suggested_status().code,
            400
        );
    }
}
