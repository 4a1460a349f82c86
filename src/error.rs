use std::fmt::{self, Display, Formatter};
use std::io;

/// Outcome of a transport-level operation.
///
/// Either success (empty) or an error carrying a human-readable message.
/// The message `"timeout"` is the distinguished value produced when a
/// deadline expires.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationStatus {
    message: Option<String>,
}

pub const TIMEOUT_MESSAGE: &str = "timeout";

impl OperationStatus {
    pub fn ok() -> Self {
        Self { message: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { message: Some(message.into()) }
    }

    pub fn timeout() -> Self {
        Self::error(TIMEOUT_MESSAGE)
    }

    pub fn is_ok(&self) -> bool {
        self.message.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.message.is_some()
    }

    pub fn is_timeout(&self) -> bool {
        self.message.as_deref() == Some(TIMEOUT_MESSAGE)
    }

    /// The error message, or the empty string on success.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }
}

impl Display for OperationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => f.write_str(message),
            None => f.write_str("ok"),
        }
    }
}

impl From<io::Error> for OperationStatus {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::timeout(),
            _ => Self::error(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_ok() {
        let status = OperationStatus::default();
        assert!(status.is_ok());
        assert!(!status.is_error());
        assert_eq!(status.message(), "");
    }

    #[test]
    fn timeout_is_distinguished() {
        let status = OperationStatus::timeout();
        assert!(status.is_error());
        assert!(status.is_timeout());
        assert!(!OperationStatus::error("connection reset").is_timeout());
    }

    #[test]
    fn io_timeouts_map_to_timeout() {
        let status: OperationStatus = io::Error::from(io::ErrorKind::TimedOut).into();
        assert!(status.is_timeout());
        let status: OperationStatus = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(status.is_timeout());
    }
}
