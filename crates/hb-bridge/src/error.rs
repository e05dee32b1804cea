//! Crate-wide error taxonomy for operations crossing the dispatcher/HTTP
//! boundary. Sub-modules (config, whitelist loading, parsing)
//! keep their own small error enums and convert at the boundary.

use std::fmt;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    #[error("not connected")]
    NotConnected,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("awaiters saturated for key {0}")]
    AwaitersSaturated(String),
    #[error("timeout waiting for reply")]
    Timeout,
    #[error("disconnected")]
    Disconnected,
    #[error("write failed: {0}")]
    TransientWriteError(String),
}

/// HTTP status code taxonomy for operations crossing the dispatcher/HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl BridgeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::NotConnected | BridgeError::InvalidInput(_) => StatusCode(400),
            BridgeError::AwaitersSaturated(_) => StatusCode(429),
            BridgeError::Timeout => StatusCode(504),
            // TransientWriteError is treated as Disconnected after logging.
            BridgeError::Disconnected | BridgeError::TransientWriteError(_) => StatusCode(504),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_errors_to_status_codes() {
        assert_eq!(BridgeError::NotConnected.status_code().0, 400);
        assert_eq!(BridgeError::InvalidInput("x".into()).status_code().0, 400);
        assert_eq!(
            BridgeError::AwaitersSaturated("1-2-3".into()).status_code().0,
            429
        );
        assert_eq!(BridgeError::Timeout.status_code().0, 504);
        assert_eq!(BridgeError::Disconnected.status_code().0, 504);
        assert_eq!(
            BridgeError::TransientWriteError("io".into()).status_code().0,
            504
        );
    }
}
