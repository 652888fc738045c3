//! Error types for the health monitor

use std::fmt;

pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Debug)]
pub enum MonitorError {
    /// IO operation failed
    Io(std::io::Error),

    /// HTTP client could not be built or a request failed
    Http(reqwest::Error),

    /// Configuration file could not be parsed
    Toml(toml::de::Error),

    /// Configuration error
    Config(String),

    /// Embedded probe fixture could not be decoded
    Fixture(String),

    /// A check cycle failed as a whole
    Cycle(String),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Io(err) => write!(f, "IO error: {}", err),
            MonitorError::Http(err) => write!(f, "HTTP error: {}", err),
            MonitorError::Toml(err) => write!(f, "TOML error: {}", err),
            MonitorError::Config(msg) => write!(f, "Configuration error: {}", msg),
            MonitorError::Fixture(msg) => write!(f, "Fixture error: {}", msg),
            MonitorError::Cycle(msg) => write!(f, "Cycle error: {}", msg),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Io(err) => Some(err),
            MonitorError::Http(err) => Some(err),
            MonitorError::Toml(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::Io(err)
    }
}

impl From<reqwest::Error> for MonitorError {
    fn from(err: reqwest::Error) -> Self {
        MonitorError::Http(err)
    }
}

impl From<toml::de::Error> for MonitorError {
    fn from(err: toml::de::Error) -> Self {
        MonitorError::Toml(err)
    }
}

/// Maximum number of body characters carried into a status failure
pub const BODY_SNIPPET_CHARS: usize = 100;

/// Why a single probe attempt failed.
///
/// Variants are listed in classification order: a status failure is more
/// specific than a bare transport failure, which is more specific than a
/// response-shape failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// Server answered with a non-2xx status
    Status { status: u16, body: String },

    /// Request never produced a usable response; carries the category name only
    Transport(&'static str),

    /// Response arrived but did not have the expected shape
    Validation(String),

    /// Model type has no registered probe
    Unsupported(String),
}

impl ProbeError {
    /// Build a status failure, keeping at most [`BODY_SNIPPET_CHARS`] of the body
    pub fn status(status: u16, body: &str) -> Self {
        ProbeError::Status {
            status,
            body: body.chars().take(BODY_SNIPPET_CHARS).collect(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ProbeError::Validation(message.into())
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Status { status, body } => write!(f, "HTTP error: {} - {}", status, body),
            ProbeError::Transport(category) => write!(f, "request error: {}", category),
            ProbeError::Validation(msg) => write!(f, "check failed: {}", msg),
            ProbeError::Unsupported(kind) => {
                write!(f, "check failed: unsupported check type: {}", kind)
            }
        }
    }
}

impl std::error::Error for ProbeError {}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ProbeError::status(status.as_u16(), "");
        }
        ProbeError::Transport(transport_category(&err))
    }
}

/// Name the kind of transport failure without exposing the underlying message,
/// which can contain URLs or credentials.
pub fn transport_category(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "Timeout"
    } else if err.is_connect() {
        "ConnectionError"
    } else if err.is_redirect() {
        "RedirectError"
    } else if err.is_body() {
        "BodyError"
    } else if err.is_decode() {
        "DecodeError"
    } else if err.is_builder() {
        "BuilderError"
    } else {
        "RequestError"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_body_is_truncated() {
        let body = "x".repeat(250);
        let err = ProbeError::status(500, &body);

        match &err {
            ProbeError::Status { status, body } => {
                assert_eq!(*status, 500);
                assert_eq!(body.chars().count(), BODY_SNIPPET_CHARS);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
        assert!(err.to_string().starts_with("HTTP error: 500 - "));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let body = "é".repeat(150);
        let err = ProbeError::status(502, &body);

        if let ProbeError::Status { body, .. } = err {
            assert_eq!(body.chars().count(), 100);
        } else {
            panic!("expected status variant");
        }
    }

    #[test]
    fn test_probe_error_details() {
        assert_eq!(
            ProbeError::Transport("Timeout").to_string(),
            "request error: Timeout"
        );
        assert_eq!(
            ProbeError::validation("missing text field").to_string(),
            "check failed: missing text field"
        );
        assert_eq!(
            ProbeError::Unsupported("embedding".to_string()).to_string(),
            "check failed: unsupported check type: embedding"
        );
    }

    #[test]
    fn test_monitor_error_display() {
        let err = MonitorError::Config("interval must be positive".to_string());
        assert_eq!(err.to_string(), "Configuration error: interval must be positive");
    }
}
