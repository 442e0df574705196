//! Error taxonomy for the operator console
//!
//! Every failure the console can surface is a [`ConsoleError`] variant. Each
//! variant maps to a short status label shown to the operator and is run
//! through [`sanitize_error_message`] before it leaves the process.

use crate::auth::CredentialError;
use crate::config::ConfigError;
use crate::session::dispatcher::DispatchError;
use crate::signing::SigningError;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for console operations
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("Transport connect failed: {message}")]
    TransportConnect { message: String },

    #[error("Connection lost (code {code}): {message}")]
    TransportLost { code: i32, message: String },

    #[error("Subscription to {topic} failed: {message}")]
    Subscribe { topic: String, message: String },

    #[error("Publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },

    #[error("Malformed message on {topic}: {message}")]
    MessageParse { topic: String, message: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Unknown destination: {0}")]
    InvalidDestination(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Console is not running")]
    Unavailable,
}

impl ConsoleError {
    /// Short label for the operator status line
    pub fn status_label(&self) -> &'static str {
        match self {
            ConsoleError::Credential(_) => "Credential error",
            ConsoleError::Signing(_) => "Signing error",
            ConsoleError::TransportConnect { .. } => "Connect failed",
            ConsoleError::TransportLost { .. } => "Connection lost",
            ConsoleError::Subscribe { .. } => "Subscribe failed",
            ConsoleError::Publish { .. } => "Publish failed",
            ConsoleError::MessageParse { .. } => "Malformed message",
            ConsoleError::NotConnected => "Not connected",
            ConsoleError::InvalidDestination(_) => "Unknown destination",
            ConsoleError::Config(_) => "Configuration error",
            ConsoleError::Unavailable => "Console unavailable",
        }
    }

    /// Whether the failure belongs on the operator status line
    ///
    /// Malformed inbound payloads are logged and dropped; they never replace
    /// the connection status.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, ConsoleError::MessageParse { .. })
    }

    /// Sanitized `label: detail` text for the operator
    pub fn operator_message(&self) -> String {
        sanitize_error_message(&format!("{}: {}", self.status_label(), self))
    }

    pub fn message_parse<T: Into<String>, M: Into<String>>(topic: T, message: M) -> Self {
        Self::MessageParse {
            topic: topic.into(),
            message: message.into(),
        }
    }
}

impl From<TransportError> for ConsoleError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => ConsoleError::NotConnected,
            TransportError::Subscribe { topic, reason } => ConsoleError::Subscribe {
                topic,
                message: reason,
            },
            TransportError::Publish { topic, reason } => ConsoleError::Publish {
                topic,
                message: reason,
            },
            TransportError::Lost { code, message } => ConsoleError::TransportLost { code, message },
            other => ConsoleError::TransportConnect {
                message: other.to_string(),
            },
        }
    }
}

impl From<DispatchError> for ConsoleError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NotConnected => ConsoleError::NotConnected,
            DispatchError::InvalidDestination(dest) => ConsoleError::InvalidDestination(dest),
            DispatchError::Publish(transport) => transport.into(),
        }
    }
}

static SECRET_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret|signature|credential)[=:]\s*[^\s&]+").ok()
});

static SENSITIVE_PATH_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+").ok()
});

const MAX_MESSAGE_LEN: usize = 500;

/// Redact credential material and sensitive paths, then cap the length
///
/// Signed URLs carry `X-Amz-Signature=...`, `X-Amz-Security-Token=...` and
/// `X-Amz-Credential=...` query parameters; all of them are redacted.
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    if let Some(pattern) = SECRET_PATTERN.as_ref() {
        sanitized = pattern.replace_all(&sanitized, "${1}=***").to_string();
    }

    if let Some(pattern) = SENSITIVE_PATH_PATTERN.as_ref() {
        sanitized = pattern
            .replace_all(&sanitized, "/***REDACTED***/")
            .to_string();
    }

    if sanitized.len() > MAX_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for console operations
pub type ConsoleResult<T> = Result<T, ConsoleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels() {
        assert_eq!(ConsoleError::NotConnected.status_label(), "Not connected");
        assert_eq!(
            ConsoleError::TransportLost {
                code: 7,
                message: "socket closed".into()
            }
            .status_label(),
            "Connection lost"
        );
        assert_eq!(
            ConsoleError::Credential(CredentialError::MissingCredentials).status_label(),
            "Credential error"
        );
    }

    #[test]
    fn test_message_parse_is_not_user_visible() {
        let err = ConsoleError::message_parse("amr/AMR-001/status", "expected value");
        assert!(!err.is_user_visible());
        assert!(ConsoleError::NotConnected.is_user_visible());
        assert!(ConsoleError::from(TransportError::Refused("bad auth".into())).is_user_visible());
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: ConsoleError = TransportError::NotConnected.into();
        assert!(matches!(err, ConsoleError::NotConnected));

        let err: ConsoleError = TransportError::Lost {
            code: 8,
            message: "ping timeout".into(),
        }
        .into();
        assert!(matches!(err, ConsoleError::TransportLost { code: 8, .. }));

        let err: ConsoleError = TransportError::ConnectFailed("refused".into()).into();
        assert!(matches!(err, ConsoleError::TransportConnect { .. }));
    }

    #[test]
    fn test_operator_message_redacts_signed_url() {
        let err = ConsoleError::from(TransportError::ConnectFailed(
            "handshake failed for wss://host/mqtt?X-Amz-Signature=abcdef0123&X-Amz-Security-Token=FQoG"
                .into(),
        ));
        let text = err.operator_message();
        assert!(text.starts_with("Connect failed"));
        assert!(!text.contains("abcdef0123"));
        assert!(!text.contains("FQoG"));
        assert!(text.contains("Signature=***"));
    }

    #[test]
    fn test_sanitize_multiple_secrets() {
        let message = "Auth failed: password=pass1 api_key=key123 secret=hidden token=tok456";
        let sanitized = sanitize_error_message(message);

        assert!(!sanitized.contains("pass1"));
        assert!(!sanitized.contains("key123"));
        assert!(!sanitized.contains("hidden"));
        assert!(!sanitized.contains("tok456"));
        assert!(sanitized.contains("password=***"));
    }

    #[test]
    fn test_sanitize_case_insensitive_and_colons() {
        let sanitized = sanitize_error_message("PASSWORD=secret123 Token: abc");
        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc"));
    }

    #[test]
    fn test_sanitize_aws_config_paths() {
        let sanitized = sanitize_error_message("Failed to read /home/user/.aws/credentials");
        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains(".aws/credentials"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));

        let exact = sanitize_error_message(&"x".repeat(500));
        assert_eq!(exact.len(), 500);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"é".repeat(400));
        assert!(sanitized.ends_with("...[truncated]"));
        assert!(sanitized.len() <= 500);
    }

    #[test]
    fn test_sanitize_empty_message() {
        assert_eq!(sanitize_error_message(""), "");
    }
}
