/// Shared error type used across all VoiceBridge crates.
///
/// Variants map one-to-one onto the failure-handling policy: `Transport`
/// and `Cancelled` end the session locally, `Upstream` and `Timeout`
/// abort the current turn, `Protocol` closes the offending connection,
/// `Config` is fatal at startup, and `Internal` ends the session but
/// never the process.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport: {0}")]
    Transport(String),

    #[error("upstream {service}: {message}")]
    Upstream { service: String, message: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("config: {0}")]
    Config(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an upstream-service failure.
    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from barge-in or shutdown cancellation.
    /// Cancellation is not surfaced to the caller; it is logged at debug.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether a turn hitting this error aborts the turn with the fallback
    /// phrase and counts toward the consecutive-failure cap.
    pub fn aborts_turn(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_not_a_turn_abort() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Cancelled.aborts_turn());
    }

    #[test]
    fn upstream_and_timeout_abort_the_turn() {
        assert!(Error::upstream("stt", "socket closed").aborts_turn());
        assert!(Error::Timeout("turn wall clock".into()).aborts_turn());
        assert!(!Error::Protocol("bad frame".into()).aborts_turn());
        assert!(!Error::Internal("invariant".into()).aborts_turn());
    }

    #[test]
    fn upstream_display_names_the_service() {
        let e = Error::upstream("tts", "503");
        assert_eq!(e.to_string(), "upstream tts: 503");
    }
}
