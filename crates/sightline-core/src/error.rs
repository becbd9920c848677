//! Error taxonomy shared by every feed.
//!
//! Creation-time failures ([`TelemetryError::ProviderUnavailable`] and
//! [`TelemetryError::StructLayoutMismatch`]) are fatal for the feed that hit
//! them. Per-cycle failures are transient: the poller logs them and tries again
//! on the next tick.

use thiserror::Error;

/// Errors raised by sessions, pollers and feed actions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TelemetryError {
    /// The native session could not be created or a provider is missing.
    #[error("telemetry provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Caller and provider disagree on the size of one wire record.
    #[error("structure size mismatch: native={native}, managed={expected}")]
    StructLayoutMismatch { native: usize, expected: usize },

    /// A single sampling pass failed.
    #[error("refresh failed: {0}")]
    TransientRefreshFailure(String),

    /// Fetched records could not be interpreted.
    #[error("decode failed: {0}")]
    DecodeFailure(String),

    /// The session was used after it was torn down.
    #[error("{0} used after it was disposed")]
    Disposed(&'static str),

    /// Settings could not be read or written.
    #[error("config error: {0}")]
    Config(String),

    /// A foreground action was refused before it reached the provider.
    #[error("action rejected: {0}")]
    ActionRejected(String),

    /// The provider refused or failed a foreground action.
    #[error("action failed: {0}")]
    ActionFailed(String),
}

impl TelemetryError {
    /// True when the feed that raised this error cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_) | Self::StructLayoutMismatch { .. }
        )
    }

    /// True when the next cycle may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientRefreshFailure(_) | Self::DecodeFailure(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TelemetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_mismatch_message_names_both_sizes() {
        let err = TelemetryError::StructLayoutMismatch {
            native: 64,
            expected: 60,
        };
        assert_eq!(
            err.to_string(),
            "structure size mismatch: native=64, managed=60"
        );
        assert!(err.is_fatal());
        assert!(!err.is_transient());
    }

    #[test]
    fn classification() {
        assert!(TelemetryError::ProviderUnavailable("x".into()).is_fatal());
        assert!(TelemetryError::DecodeFailure("x".into()).is_transient());
        assert!(TelemetryError::TransientRefreshFailure("x".into()).is_transient());
        let disposed = TelemetryError::Disposed("connection session");
        assert!(!disposed.is_fatal() && !disposed.is_transient());
        assert_eq!(
            disposed.to_string(),
            "connection session used after it was disposed"
        );
    }
}
