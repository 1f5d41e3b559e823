//! Delivery failure taxonomy.
//!
//! None of these escape the service: every [`AttemptError`] ends up as the
//! `reason` of a `mark_failed` call.

use std::time::Duration;

use outpost_smtp::ClientError;
use thiserror::Error;

use crate::{DnsError, ServiceState};

#[derive(Debug, Error)]
pub enum ServiceError {
    /// `start` was called on a service that already ran.
    #[error("delivery service cannot start while {0}")]
    NotIdle(ServiceState),
}

/// Why a whole delivery attempt for one message failed.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("no recipients")]
    NoRecipients,

    #[error("invalid recipient domain: {0}")]
    InvalidDomain(String),

    #[error("DNS resolution failed: {0}")]
    ResolutionFailed(#[from] DnsError),

    #[error("no MX servers found for {0}")]
    NoTargets(String),

    #[error("all MX servers failed: {0}")]
    AllTargetsFailed(TransportError),

    /// Shutdown began before the attempt could start.
    #[error("delivery interrupted by shutdown")]
    Cancelled,
}

impl AttemptError {
    /// Whether the failure was caused by the relay shutting down rather than
    /// by the destination.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::AllTargetsFailed(TransportError::Cancelled)
        )
    }
}

/// Why handing a message to one mail exchanger failed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The server answered with a 4xx or 5xx reply.
    #[error("{code} {message}")]
    Rejected { code: u16, message: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("delivery interrupted by shutdown")]
    Cancelled,
}

impl TransportError {
    /// `true` for 5xx rejections.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Rejected { code, .. } if *code >= 500)
    }
}

impl From<ClientError> for TransportError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Io(err) => Self::ConnectionFailed(err.to_string()),
            ClientError::ConnectionClosed => {
                Self::ConnectionFailed(String::from("connection closed unexpectedly"))
            }
            ClientError::TlsError(reason) => Self::Tls(reason),
            ClientError::ParseError(reason) => Self::Protocol(reason),
            ClientError::Utf8Error(err) => Self::Protocol(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_transport_errors() {
        assert!(matches!(
            TransportError::from(ClientError::ConnectionClosed),
            TransportError::ConnectionFailed(_)
        ));
        assert!(matches!(
            TransportError::from(ClientError::TlsError("bad cert".into())),
            TransportError::Tls(reason) if reason == "bad cert"
        ));
        assert!(matches!(
            TransportError::from(ClientError::ParseError("junk".into())),
            TransportError::Protocol(_)
        ));
    }

    #[test]
    fn rejection_classes() {
        let permanent = TransportError::Rejected {
            code: 550,
            message: "no such user".into(),
        };
        let temporary = TransportError::Rejected {
            code: 451,
            message: "try later".into(),
        };

        assert!(permanent.is_permanent());
        assert!(!temporary.is_permanent());
        assert!(!TransportError::Timeout(Duration::from_secs(1)).is_permanent());
        assert_eq!(permanent.to_string(), "550 no such user");
    }

    #[test]
    fn cancellation_is_recognised() {
        assert!(AttemptError::Cancelled.is_cancellation());
        assert!(AttemptError::AllTargetsFailed(TransportError::Cancelled).is_cancellation());
        assert!(!AttemptError::NoRecipients.is_cancellation());
    }
}
