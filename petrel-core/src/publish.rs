//! Publisher Seam Between the Drain Task and the Uplink
//!
//! The core never speaks a wire protocol; it hands serialized envelopes to a
//! [`Publisher`] and trusts its at-least-once contract: once `enqueue`
//! returns `Ok`, the transport owns delivery. Everything before that point is
//! the pipeline's problem, which is why the error type splits cleanly into
//! retryable (the drain task holds the batch and tries again) and rejected
//! (the message itself is malformed - a configuration bug, fatal).

use thiserror::Error;

/// Failures from [`Publisher::enqueue`]
#[derive(Error, Debug)]
pub enum PublishError {
    /// No broker connection right now
    #[error("not connected")]
    NotConnected,

    /// Transport send queue is full
    #[error("transport queue full")]
    QueueFull,

    /// Transport did not accept the message in time
    #[error("timeout")]
    Timeout,

    /// Protocol-level failure from the transport
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The message is malformed and will never be accepted
    ///
    /// Fatal: retrying a rejected message cannot succeed.
    #[error("rejected: {0}")]
    Rejected(&'static str),
}

impl PublishError {
    /// May the same enqueue be retried later?
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PublishError::Rejected(_))
    }
}

/// Uplink transport accepting serialized envelopes
///
/// Implementations deliver at-least-once after accepting a message.
pub trait Publisher: Send + Sync {
    /// Hand a serialized envelope to the transport
    fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rejection_is_fatal() {
        assert!(PublishError::NotConnected.is_retryable());
        assert!(PublishError::QueueFull.is_retryable());
        assert!(PublishError::Timeout.is_retryable());
        assert!(PublishError::Protocol("eof".into()).is_retryable());
        assert!(!PublishError::Rejected("bad topic").is_retryable());
    }
}
