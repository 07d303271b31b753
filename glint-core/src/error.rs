//! Domain-specific error types for the presentation core.
//!
//! All fallible operations return `Result<T, GlintError>`.
//! Steady states such as "no clock sample yet" are modelled as
//! `Option`, not errors.

use thiserror::Error;

use crate::buffer::BufferId;

/// The canonical error type for the presentation core.
#[derive(Debug, Error)]
pub enum GlintError {
    // ── Resource Errors ──────────────────────────────────────────
    /// Pixel-storage allocation was refused by the system.
    #[error("buffer allocation failed: {bytes} bytes")]
    AllocationFailed {
        /// Requested allocation size.
        bytes: usize,
    },

    /// A buffer id refers to a buffer that no longer exists.
    #[error("unknown buffer: {0}")]
    UnknownBuffer(BufferId),

    // ── State Errors ─────────────────────────────────────────────
    /// An operation was attempted in a state that forbids it.
    ///
    /// This is a caller contract violation (e.g. committing while a
    /// commit is already outstanding), not a recoverable runtime
    /// condition.
    #[error("state violation: {0}")]
    StateViolation(&'static str),

    /// A counter was decremented below zero.
    #[error("lifecycle underflow: {0}")]
    LifecycleUnderflow(&'static str),

    // ── Collaborator Errors ──────────────────────────────────────
    /// The presentation surface rejected an operation.
    #[error("surface error: {0}")]
    Surface(String),

    /// The clock-sync transport rejected an outbound ping.
    #[error("ping transport error: {0}")]
    PingTransport(String),

    /// An event channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Transfer Errors ──────────────────────────────────────────
    /// Source framebuffer dimensions do not match its byte length.
    #[error("source framebuffer too short: {len} bytes for {width}x{height}")]
    SourceTooShort {
        len: usize,
        width: u32,
        height: u32,
    },
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for GlintError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        GlintError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = GlintError::AllocationFailed { bytes: 4096 };
        assert!(e.to_string().contains("4096"));

        let e = GlintError::StateViolation("commit already outstanding");
        assert!(e.to_string().contains("commit already outstanding"));
    }
}
