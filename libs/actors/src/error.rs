//! Actor call errors.

use thiserror::Error;

/// Errors surfaced to callers of [`crate::Actor::call`] and to handlers
/// that fail a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The mailbox has been stopped and no longer accepts messages
    #[error("mailbox closed")]
    MailboxClosed,

    /// The message was enqueued but never processed (worker gone)
    #[error("call canceled before completion")]
    Canceled,

    /// The handler completed the call with a fault
    #[error("handler fault: {message}")]
    Fault { message: String },
}

impl CallError {
    /// Create a handler fault
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault {
            message: message.into(),
        }
    }

    /// Error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            CallError::MailboxClosed => "mailbox_closed",
            CallError::Canceled => "canceled",
            CallError::Fault { .. } => "fault",
        }
    }
}
