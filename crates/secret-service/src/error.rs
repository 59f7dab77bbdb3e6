//! Error types for the secret service client

use std::fmt::Display;

use thiserror::Error;

use crate::value::ObjectPath;

/// Failure reported by the underlying bus transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Error reply from the remote side, e.g.
    /// `org.freedesktop.DBus.Error.ServiceUnknown`
    #[error("{name}: {message}")]
    Remote { name: String, message: String },

    /// Local failure: connection setup, I/O, framing
    #[error("{0}")]
    Local(String),
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        TransportError::Local(message.into())
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        TransportError::Remote {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Remote error name, if the service answered with an error
    pub fn name(&self) -> Option<&str> {
        match self {
            TransportError::Remote { name, .. } => Some(name),
            TransportError::Local(_) => None,
        }
    }
}

/// Client errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid object path: {0:?}")]
    InvalidPath(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Prompt dismissed")]
    PromptDismissed,

    #[error("Event channel closed while waiting for prompt {0}")]
    ChannelClosed(ObjectPath),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Prompt {0} has already been used")]
    PromptSpent(ObjectPath),
}

impl Error {
    /// A value of signature `found` arrived where `expected` was required
    pub fn unexpected(expected: impl Display, found: impl Display) -> Self {
        Error::Decode(format!(
            "invalid type: expected '{}' but got '{}'",
            expected, found
        ))
    }

    /// A reply carried the wrong number of values
    pub fn arity(expected: usize, found: usize) -> Self {
        Error::Decode(format!("expected {} results but got {}", expected, found))
    }

    /// True when the user declined a prompt
    pub fn is_dismissed(&self) -> bool {
        matches!(self, Error::PromptDismissed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
