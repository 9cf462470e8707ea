use std::io;

use thiserror::Error;

/// Errors thay may occur in this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Framing parameters which cannot describe a serial character.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// A derived timeout did not fit in a [`std::time::Duration`].
    #[error("Timeout value exceeds maximum")]
    TimeoutOverflow,

    /// The link options or configuration file are not a valid combination.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// The transport could not be opened.
    #[error("Could not open `{address}`, problem: {problem}")]
    Connection {
        /// The transport identifier, such as `/dev/ttyUSB0` or `COM3`.
        address: String,

        /// What the driver reported.
        problem: String,
    },

    /// Start was called on a link which is not closed.
    #[error("The link is already started")]
    AlreadyStarted,

    /// The link is closed (never opened, closed by the user, or failed fatally).
    #[error("The link is not open")]
    NotOpen,

    /// The write queue is full.
    #[error("The write queue is full")]
    Busy,

    /// A frame could not be written within the retry budget.
    #[error("Failed to send data after {attempts} attempt(s)")]
    RetryExhausted {
        /// How many writes were attempted.
        attempts: usize,
    },

    /// The value type has no register width or encoding rule.
    #[error("Unsupported value type: `{0}`")]
    UnsupportedType(String),

    /// A value could not be coerced into a number.
    #[error("The value `{0}` is not numeric")]
    NotNumeric(String),

    /// A byte order string is not a permutation of the bytes given.
    #[error("Invalid byte order: {0}")]
    InvalidByteOrder(String),

    /// A link is already registered for this address.
    #[error("A link for `{0}` is already registered")]
    AlreadyRegistered(String),

    /// IO related errors, such as a failing close.
    #[error("Underlying IO problem")]
    Io(#[from] io::Error),
}

impl Error {
    /// If this is a [`Error::BadConfig`], get the problem description.
    pub fn try_into_bad_config(self) -> Option<String> {
        if let Self::BadConfig(problem) = self {
            Some(problem)
        } else {
            None
        }
    }
}
