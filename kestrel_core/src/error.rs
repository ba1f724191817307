//! Error types and result definitions for the object layer.
//!
//! These errors cover failures raised by the object protocols themselves:
//! - Mapping protocol failures (missing keys, unsupported operations)
//! - Type mismatches between a value and the protocol it was used with
//! - Resource exhaustion while growing an object
//!
//! Errors raised by frame and quickening machinery live in `kestrel_vm` and
//! convert from this type.

use thiserror::Error;

/// The result type used by object protocols.
pub type CoreResult<T> = Result<T, CoreError>;

/// Error raised by an object protocol operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Key not found in a mapping.
    #[error("KeyError: '{key}'")]
    KeyError {
        /// The missing key.
        key: String,
    },

    /// Value used with a protocol it does not support.
    #[error("TypeError: {message}")]
    TypeError {
        /// Error description.
        message: String,
    },

    /// Value error.
    #[error("ValueError: {message}")]
    ValueError {
        /// Error description.
        message: String,
    },

    /// Memory allocation failure.
    #[error("MemoryError: {message}")]
    MemoryError {
        /// Error description.
        message: String,
    },

    /// Internal error (should never occur in a correct implementation).
    #[error("InternalError: {message}")]
    InternalError {
        /// Error description.
        message: String,
    },
}

impl CoreError {
    /// Create a key error.
    #[must_use]
    pub fn key(key: impl Into<String>) -> Self {
        Self::KeyError { key: key.into() }
    }

    /// Create a type error.
    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::TypeError {
            message: message.into(),
        }
    }

    /// Create a value error.
    #[must_use]
    pub fn value_error(message: impl Into<String>) -> Self {
        Self::ValueError {
            message: message.into(),
        }
    }

    /// Create a memory error.
    #[must_use]
    pub fn memory(message: impl Into<String>) -> Self {
        Self::MemoryError {
            message: message.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Returns true for a missing-key error.
    ///
    /// Mapping deletion treats a missing key as success, so callers
    /// need to tell it apart from every other failure.
    #[inline]
    #[must_use]
    pub fn is_key_error(&self) -> bool {
        matches!(self, Self::KeyError { .. })
    }

    /// Get the exception type name.
    #[must_use]
    pub fn exception_type(&self) -> &'static str {
        match self {
            Self::KeyError { .. } => "KeyError",
            Self::TypeError { .. } => "TypeError",
            Self::ValueError { .. } => "ValueError",
            Self::MemoryError { .. } => "MemoryError",
            Self::InternalError { .. } => "SystemError",
        }
    }
}
