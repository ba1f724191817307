//! Runtime error types for the frame layer.
//!
//! Errors are cheap to construct and carry only what their message needs.
//! Every kind maps onto the exception type a user of the VM would see;
//! rejected line jumps carry a [`JumpError`] naming the exact reason.

use kestrel_core::CoreError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Runtime error raised by frame, quickening and introspection operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    /// Error kind
    pub kind: RuntimeErrorKind,
}

/// Specific runtime error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    // =========================================================================
    // Resource Errors
    // =========================================================================
    /// Allocation failed
    MemoryError { message: Arc<str> },
    /// Recursion limit exceeded
    RecursionError { depth: usize },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// Line jump rejected
    InvalidJump(JumpError),
    /// Invalid value for operation
    ValueError { message: Arc<str> },
    /// Operation not supported for types
    TypeError { message: Arc<str> },
    /// Operation not valid in the current state
    RuntimeError { message: Arc<str> },

    // =========================================================================
    // Lookup Errors
    // =========================================================================
    /// Key not found in a mapping
    KeyError { key: Arc<str> },
    /// Attribute cannot be set or deleted
    AttributeError { message: Arc<str> },

    // =========================================================================
    // System Errors
    // =========================================================================
    /// Internal VM error (should not happen)
    InternalError { message: Arc<str> },
}

/// Reason a requested line jump was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpError {
    /// The frame has not started running.
    #[error("can't jump from the 'call' trace event of a new frame")]
    FromCallEvent,
    /// The frame has finished or is unwinding.
    #[error("can only jump from a 'line' trace event")]
    NotLineEvent,
    /// No trace function is installed.
    #[error("f_lineno can only be set by a trace function")]
    NotTracing,
    /// The requested line does not fit a line number.
    #[error("lineno out of range")]
    LinenoOutOfRange,
    /// The requested line precedes the function.
    #[error("line {0} comes before the current code block")]
    BeforeCodeBlock(i64),
    /// No line at or after the requested one has code.
    #[error("line {0} comes after the current code block")]
    AfterCodeBlock(i64),
    /// No instruction of the target line is reachable.
    #[error("cannot find bytecode for specified line")]
    NoBytecodeForLine,
    /// The current stack cannot be modelled.
    #[error("stack is too deep to analyze")]
    StackTooDeep,
    /// The current instruction is only reachable through an exception.
    #[error("can't jump from within an exception handler")]
    FromExceptionHandler,
    /// The target is only reachable through an exception.
    #[error("can't jump into an exception handler, or code may be unreachable")]
    IntoExceptionHandler,
    /// The target expects exception state that is not on the stack.
    #[error("can't jump into an 'except' block as there's no exception")]
    IntoExceptBlock,
    /// The target expects values that are not on the stack.
    #[error("differing stack depth")]
    DifferingStackDepth,
    /// The target expects a loop iterator that is not on the stack.
    #[error("can't jump into the body of a for loop")]
    IntoForLoop,
}

impl RuntimeError {
    /// Create a new runtime error.
    #[inline]
    pub fn new(kind: RuntimeErrorKind) -> Self {
        Self { kind }
    }

    // =========================================================================
    // Convenience Constructors
    // =========================================================================

    #[inline]
    pub fn memory_error(message: impl Into<Arc<str>>) -> Self {
        Self::new(RuntimeErrorKind::MemoryError {
            message: message.into(),
        })
    }

    #[inline]
    pub fn recursion_error(depth: usize) -> Self {
        Self::new(RuntimeErrorKind::RecursionError { depth })
    }

    #[inline]
    pub fn invalid_jump(err: JumpError) -> Self {
        Self::new(RuntimeErrorKind::InvalidJump(err))
    }

    #[inline]
    pub fn value_error(message: impl Into<Arc<str>>) -> Self {
        Self::new(RuntimeErrorKind::ValueError {
            message: message.into(),
        })
    }

    #[inline]
    pub fn type_error(message: impl Into<Arc<str>>) -> Self {
        Self::new(RuntimeErrorKind::TypeError {
            message: message.into(),
        })
    }

    #[inline]
    pub fn runtime_error(message: impl Into<Arc<str>>) -> Self {
        Self::new(RuntimeErrorKind::RuntimeError {
            message: message.into(),
        })
    }

    #[inline]
    pub fn key_error(key: impl Into<Arc<str>>) -> Self {
        Self::new(RuntimeErrorKind::KeyError { key: key.into() })
    }

    #[inline]
    pub fn attribute_error(message: impl Into<Arc<str>>) -> Self {
        Self::new(RuntimeErrorKind::AttributeError {
            message: message.into(),
        })
    }

    #[inline]
    pub fn internal(message: impl Into<Arc<str>>) -> Self {
        Self::new(RuntimeErrorKind::InternalError {
            message: message.into(),
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The rejected jump, if this is one.
    #[inline]
    pub fn as_jump_error(&self) -> Option<JumpError> {
        match self.kind {
            RuntimeErrorKind::InvalidJump(err) => Some(err),
            _ => None,
        }
    }

    /// Whether this is a missing-key error.
    #[inline]
    pub fn is_key_error(&self) -> bool {
        matches!(self.kind, RuntimeErrorKind::KeyError { .. })
    }

    /// Exception type name a user would see.
    pub fn exception_type(&self) -> &'static str {
        match self.kind {
            RuntimeErrorKind::MemoryError { .. } => "MemoryError",
            RuntimeErrorKind::RecursionError { .. } => "RecursionError",
            RuntimeErrorKind::InvalidJump(_) | RuntimeErrorKind::ValueError { .. } => "ValueError",
            RuntimeErrorKind::TypeError { .. } => "TypeError",
            RuntimeErrorKind::RuntimeError { .. } => "RuntimeError",
            RuntimeErrorKind::KeyError { .. } => "KeyError",
            RuntimeErrorKind::AttributeError { .. } => "AttributeError",
            RuntimeErrorKind::InternalError { .. } => "SystemError",
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RuntimeErrorKind::MemoryError { message } => write!(f, "MemoryError: {}", message),
            RuntimeErrorKind::RecursionError { depth } => {
                write!(
                    f,
                    "RecursionError: maximum recursion depth exceeded ({})",
                    depth
                )
            }
            RuntimeErrorKind::InvalidJump(err) => write!(f, "ValueError: {}", err),
            RuntimeErrorKind::ValueError { message } => write!(f, "ValueError: {}", message),
            RuntimeErrorKind::TypeError { message } => write!(f, "TypeError: {}", message),
            RuntimeErrorKind::RuntimeError { message } => write!(f, "RuntimeError: {}", message),
            RuntimeErrorKind::KeyError { key } => write!(f, "KeyError: '{}'", key),
            RuntimeErrorKind::AttributeError { message } => {
                write!(f, "AttributeError: {}", message)
            }
            RuntimeErrorKind::InternalError { message } => {
                write!(f, "InternalError: {}", message)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<JumpError> for RuntimeError {
    fn from(err: JumpError) -> Self {
        Self::invalid_jump(err)
    }
}

impl From<CoreError> for RuntimeError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::KeyError { key } => Self::key_error(key),
            CoreError::TypeError { message } => Self::type_error(message),
            CoreError::ValueError { message } => Self::value_error(message),
            CoreError::MemoryError { message } => Self::memory_error(message),
            CoreError::InternalError { message } => Self::internal(message),
        }
    }
}

impl From<std::collections::TryReserveError> for RuntimeError {
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::memory_error("out of memory")
    }
}

/// Result type for VM operations.
pub type VmResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuntimeError::type_error("globals must be a dict");
        assert_eq!(err.to_string(), "TypeError: globals must be a dict");
    }

    #[test]
    fn test_jump_messages() {
        let err = RuntimeError::from(JumpError::IntoForLoop);
        assert_eq!(
            err.to_string(),
            "ValueError: can't jump into the body of a for loop"
        );
        assert_eq!(err.exception_type(), "ValueError");
        assert_eq!(err.as_jump_error(), Some(JumpError::IntoForLoop));
        assert_eq!(
            JumpError::AfterCodeBlock(12).to_string(),
            "line 12 comes after the current code block"
        );
    }

    #[test]
    fn test_from_core_error() {
        let err = RuntimeError::from(CoreError::key("x"));
        assert!(err.is_key_error());
        assert_eq!(err.to_string(), "KeyError: 'x'");
        let err = RuntimeError::from(CoreError::memory("no room"));
        assert_eq!(err.exception_type(), "MemoryError");
    }

    #[test]
    fn test_recursion_error() {
        let err = RuntimeError::recursion_error(64);
        assert!(err.to_string().contains("maximum recursion depth"));
        assert!(err.as_jump_error().is_none());
    }
}
