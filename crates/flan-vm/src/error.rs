//! Runtime error types.
//!
//! Every variant is terminal: the interpreter threads these out through
//! `Result` and the binary renders the diagnostic and exits. There is no
//! in-language recovery.

use std::fmt;

/// A fatal runtime condition.
#[derive(Clone, Debug)]
pub enum RuntimeError {
    /// Image load failure: I/O, bad magic, incompatible version.
    Load(String),
    /// Malformed image contents: unknown tags or opcodes, truncation,
    /// missing function terminator.
    Decode(String),
    /// Incompatible operand types for an operation.
    Type {
        message: String,
        err_info: Option<u16>,
    },
    /// A well-typed operation applied outside its domain: divide by zero,
    /// index out of range, missing key, global redefinition.
    Domain {
        message: String,
        err_info: Option<u16>,
    },
    /// Call frame overflow.
    FrameOverflow,
}

impl RuntimeError {
    pub fn decode(message: impl Into<String>) -> Self {
        RuntimeError::Decode(message.into())
    }

    pub fn type_error(err_info: u16, message: impl Into<String>) -> Self {
        RuntimeError::Type {
            message: message.into(),
            err_info: Some(err_info),
        }
    }

    pub fn domain(err_info: u16, message: impl Into<String>) -> Self {
        RuntimeError::Domain {
            message: message.into(),
            err_info: Some(err_info),
        }
    }

    /// The error-info index supplied by the faulting opcode, if any.
    pub fn err_info(&self) -> Option<u16> {
        match self {
            RuntimeError::Type { err_info, .. } | RuntimeError::Domain { err_info, .. } => {
                *err_info
            }
            _ => None,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Load(msg) | RuntimeError::Decode(msg) => write!(f, "{msg}"),
            RuntimeError::Type { message, .. } | RuntimeError::Domain { message, .. } => {
                write!(f, "{message}")
            }
            RuntimeError::FrameOverflow => write!(f, "Call stack overflow"),
        }
    }
}

impl std::error::Error for RuntimeError {}
