//! # Backend Errors
//!
//! Failures reported by a device backend.

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// HAL Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// Errors a [`Device`](crate::Device) may return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Backend ran out of memory or hardware slots
    OutOfResources,
    /// Hardware queue could not be created
    QueueCreationFailed,
    /// Unknown queue or event id
    NotFound,
    /// Operation not supported by this backend or agent
    NotSupported,
    /// Queue is suspended and cannot be updated
    Suspended,
    /// Invalid parameter provided
    InvalidParameter,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfResources => write!(f, "backend out of resources"),
            Self::QueueCreationFailed => write!(f, "hardware queue creation failed"),
            Self::NotFound => write!(f, "backend object not found"),
            Self::NotSupported => write!(f, "operation not supported by backend"),
            Self::Suspended => write!(f, "queue is suspended"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
        }
    }
}

impl std::error::Error for Error {}
