//! # Error Handling
//!
//! Error taxonomy of the stream runtime.
//!
//! - Runtime operations return [`Result`].
//! - Construction failures unwind through [`Rollback`](crate::rollback::Rollback)
//!   and surface as one of these errors.
//! - Illegal operations on doorbell signals are programming errors and
//!   panic instead.

use core::fmt;

use helix_stream_hal as hal;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// Stream runtime Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// Stream runtime error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Bad size, type or parameter
    InvalidArgument,
    /// Destroyed or never-valid handle
    InvalidHandle,
    /// Destroyed or never-valid signal
    InvalidSignal,
    /// Operation not valid on this queue
    InvalidQueue,
    /// Agent cannot satisfy the requested queue type or size
    InvalidQueueCreation,
    /// Arguments are individually valid but conflict
    IncompatibleArguments,
    /// Allocation or OS object creation failed
    OutOfResources,
    /// Asynchronous hardware error on a queue
    Fatal,
    /// Operation not supported
    NotSupported,
    /// Unclassified device backend failure
    Device(hal::Error),
}

impl Error {
    /// Stable numeric status code
    pub const fn code(&self) -> u32 {
        match self {
            Self::InvalidArgument => 0x1001,
            Self::InvalidQueueCreation => 0x1002,
            Self::NotSupported => 0x1004,
            Self::OutOfResources => 0x1008,
            Self::InvalidSignal => 0x100A,
            Self::InvalidQueue => 0x100B,
            Self::InvalidHandle => 0x100C,
            Self::IncompatibleArguments => 0x1010,
            Self::Fatal => 0x1011,
            Self::Device(_) => 0x1000,
        }
    }

    /// Error category
    pub const fn category(&self) -> &'static str {
        match self {
            Self::InvalidArgument | Self::IncompatibleArguments => "Argument",
            Self::InvalidHandle | Self::InvalidSignal => "Handle",
            Self::InvalidQueue | Self::InvalidQueueCreation => "Queue",
            Self::OutOfResources => "Resource",
            Self::Fatal | Self::Device(_) | Self::NotSupported => "Device",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::InvalidHandle => write!(f, "invalid handle"),
            Self::InvalidSignal => write!(f, "invalid signal"),
            Self::InvalidQueue => write!(f, "invalid queue"),
            Self::InvalidQueueCreation => write!(f, "agent cannot create the requested queue"),
            Self::IncompatibleArguments => write!(f, "incompatible arguments"),
            Self::OutOfResources => write!(f, "out of resources"),
            Self::Fatal => write!(f, "fatal asynchronous queue error"),
            Self::NotSupported => write!(f, "operation not supported"),
            Self::Device(e) => write!(f, "device error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

// =============================================================================
// ERROR CONVERSION
// =============================================================================

impl From<hal::Error> for Error {
    fn from(e: hal::Error) -> Self {
        match e {
            hal::Error::OutOfResources => Self::OutOfResources,
            hal::Error::QueueCreationFailed => Self::InvalidQueueCreation,
            hal::Error::InvalidParameter => Self::InvalidArgument,
            hal::Error::Suspended => Self::InvalidQueue,
            hal::Error::NotSupported => Self::NotSupported,
            other => Self::Device(other),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
