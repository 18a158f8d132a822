//! # Helix Stream HAL
//!
//! The device backend seam of the stream runtime.
//!
//! Everything the signal and queue layers need from a driver goes through
//! the [`Device`] trait: ring memory, hardware queue creation, doorbell
//! registers and OS wait events. [`HostDevice`] implements the trait purely
//! in host memory and backs software agents as well as the test suites.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     helix-stream-hal                        │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Device    │  │   OsEvent   │  │  DoorbellRegister   │  │
//! │  │   (trait)   │  │ (wait/set)  │  │     (MMIO)          │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │  AgentInfo  │  │DeviceMemory │  │     HostDevice      │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod agent;
pub mod device;
pub mod error;
pub mod event;
pub mod host;
pub mod memory;
pub mod mmio;

// Re-exports for convenience
pub use agent::{
    AgentId, AgentInfo, AgentKind, DoorbellKind, QueueType, MAX_QUEUE_PACKETS, MIN_QUEUE_PACKETS,
    PACKET_BYTES,
};
pub use device::{Device, HwQueueId, QueueDescriptor, QueuePriority, QueueResource};
pub use error::{Error, Result};
pub use event::{EventId, EventKind, EventWait, MemoryFault, OsEvent, INFINITE_MS};
pub use host::HostDevice;
pub use memory::DeviceMemory;
pub use mmio::DoorbellRegister;
