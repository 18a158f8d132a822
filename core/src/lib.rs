//! # Helix Stream
//!
//! Synchronization and dispatch core of the Helix compute runtime.
//!
//! Host threads, other processes and compute agents meet in two kinds of
//! shared objects:
//!
//! - **Signals**: a 64-bit value with a full matrix of atomic operations at
//!   four memory orderings, plus waits that spin, sleep or block on an OS
//!   event. See [`signal`].
//! - **Queues**: power-of-two rings of 64-byte AQL packets with monotonic
//!   read/write indices and a doorbell signal. See [`queue`].
//!
//! [`StreamPool`] creates and destroys both, pools hardware queues per
//! agent, multiplexes waits over arbitrary signal sets and owns the IPC
//! handle table. [`EventPool`] recycles OS wait events and runs the
//! asynchronous signal-handler thread.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        StreamPool                           │
//! │   queue registry · IPC table · WaitAnySignal · groups       │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │            Queue             │          EventPool           │
//! │   Hardware    │   Software   │   OS events · async thread   │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │                          Signal                             │
//! │        BusyWait     │     Interrupt     │     Doorbell      │
//! ├─────────────────────────────────────────────────────────────┤
//! │          Shared ABI blocks · block pools · packets          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  helix-stream-hal (Device)                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod abi;
pub mod config;
pub mod error;
pub mod event_pool;
pub mod packet;
pub mod pool;
pub mod queue;
pub mod rollback;
pub mod runtime;
pub mod signal;
pub mod stream_pool;
pub mod time;
pub mod types;

mod wait_any;

// Re-exports for convenience
pub use config::RuntimeFlags;
pub use error::{Error, Result};
pub use event_pool::{AsyncHandler, EventPool};
pub use helix_stream_hal as hal;
pub use queue::{ErrorCallback, Queue, QueueOps, QueueRequest};
pub use runtime::Runtime;
pub use signal::{Signal, SignalOps, SignalVariant};
pub use stream_pool::StreamPool;
pub use types::*;
