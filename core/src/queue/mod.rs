//! # Queues
//!
//! A queue is a power-of-two ring of 64-byte packets plus a shared control
//! block holding monotonically increasing read and write dispatch indices.
//! Producers reserve slots by moving the write index, fill them, and ring
//! the doorbell signal with the new write index; the consumer moves the read
//! index.
//!
//! - [`HardQueue`]: backed by a device queue. The ring lives in device
//!   memory and the doorbell writes a (possibly legacy) MMIO register.
//! - [`SoftQueue`]: a host-memory ring consumed by another in-process actor.
//!   The doorbell is an ordinary signal supplied by the caller.

use core::sync::atomic::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::abi::SharedQueue;
use crate::config::RuntimeFlags;
use crate::error::{Error, Result};
use crate::signal::Signal;
use crate::types::{AgentId, QueueFeatures, QueueHandle, QueuePriority, QueueType};

mod hard;
mod ring;
mod soft;

pub use hard::HardQueue;
pub use ring::PacketRing;
pub use soft::SoftQueue;

/// Asynchronous error callback: the error and the queue it hit
pub type ErrorCallback = Arc<dyn Fn(Error, QueueHandle) + Send + Sync>;

// =============================================================================
// CREATION REQUEST
// =============================================================================

/// Parameters of a new queue
#[derive(Clone)]
pub struct QueueRequest {
    /// Ring size in packets, a power of two
    pub size: u32,
    /// Producer model
    pub queue_type: QueueType,
    /// Packet kinds the queue accepts
    pub features: QueueFeatures,
    /// Called on asynchronous queue errors
    pub callback: Option<ErrorCallback>,
    /// Private segment size hint in bytes
    pub private_segment_size: u32,
    /// Group segment size hint in bytes
    pub group_segment_size: u32,
}

impl QueueRequest {
    /// Multi-producer request for `size` packets
    pub fn new(size: u32) -> Self {
        Self {
            size,
            queue_type: QueueType::Multi,
            features: QueueFeatures::default(),
            callback: None,
            private_segment_size: u32::MAX,
            group_segment_size: u32::MAX,
        }
    }

    /// Set the producer model
    pub fn with_type(mut self, queue_type: QueueType) -> Self {
        self.queue_type = queue_type;
        self
    }

    /// Set accepted packet kinds
    pub fn with_features(mut self, features: QueueFeatures) -> Self {
        self.features = features;
        self
    }

    /// Set the asynchronous error callback
    pub fn with_callback(mut self, callback: ErrorCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Set segment size hints
    pub fn with_segments(mut self, private: u32, group: u32) -> Self {
        self.private_segment_size = private;
        self.group_segment_size = group;
        self
    }
}

impl fmt::Debug for QueueRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueRequest")
            .field("size", &self.size)
            .field("queue_type", &self.queue_type)
            .field("features", &self.features)
            .field("callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// OPERATIONS
// =============================================================================

macro_rules! index_orderings {
    ($name:ident($($arg:ident: $ty:ty),*) => $method:ident, $doc:literal) => {
        paste::paste! {
            #[doc = concat!($doc, ", relaxed ordering")]
            fn [<$name _relaxed>](&self, $($arg: $ty),*) -> u64 {
                self.$method($($arg,)* Ordering::Relaxed)
            }

            #[doc = concat!($doc, ", acquire ordering")]
            fn [<$name _acquire>](&self, $($arg: $ty),*) -> u64 {
                self.$method($($arg,)* Ordering::Acquire)
            }

            #[doc = concat!($doc, ", release ordering")]
            fn [<$name _release>](&self, $($arg: $ty),*) -> u64 {
                self.$method($($arg,)* Ordering::Release)
            }

            #[doc = concat!($doc, ", acquire-release ordering")]
            fn [<$name _acq_rel>](&self, $($arg: $ty),*) -> u64 {
                self.$method($($arg,)* Ordering::AcqRel)
            }
        }
    };
}

/// Index and control operations common to every queue
pub trait QueueOps {
    /// Read the read index
    fn load_read_index(&self, order: Ordering) -> u64;

    /// Read the write index
    fn load_write_index(&self, order: Ordering) -> u64;

    /// Write the write index
    fn store_write_index(&self, value: u64, order: Ordering);

    /// Replace the write index if it equals `expected`, returning the prior value
    fn cas_write_index(&self, expected: u64, value: u64, order: Ordering) -> u64;

    /// Advance the write index, returning the prior value
    fn add_write_index(&self, value: u64, order: Ordering) -> u64;

    /// Write the read index; only the consumer may do this
    fn store_read_index(&self, value: u64, order: Ordering);

    /// Stop packet processing for good
    fn inactivate(&self) -> Result<()>;

    /// Change the scheduling priority
    fn set_priority(&self, priority: QueuePriority) -> Result<()>;

    /// Read the read index, relaxed ordering
    fn load_read_index_relaxed(&self) -> u64 {
        self.load_read_index(Ordering::Relaxed)
    }

    /// Read the read index, acquire ordering
    fn load_read_index_acquire(&self) -> u64 {
        self.load_read_index(Ordering::Acquire)
    }

    /// Read the write index, relaxed ordering
    fn load_write_index_relaxed(&self) -> u64 {
        self.load_write_index(Ordering::Relaxed)
    }

    /// Read the write index, acquire ordering
    fn load_write_index_acquire(&self) -> u64 {
        self.load_write_index(Ordering::Acquire)
    }

    /// Write the write index, relaxed ordering
    fn store_write_index_relaxed(&self, value: u64) {
        self.store_write_index(value, Ordering::Relaxed);
    }

    /// Write the write index, release ordering
    fn store_write_index_release(&self, value: u64) {
        self.store_write_index(value, Ordering::Release);
    }

    /// Write the read index, relaxed ordering
    fn store_read_index_relaxed(&self, value: u64) {
        self.store_read_index(value, Ordering::Relaxed);
    }

    /// Write the read index, release ordering
    fn store_read_index_release(&self, value: u64) {
        self.store_read_index(value, Ordering::Release);
    }

    index_orderings!(cas_write_index(expected: u64, value: u64) => cas_write_index, "Compare-and-swap the write index");
    index_orderings!(add_write_index(value: u64) => add_write_index, "Advance the write index");
}

fn load_order(order: Ordering) -> Ordering {
    match order {
        Ordering::Release => Ordering::Relaxed,
        Ordering::AcqRel => Ordering::Acquire,
        other => other,
    }
}

fn store_order(order: Ordering) -> Ordering {
    match order {
        Ordering::Acquire => Ordering::Relaxed,
        Ordering::AcqRel => Ordering::Release,
        other => other,
    }
}

fn cas_failure_order(order: Ordering) -> Ordering {
    load_order(order)
}

/// Index operations on a control block
pub(crate) struct Indices<'a>(pub(crate) &'a SharedQueue);

impl Indices<'_> {
    pub(crate) fn load_read(&self, order: Ordering) -> u64 {
        self.0.read_dispatch_id.load(load_order(order))
    }

    pub(crate) fn load_write(&self, order: Ordering) -> u64 {
        self.0.write_dispatch_id.load(load_order(order))
    }

    pub(crate) fn store_write(&self, value: u64, order: Ordering) {
        self.0.write_dispatch_id.store(value, store_order(order));
    }

    pub(crate) fn store_read(&self, value: u64, order: Ordering) {
        self.0.read_dispatch_id.store(value, store_order(order));
    }

    pub(crate) fn cas_write(&self, expected: u64, value: u64, order: Ordering) -> u64 {
        match self
            .0
            .write_dispatch_id
            .compare_exchange(expected, value, order, cas_failure_order(order))
        {
            Ok(prior) | Err(prior) => prior,
        }
    }

    pub(crate) fn add_write(&self, value: u64, order: Ordering) -> u64 {
        self.0.write_dispatch_id.fetch_add(value, order)
    }
}

/// Default asynchronous error handler
pub(crate) fn report_default(flags: &RuntimeFlags, base_address: u64, error: Error) {
    log::error!("queue at {:#x} inactivated due to async error: {}", base_address, error);
    if flags.enable_queue_fault_message {
        eprintln!("Queue at {:#x} inactivated due to async error:\n\t{}", base_address, error);
    }
}

// =============================================================================
// QUEUE
// =============================================================================

/// A hardware or software queue
#[derive(Debug)]
pub enum Queue {
    /// Device-backed queue
    Hardware(HardQueue),
    /// Host-memory queue
    Software(SoftQueue),
}

impl Queue {
    /// Queue handle
    pub fn handle(&self) -> QueueHandle {
        match self {
            Self::Hardware(q) => q.handle(),
            Self::Software(q) => q.handle(),
        }
    }

    /// Shared control block
    pub fn shared(&self) -> &SharedQueue {
        match self {
            Self::Hardware(q) => q.shared(),
            Self::Software(q) => q.shared(),
        }
    }

    /// Packet ring
    pub fn ring(&self) -> &PacketRing {
        match self {
            Self::Hardware(q) => q.ring(),
            Self::Software(q) => q.ring(),
        }
    }

    /// Doorbell signal
    pub fn doorbell(&self) -> &Arc<Signal> {
        match self {
            Self::Hardware(q) => q.doorbell(),
            Self::Software(q) => q.doorbell(),
        }
    }

    /// Agent a hardware queue runs on
    pub fn agent(&self) -> Option<AgentId> {
        match self {
            Self::Hardware(q) => Some(q.agent()),
            Self::Software(_) => None,
        }
    }

    /// Whether the queue is device-backed
    pub fn is_hardware(&self) -> bool {
        matches!(self, Self::Hardware(_))
    }

    /// Ring size in packets
    pub fn size(&self) -> u32 {
        self.shared().size()
    }

    /// Queue id
    pub fn id(&self) -> u64 {
        self.shared().id()
    }

    /// Deliver an asynchronous error to the queue's callback
    pub fn report_async_error(&self, error: Error) {
        match self {
            Self::Hardware(q) => q.report_async_error(error),
            Self::Software(q) => q.report_async_error(error),
        }
    }

    /// Release the queue's resources; later calls do nothing
    pub fn destroy(&self) {
        match self {
            Self::Hardware(q) => q.destroy(),
            Self::Software(q) => q.destroy(),
        }
    }
}

impl QueueOps for Queue {
    fn load_read_index(&self, order: Ordering) -> u64 {
        Indices(self.shared()).load_read(order)
    }

    fn load_write_index(&self, order: Ordering) -> u64 {
        Indices(self.shared()).load_write(order)
    }

    fn store_write_index(&self, value: u64, order: Ordering) {
        Indices(self.shared()).store_write(value, order);
    }

    fn cas_write_index(&self, expected: u64, value: u64, order: Ordering) -> u64 {
        Indices(self.shared()).cas_write(expected, value, order)
    }

    fn add_write_index(&self, value: u64, order: Ordering) -> u64 {
        Indices(self.shared()).add_write(value, order)
    }

    fn store_read_index(&self, value: u64, order: Ordering) {
        match self {
            Self::Hardware(q) => q.store_read_index(value, order),
            Self::Software(q) => q.store_read_index(value, order),
        }
    }

    fn inactivate(&self) -> Result<()> {
        match self {
            Self::Hardware(q) => q.inactivate(),
            Self::Software(q) => q.inactivate(),
        }
    }

    fn set_priority(&self, priority: QueuePriority) -> Result<()> {
        match self {
            Self::Hardware(q) => q.set_priority(priority),
            Self::Software(q) => q.set_priority(priority),
        }
    }
}
