//! # Device Backend Trait
//!
//! The contract between the stream runtime and a driver.

use std::fmt;
use std::sync::Arc;

use crate::agent::{AgentId, AgentInfo, QueueType};
use crate::error::Result;
use crate::event::{EventKind, EventWait, OsEvent};
use crate::memory::DeviceMemory;
use crate::mmio::DoorbellRegister;

// =============================================================================
// QUEUE TYPES
// =============================================================================

/// Driver-side id of a hardware queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct HwQueueId(pub u64);

/// Scheduling priority of a hardware queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum QueuePriority {
    /// Lowest priority
    Minimum,
    /// Below normal
    Low,
    /// Default priority
    #[default]
    Normal,
    /// Above normal
    High,
    /// Highest priority
    Maximum,
}

/// Parameters for [`Device::create_queue`]
#[derive(Debug, Clone)]
pub struct QueueDescriptor {
    /// Producer model
    pub queue_type: QueueType,
    /// Base address of the packet ring
    pub ring_address: u64,
    /// Ring size in bytes
    pub ring_bytes: usize,
    /// Initial priority
    pub priority: QueuePriority,
    /// Share of the device the queue may use, in percent
    pub percentage: u32,
    /// Private segment size hint in bytes, `u32::MAX` when unknown
    pub private_segment_size: u32,
    /// Group segment size hint in bytes, `u32::MAX` when unknown
    pub group_segment_size: u32,
    /// Release scratch memory once dispatches finish
    pub reclaim_scratch: bool,
}

/// Resources the driver hands back for a created queue
#[derive(Debug, Clone)]
pub struct QueueResource {
    /// Driver queue id
    pub id: HwQueueId,
    /// Doorbell register of the queue
    pub doorbell: Arc<DoorbellRegister>,
}

// =============================================================================
// DEVICE TRAIT
// =============================================================================

/// A driver able to host queues and raise events
pub trait Device: Send + Sync + fmt::Debug {
    /// Agents this backend exposes
    fn agents(&self) -> &[AgentInfo];

    /// Look up one agent
    fn agent(&self, id: AgentId) -> Option<&AgentInfo> {
        self.agents().iter().find(|a| a.id == id)
    }

    /// Allocate device-visible ring memory for a queue of `agent`
    fn allocate_queue_buffer(&self, agent: &AgentInfo, bytes: usize) -> Result<DeviceMemory>;

    /// Allocate host memory visible to every agent
    fn allocate_system_memory(&self, bytes: usize, align: usize) -> Result<DeviceMemory> {
        DeviceMemory::host(bytes, align)
    }

    /// Create a hardware queue over an allocated ring
    fn create_queue(&self, agent: &AgentInfo, desc: &QueueDescriptor) -> Result<QueueResource>;

    /// Change the priority of a queue
    fn update_queue(&self, id: HwQueueId, priority: QueuePriority) -> Result<()>;

    /// Stop the device from fetching packets of a queue
    fn suspend_queue(&self, id: HwQueueId) -> Result<()>;

    /// Tear down a hardware queue
    fn destroy_queue(&self, id: HwQueueId) -> Result<()>;

    /// Create an OS event
    fn create_event(&self, kind: EventKind, manual_reset: bool) -> Result<Arc<OsEvent>>;

    /// Destroy an OS event created by this backend
    fn destroy_event(&self, event: &Arc<OsEvent>);

    /// Raise an event
    fn set_event(&self, event: &OsEvent) {
        event.set();
    }

    /// Block on one event
    fn wait_on_event(&self, event: &OsEvent, timeout_ms: u32) -> EventWait {
        event.wait(timeout_ms)
    }

    /// Block on several events
    fn wait_on_multiple_events(
        &self,
        events: &[Arc<OsEvent>],
        wait_all: bool,
        timeout_ms: u32,
    ) -> EventWait {
        OsEvent::wait_multiple(events, wait_all, timeout_ms)
    }
}
