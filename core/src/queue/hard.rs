//! Device-backed queues.

use core::sync::atomic::{fence, AtomicBool, Ordering};
use std::fmt;
use std::sync::Arc;

use helix_stream_hal::{AgentInfo, DoorbellKind, HwQueueId, QueueDescriptor, PACKET_BYTES};

use super::{report_default, ErrorCallback, PacketRing, QueueRequest};
use crate::abi::{QueueProperties, SharedQueue, SignalKind};
use crate::error::{Error, Result};
use crate::pool::BlockRef;
use crate::rollback::Rollback;
use crate::runtime::Runtime;
use crate::signal::{DoorbellTarget, Signal, SignalOps, Variant};
use crate::types::{AgentId, QueueHandle, QueuePriority, SignalAttributes, SignalValue};

/// A queue executed by a device agent
pub struct HardQueue {
    runtime: Arc<Runtime>,
    agent: AgentId,
    block: BlockRef<SharedQueue>,
    ring: PacketRing,
    hw: HwQueueId,
    doorbell: Arc<Signal>,
    inactive_signal: Arc<Signal>,
    callback: Option<ErrorCallback>,
    active: AtomicBool,
    suspended: AtomicBool,
    destroyed: AtomicBool,
    priority: spin::Mutex<QueuePriority>,
}

impl HardQueue {
    /// Create a device queue on `agent`
    ///
    /// The requested size is clamped into the agent's supported range. Every
    /// step is undone if a later one fails.
    pub fn new(runtime: &Arc<Runtime>, agent: &AgentInfo, request: &QueueRequest) -> Result<Self> {
        if !agent.supports(request.queue_type) {
            return Err(Error::InvalidQueueCreation);
        }
        let packets = request
            .size
            .clamp(agent.queue_min_packets, agent.queue_max_packets);
        if !packets.is_power_of_two() {
            return Err(Error::InvalidQueueCreation);
        }

        let device = runtime.device();
        let bytes = packets as usize * PACKET_BYTES as usize;
        let ring = PacketRing::new(device.allocate_queue_buffer(agent, bytes)?, packets)?;
        ring.invalidate_all();

        let mut rollback = Rollback::new();

        let block = runtime.queue_blocks().alloc()?;
        {
            let block = block.clone();
            rollback.push("free queue block", move || {
                block.free();
            });
        }
        let handle = QueueHandle::from_raw(block.handle());

        let priority = QueuePriority::default();
        let resource = device.create_queue(
            agent,
            &QueueDescriptor {
                queue_type: request.queue_type,
                ring_address: ring.base_address(),
                ring_bytes: bytes,
                priority,
                percentage: 100,
                private_segment_size: request.private_segment_size,
                group_segment_size: request.group_segment_size,
                reclaim_scratch: !runtime.flags().no_scratch_reclaim,
            },
        )?;
        {
            let device = Arc::clone(device);
            let id = resource.id;
            rollback.push("destroy device queue", move || {
                let _ = device.destroy_queue(id);
            });
        }

        let kind = match agent.doorbell {
            DoorbellKind::Hardware => SignalKind::Doorbell,
            DoorbellKind::Legacy => SignalKind::LegacyDoorbell,
        };
        let bell_block = Signal::new_block(runtime, kind, 0)?;
        bell_block.queue.store(handle.raw(), Ordering::Relaxed);
        let target = DoorbellTarget::new(
            block.clone(),
            resource.doorbell,
            agent.doorbell,
            runtime.flags().machine_model,
        );
        let doorbell = Signal::build(runtime, bell_block, Variant::Doorbell(target), false);
        {
            let doorbell = Arc::clone(&doorbell);
            rollback.push("destroy doorbell", move || {
                let _ = doorbell.destroy_handle();
            });
        }

        let inactive_signal = runtime.create_signal(0, &[], SignalAttributes::GPU_ONLY)?;

        block.queue_type.store(request.queue_type as u32, Ordering::Relaxed);
        block.features.store(request.features.bits(), Ordering::Relaxed);
        block.base_address.store(ring.base_address(), Ordering::Relaxed);
        block.doorbell_signal.store(doorbell.handle().raw(), Ordering::Relaxed);
        block.size.store(packets, Ordering::Relaxed);
        block.id.store(runtime.next_queue_id(), Ordering::Relaxed);
        block
            .queue_properties
            .store(QueueProperties::IS_PTR64.bits(), Ordering::Relaxed);
        block
            .queue_inactive_signal
            .store(inactive_signal.handle().raw(), Ordering::Release);

        rollback.commit();
        log::debug!(
            "queue {:?}: {} packets on {:?} ({:?} doorbell)",
            handle,
            packets,
            agent.id,
            agent.doorbell
        );

        Ok(Self {
            runtime: Arc::clone(runtime),
            agent: agent.id,
            block,
            ring,
            hw: resource.id,
            doorbell,
            inactive_signal,
            callback: request.callback.clone(),
            active: AtomicBool::new(true),
            suspended: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            priority: spin::Mutex::new(priority),
        })
    }

    /// Queue handle
    pub fn handle(&self) -> QueueHandle {
        QueueHandle::from_raw(self.block.handle())
    }

    /// Shared control block
    pub fn shared(&self) -> &SharedQueue {
        &self.block
    }

    /// Packet ring
    pub fn ring(&self) -> &PacketRing {
        &self.ring
    }

    /// Doorbell signal
    pub fn doorbell(&self) -> &Arc<Signal> {
        &self.doorbell
    }

    /// Signal the device raises when the queue is inactivated on error
    pub fn inactive_signal(&self) -> &Arc<Signal> {
        &self.inactive_signal
    }

    /// Agent running the queue
    pub fn agent(&self) -> AgentId {
        self.agent
    }

    /// Device queue id
    pub fn hw_id(&self) -> HwQueueId {
        self.hw
    }

    /// Whether the queue still processes packets
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether the queue has been suspended
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Current scheduling priority
    pub fn priority(&self) -> QueuePriority {
        *self.priority.lock()
    }

    /// Only the device moves the read index of a hardware queue
    pub fn store_read_index(&self, _value: u64, _order: Ordering) {
        panic!("store_read_index is illegal on hardware queue {:?}", self.handle());
    }

    /// Tear down the device queue; the ring stays readable
    pub fn inactivate(&self) -> Result<()> {
        if self.active.swap(false, Ordering::AcqRel) {
            self.runtime.device().destroy_queue(self.hw)?;
            fence(Ordering::Acquire);
            log::debug!("queue {:?}: inactivated", self.handle());
        }
        Ok(())
    }

    /// Change the scheduling priority
    pub fn set_priority(&self, priority: QueuePriority) -> Result<()> {
        if self.is_suspended() || !self.is_active() {
            return Err(Error::InvalidQueue);
        }
        let mut current = self.priority.lock();
        self.runtime.device().update_queue(self.hw, priority)?;
        *current = priority;
        Ok(())
    }

    /// Stop scheduling the queue without destroying it
    pub fn suspend(&self) -> Result<()> {
        if !self.is_active() {
            return Err(Error::InvalidQueue);
        }
        self.runtime.device().suspend_queue(self.hw)?;
        self.suspended.store(true, Ordering::Release);
        Ok(())
    }

    /// Deliver an asynchronous error
    pub fn report_async_error(&self, error: Error) {
        match &self.callback {
            Some(callback) => callback(error, self.handle()),
            None => report_default(self.runtime.flags(), self.ring.base_address(), error),
        }
        self.inactive_signal.store_release(error.code() as SignalValue);
    }

    /// Release the device queue and both signals; later calls do nothing
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = self.inactivate() {
            log::warn!("queue {:?}: device refused teardown: {}", self.handle(), err);
        }
        let _ = self.doorbell.destroy_handle();
        let _ = self.inactive_signal.destroy();
        log::debug!("queue {:?}: destroyed", self.handle());
    }
}

impl Drop for HardQueue {
    fn drop(&mut self) {
        self.destroy();
        self.block.free();
    }
}

impl fmt::Debug for HardQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardQueue")
            .field("handle", &self.handle())
            .field("agent", &self.agent)
            .field("hw", &self.hw)
            .field("ring", &self.ring)
            .field("active", &self.is_active())
            .finish()
    }
}
