//! Host-memory queues consumed by an in-process actor.

use core::sync::atomic::{AtomicBool, Ordering};
use std::fmt;
use std::sync::Arc;

use helix_stream_hal::PACKET_BYTES;

use super::{report_default, ErrorCallback, Indices, PacketRing};
use crate::abi::SharedQueue;
use crate::error::{Error, Result};
use crate::pool::BlockRef;
use crate::runtime::Runtime;
use crate::signal::Signal;
use crate::types::{QueueFeatures, QueueHandle, QueuePriority, QueueType};

/// Ring alignment for host-memory queues
const RING_ALIGN: usize = 4096;

/// A queue whose consumer is another host thread
pub struct SoftQueue {
    runtime: Arc<Runtime>,
    block: BlockRef<SharedQueue>,
    ring: PacketRing,
    doorbell: Arc<Signal>,
    owns_doorbell: bool,
    callback: Option<ErrorCallback>,
    active: AtomicBool,
    destroyed: AtomicBool,
}

impl SoftQueue {
    /// Create a queue of `packets` slots rung through `doorbell`
    ///
    /// With `owns_doorbell` the doorbell is destroyed with the queue.
    pub fn new(
        runtime: &Arc<Runtime>,
        packets: u32,
        features: QueueFeatures,
        doorbell: Arc<Signal>,
        owns_doorbell: bool,
        callback: Option<ErrorCallback>,
    ) -> Result<Self> {
        if packets == 0 || !packets.is_power_of_two() {
            return Err(Error::InvalidArgument);
        }
        if !doorbell.is_valid() {
            return Err(Error::InvalidSignal);
        }

        let bytes = packets as usize * PACKET_BYTES as usize;
        let memory = runtime.device().allocate_system_memory(bytes, RING_ALIGN)?;
        let ring = PacketRing::new(memory, packets)?;
        ring.invalidate_all();

        let block = runtime.queue_blocks().alloc()?;
        block.queue_type.store(QueueType::Multi as u32, Ordering::Relaxed);
        block.features.store(features.bits(), Ordering::Relaxed);
        block.base_address.store(ring.base_address(), Ordering::Relaxed);
        block.doorbell_signal.store(doorbell.handle().raw(), Ordering::Relaxed);
        block.size.store(packets, Ordering::Relaxed);
        block.id.store(runtime.next_soft_queue_id(), Ordering::Release);

        log::debug!("soft queue {:?}: {} packets", QueueHandle::from_raw(block.handle()), packets);
        Ok(Self {
            runtime: Arc::clone(runtime),
            block,
            ring,
            doorbell,
            owns_doorbell,
            callback,
            active: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
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

    /// Whether the queue still accepts packets
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Move the read index; called by the consumer
    pub fn store_read_index(&self, value: u64, order: Ordering) {
        Indices(&self.block).store_read(value, order);
    }

    /// Mark the queue inactive
    pub fn inactivate(&self) -> Result<()> {
        self.active.store(false, Ordering::Release);
        Ok(())
    }

    /// Software queues have no scheduling priority
    pub fn set_priority(&self, _priority: QueuePriority) -> Result<()> {
        Err(Error::InvalidQueue)
    }

    /// Deliver an asynchronous error
    pub fn report_async_error(&self, error: Error) {
        match &self.callback {
            Some(callback) => callback(error, self.handle()),
            None => report_default(self.runtime.flags(), self.ring.base_address(), error),
        }
    }

    /// Release the owned doorbell; later calls do nothing
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.active.store(false, Ordering::Release);
        if self.owns_doorbell {
            let _ = self.doorbell.destroy();
        }
        log::debug!("soft queue {:?}: destroyed", self.handle());
    }
}

impl Drop for SoftQueue {
    fn drop(&mut self) {
        self.destroy();
        self.block.free();
    }
}

impl fmt::Debug for SoftQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftQueue")
            .field("handle", &self.handle())
            .field("ring", &self.ring)
            .field("doorbell", &self.doorbell.handle())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeFlags;
    use crate::packet::{PacketHeader, PacketType, TaskPacket};
    use crate::queue::{Queue, QueueOps};
    use crate::signal::SignalOps;
    use crate::time::WAIT_FOREVER;
    use crate::types::{SignalAttributes, SignalCondition, SignalValue, WaitState};
    use helix_stream_hal::HostDevice;

    fn runtime() -> Arc<Runtime> {
        Runtime::new(Arc::new(HostDevice::default()), RuntimeFlags::default())
    }

    fn queue(rt: &Arc<Runtime>, packets: u32) -> Result<Queue> {
        let doorbell = rt.create_signal(0, &[], SignalAttributes::empty())?;
        SoftQueue::new(rt, packets, QueueFeatures::AGENT_DISPATCH, doorbell, true, None).map(Queue::Software)
    }

    #[test]
    fn test_rejects_bad_size() {
        let rt = runtime();
        assert_eq!(queue(&rt, 12).unwrap_err(), Error::InvalidArgument);
        assert_eq!(queue(&rt, 0).unwrap_err(), Error::InvalidArgument);
    }

    #[test]
    fn test_producer_consumer() {
        let rt = runtime();
        let queue = Arc::new(queue(&rt, 8).unwrap());
        assert!(queue.id() >= 0x8000_0000);
        assert!(!queue.is_hardware());

        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                let mut sum = 0;
                let mut read = 0;
                while read < 20 {
                    queue.doorbell().wait_acquire(
                        SignalCondition::Gte,
                        read as SignalValue,
                        WAIT_FOREVER,
                        WaitState::Blocked,
                    );
                    while let Some(packet) = queue.ring().consume(read) {
                        sum += packet.as_packet::<TaskPacket>().arg;
                        read += 1;
                        queue.store_read_index_release(read);
                    }
                }
                sum
            })
        };

        for i in 0..20u64 {
            while queue.load_write_index_relaxed() - queue.load_read_index_acquire() >= 8 {
                std::thread::yield_now();
            }
            let index = queue.add_write_index_acq_rel(1);
            let packet = TaskPacket {
                header: PacketHeader::new(PacketType::Task).0,
                arg: i,
                ..Default::default()
            };
            queue.ring().publish(index, &packet).unwrap();
            queue.doorbell().store_release(index as SignalValue);
        }

        assert_eq!(consumer.join().unwrap(), (0..20).sum::<u64>());
        assert_eq!(queue.load_read_index_relaxed(), 20);
    }

    #[test]
    fn test_write_index_cas() {
        let rt = runtime();
        let queue = queue(&rt, 4).unwrap();
        assert_eq!(queue.cas_write_index_release(0, 3), 0);
        assert_eq!(queue.cas_write_index_relaxed(0, 9), 3);
        queue.store_write_index_release(5);
        assert_eq!(queue.load_write_index_acquire(), 5);
    }

    #[test]
    fn test_priority_rejected_and_destroy() {
        let rt = runtime();
        let queue = queue(&rt, 4).unwrap();
        assert_eq!(queue.set_priority(QueuePriority::High), Err(Error::InvalidQueue));
        queue.inactivate().unwrap();

        let doorbell = Arc::clone(queue.doorbell());
        queue.destroy();
        queue.destroy();
        assert!(!doorbell.is_valid());
        drop(queue);
        assert_eq!(rt.queue_blocks().live(), 0);
    }

    #[test]
    fn test_borrowed_doorbell_survives() {
        let rt = runtime();
        let doorbell = rt.create_signal(0, &[], SignalAttributes::empty()).unwrap();
        let queue = SoftQueue::new(&rt, 4, QueueFeatures::default(), Arc::clone(&doorbell), false, None).unwrap();
        drop(queue);
        assert!(doorbell.is_valid());
        doorbell.destroy().unwrap();
    }
}
