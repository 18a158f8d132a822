//! # Host Device
//!
//! A [`Device`] living entirely in host memory. It backs software agents and
//! gives tests a driver whose limits can be dialed in.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use hashbrown::HashMap;

use crate::agent::{AgentId, AgentInfo};
use crate::device::{Device, HwQueueId, QueueDescriptor, QueuePriority, QueueResource};
use crate::error::{Error, Result};
use crate::event::{EventId, EventKind, EventWait, OsEvent};
use crate::memory::DeviceMemory;
use crate::mmio::DoorbellRegister;

/// Ring buffers are page aligned
const RING_ALIGN: usize = 4096;

#[derive(Debug)]
struct HostQueue {
    agent: AgentId,
    priority: QueuePriority,
    suspended: bool,
    doorbell: Arc<DoorbellRegister>,
    descriptor: QueueDescriptor,
}

/// In-process device backend
#[derive(Debug)]
pub struct HostDevice {
    agents: Vec<AgentInfo>,
    event_limit: Option<usize>,
    live_events: AtomicUsize,
    next_event: AtomicU32,
    next_queue: AtomicU64,
    queues: spin::Mutex<HashMap<HwQueueId, HostQueue>>,
    fail_queue_creation: AtomicBool,
    multi_waits: AtomicUsize,
    sleepers: spin::Mutex<Vec<ThreadId>>,
}

impl HostDevice {
    /// Create a backend exposing `agents`
    pub fn new(agents: Vec<AgentInfo>) -> Self {
        Self {
            agents,
            event_limit: None,
            live_events: AtomicUsize::new(0),
            next_event: AtomicU32::new(1),
            next_queue: AtomicU64::new(1),
            queues: spin::Mutex::new(HashMap::new()),
            fail_queue_creation: AtomicBool::new(false),
            multi_waits: AtomicUsize::new(0),
            sleepers: spin::Mutex::new(Vec::new()),
        }
    }

    /// Refuse to create more than `limit` live events
    pub fn with_event_limit(mut self, limit: usize) -> Self {
        self.event_limit = Some(limit);
        self
    }

    /// Make every following `create_queue` fail
    pub fn set_fail_queue_creation(&self, fail: bool) {
        self.fail_queue_creation.store(fail, Ordering::Relaxed);
    }

    /// Number of live hardware queues
    pub fn queue_count(&self) -> usize {
        self.queues.lock().len()
    }

    /// Number of live events
    pub fn event_count(&self) -> usize {
        self.live_events.load(Ordering::Relaxed)
    }

    /// Priority of a live queue
    pub fn queue_priority(&self, id: HwQueueId) -> Option<QueuePriority> {
        self.queues.lock().get(&id).map(|q| q.priority)
    }

    /// Whether a live queue is suspended
    pub fn is_suspended(&self, id: HwQueueId) -> Option<bool> {
        self.queues.lock().get(&id).map(|q| q.suspended)
    }

    /// Agent that owns a live queue
    pub fn queue_agent(&self, id: HwQueueId) -> Option<AgentId> {
        self.queues.lock().get(&id).map(|q| q.agent)
    }

    /// Descriptor a live queue was created with
    pub fn queue_descriptor(&self, id: HwQueueId) -> Option<QueueDescriptor> {
        self.queues.lock().get(&id).map(|q| q.descriptor.clone())
    }

    /// Distinct threads that have blocked on an event so far
    pub fn sleeping_threads(&self) -> usize {
        self.sleepers.lock().len()
    }

    /// Calls to `wait_on_multiple_events` so far
    pub fn multi_event_waits(&self) -> usize {
        self.multi_waits.load(Ordering::Relaxed)
    }

    fn record_sleeper(&self) {
        let id = thread::current().id();
        let mut sleepers = self.sleepers.lock();
        if !sleepers.contains(&id) {
            sleepers.push(id);
        }
    }
}

impl Default for HostDevice {
    /// One CPU agent (id 0) and one GPU agent (id 1)
    fn default() -> Self {
        Self::new(vec![AgentInfo::cpu(0), AgentInfo::gpu(1)])
    }
}

impl Device for HostDevice {
    fn agents(&self) -> &[AgentInfo] {
        &self.agents
    }

    fn allocate_queue_buffer(&self, _agent: &AgentInfo, bytes: usize) -> Result<DeviceMemory> {
        DeviceMemory::host(bytes, RING_ALIGN)
    }

    fn create_queue(&self, agent: &AgentInfo, desc: &QueueDescriptor) -> Result<QueueResource> {
        if self.fail_queue_creation.load(Ordering::Relaxed) {
            return Err(Error::QueueCreationFailed);
        }
        if agent.is_cpu() || self.agent(agent.id).is_none() {
            return Err(Error::NotSupported);
        }
        if !desc.ring_bytes.is_power_of_two() {
            return Err(Error::InvalidParameter);
        }

        let id = HwQueueId(self.next_queue.fetch_add(1, Ordering::Relaxed));
        let doorbell = Arc::new(DoorbellRegister::new());
        self.queues.lock().insert(
            id,
            HostQueue {
                agent: agent.id,
                priority: desc.priority,
                suspended: false,
                doorbell: Arc::clone(&doorbell),
                descriptor: desc.clone(),
            },
        );

        log::debug!("host device: created queue {:?} on {:?}", id, agent.id);
        Ok(QueueResource { id, doorbell })
    }

    fn update_queue(&self, id: HwQueueId, priority: QueuePriority) -> Result<()> {
        let mut queues = self.queues.lock();
        let queue = queues.get_mut(&id).ok_or(Error::NotFound)?;
        if queue.suspended {
            return Err(Error::Suspended);
        }
        queue.priority = priority;
        Ok(())
    }

    fn suspend_queue(&self, id: HwQueueId) -> Result<()> {
        let mut queues = self.queues.lock();
        let queue = queues.get_mut(&id).ok_or(Error::NotFound)?;
        queue.suspended = true;
        Ok(())
    }

    fn destroy_queue(&self, id: HwQueueId) -> Result<()> {
        let queue = self.queues.lock().remove(&id).ok_or(Error::NotFound)?;
        log::debug!(
            "host device: destroyed queue {:?} after {} doorbell writes",
            id,
            queue.doorbell.write_count()
        );
        Ok(())
    }

    fn create_event(&self, kind: EventKind, manual_reset: bool) -> Result<Arc<OsEvent>> {
        let live = self.live_events.fetch_add(1, Ordering::AcqRel);
        if self.event_limit.is_some_and(|limit| live >= limit) {
            self.live_events.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::OutOfResources);
        }

        let id = EventId(self.next_event.fetch_add(1, Ordering::Relaxed));
        Ok(Arc::new(OsEvent::new(id, kind, manual_reset)))
    }

    fn destroy_event(&self, _event: &Arc<OsEvent>) {
        self.live_events.fetch_sub(1, Ordering::AcqRel);
    }

    fn wait_on_event(&self, event: &OsEvent, timeout_ms: u32) -> EventWait {
        self.record_sleeper();
        event.wait(timeout_ms)
    }

    fn wait_on_multiple_events(
        &self,
        events: &[Arc<OsEvent>],
        wait_all: bool,
        timeout_ms: u32,
    ) -> EventWait {
        self.multi_waits.fetch_add(1, Ordering::Relaxed);
        self.record_sleeper();
        OsEvent::wait_multiple(events, wait_all, timeout_ms)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::QueueType;

    fn descriptor(bytes: usize) -> QueueDescriptor {
        QueueDescriptor {
            queue_type: QueueType::Multi,
            ring_address: 0x1000,
            ring_bytes: bytes,
            priority: QueuePriority::Normal,
            percentage: 100,
            private_segment_size: u32::MAX,
            group_segment_size: 0x4000,
            reclaim_scratch: true,
        }
    }

    #[test]
    fn test_queue_lifecycle() {
        let device = HostDevice::default();
        let gpu = device.agents()[1].clone();
        let res = device.create_queue(&gpu, &descriptor(4096)).unwrap();
        assert_eq!(device.queue_count(), 1);
        assert_eq!(device.queue_agent(res.id), Some(AgentId(1)));
        let recorded = device.queue_descriptor(res.id).unwrap();
        assert_eq!(recorded.group_segment_size, 0x4000);
        assert!(recorded.reclaim_scratch);

        device.update_queue(res.id, QueuePriority::High).unwrap();
        assert_eq!(device.queue_priority(res.id), Some(QueuePriority::High));

        device.suspend_queue(res.id).unwrap();
        assert_eq!(device.update_queue(res.id, QueuePriority::Low), Err(Error::Suspended));

        device.destroy_queue(res.id).unwrap();
        assert_eq!(device.destroy_queue(res.id), Err(Error::NotFound));
    }

    #[test]
    fn test_cpu_agent_has_no_queues() {
        let device = HostDevice::default();
        let cpu = device.agents()[0].clone();
        assert_eq!(device.create_queue(&cpu, &descriptor(4096)).unwrap_err(), Error::NotSupported);
    }

    #[test]
    fn test_event_limit() {
        let device = HostDevice::default().with_event_limit(1);
        let event = device.create_event(EventKind::Signal, false).unwrap();
        assert_eq!(device.create_event(EventKind::Signal, false).unwrap_err(), Error::OutOfResources);
        device.destroy_event(&event);
        assert!(device.create_event(EventKind::Signal, false).is_ok());
    }

    #[test]
    fn test_event_waits_recorded() {
        let device = HostDevice::default();
        let a = device.create_event(EventKind::Signal, false).unwrap();
        let b = device.create_event(EventKind::Signal, false).unwrap();
        assert_eq!(device.wait_on_event(&a, 1), EventWait::TimedOut);
        assert_eq!(device.wait_on_multiple_events(&[a, b], false, 1), EventWait::TimedOut);
        assert_eq!(device.multi_event_waits(), 1);
        assert_eq!(device.sleeping_threads(), 1);
    }
}
