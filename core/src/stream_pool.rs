//! # Stream Pool
//!
//! Registry and factory for signals and queues.
//!
//! - Signals: creation policy, handle conversion, duplication, IPC export and
//!   attach, signal groups and waits over signal sets.
//! - Queues: hardware and software creation, per-agent pooling with explicit
//!   reference counts, cooperative queue sharing and lazily created hostcall
//!   buffers.
//! - Async handlers, forwarded to the runtime's [`EventPool`](crate::EventPool).
//!
//! Dropping the pool stops the async dispatcher, destroys its queues and
//! clears the runtime tables.

use core::sync::atomic::{AtomicU64, Ordering};
use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use helix_stream_hal::{AgentInfo, Device, DeviceMemory};

use crate::config::RuntimeFlags;
use crate::error::{Error, Result};
use crate::event_pool::AsyncHandler;
use crate::queue::{HardQueue, Queue, QueueRequest, SoftQueue};
use crate::runtime::{Runtime, SharedSignalPool};
use crate::signal::Signal;
use crate::types::{
    AgentId, QueueHandle, QueueType, SignalAttributes, SignalCondition,
    SignalGroupHandle, SignalHandle, SignalValue, WaitState,
};
use crate::wait_any;

/// Header of a hostcall buffer
const HOSTCALL_HEADER_BYTES: usize = 64;
/// One hostcall packet: a 64-byte header plus 64 lanes of 8 argument words
const HOSTCALL_PACKET_BYTES: usize = 64 + 64 * 8 * 8;
/// Hostcall buffer alignment
const HOSTCALL_ALIGN: usize = 4096;

/// Bookkeeping of a pooled hardware queue
struct PooledQueue {
    agent: AgentId,
    ref_count: u32,
    hostcall: Option<DeviceMemory>,
}

/// Signal and queue registry
pub struct StreamPool {
    runtime: Arc<Runtime>,
    queues: spin::RwLock<HashMap<u64, Arc<Queue>>>,
    pooled: spin::Mutex<HashMap<u64, PooledQueue>>,
    cooperative: spin::Mutex<HashMap<AgentId, (Arc<Queue>, u32)>>,
    groups: spin::RwLock<HashMap<u64, Arc<[Arc<Signal>]>>>,
    next_group: AtomicU64,
}

impl StreamPool {
    /// Create a pool over `device`
    pub fn new(device: Arc<dyn Device>, flags: RuntimeFlags) -> Self {
        Self::with_runtime(Runtime::new(device, flags))
    }

    /// Create a pool whose signal blocks live in `blocks`
    ///
    /// Pools sharing `blocks` can exchange IPC signals.
    pub fn with_shared_signal_pool(
        device: Arc<dyn Device>,
        flags: RuntimeFlags,
        blocks: Arc<SharedSignalPool>,
    ) -> Self {
        Self::with_runtime(Runtime::with_signal_blocks(device, flags, blocks))
    }

    fn with_runtime(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            queues: spin::RwLock::new(HashMap::new()),
            pooled: spin::Mutex::new(HashMap::new()),
            cooperative: spin::Mutex::new(HashMap::new()),
            groups: spin::RwLock::new(HashMap::new()),
            next_group: AtomicU64::new(1),
        }
    }

    /// Runtime context
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    // =========================================================================
    // Signals
    // =========================================================================

    /// Create a signal; see [`Runtime::create_signal`] for the variant policy
    pub fn create_signal(
        &self,
        initial: SignalValue,
        consumers: &[AgentId],
        attributes: SignalAttributes,
    ) -> Result<Arc<Signal>> {
        self.runtime.create_signal(initial, consumers, attributes)
    }

    /// Resolve a signal handle
    pub fn convert(&self, handle: SignalHandle) -> Option<Arc<Signal>> {
        self.runtime.lookup_signal(handle)
    }

    /// Drop one handle reference of a signal
    pub fn destroy_signal(&self, handle: SignalHandle) -> Result<()> {
        self.convert(handle).ok_or(Error::InvalidSignal)?.destroy()
    }

    /// Add a handle reference to a signal
    pub fn duplicate_signal_handle(&self, handle: SignalHandle) -> Result<()> {
        self.convert(handle).ok_or(Error::InvalidSignal)?.duplicate()
    }

    /// Handle under which an IPC signal can be opened elsewhere
    pub fn ipc_handle(&self, signal: &Signal) -> Result<SignalHandle> {
        if !signal.is_ipc() || !signal.is_valid() {
            return Err(Error::InvalidSignal);
        }
        Ok(signal.handle())
    }

    /// Attach to an IPC signal exported by another pool
    pub fn open_ipc_signal(&self, handle: SignalHandle) -> Result<Arc<Signal>> {
        self.runtime.open_ipc_signal(handle)
    }

    /// Resolve an IPC signal and add a handle reference to it
    pub fn duplicate_ipc(&self, handle: SignalHandle) -> Result<Arc<Signal>> {
        self.runtime.duplicate_ipc(handle)
    }

    /// Resolve an IPC signal
    pub fn lookup_ipc(&self, handle: SignalHandle) -> Option<Arc<Signal>> {
        self.runtime.lookup_ipc(handle)
    }

    /// Wait until one of `signals` satisfies its condition
    ///
    /// Returns the index and observed value, or `None` on timeout or when a
    /// signal became invalid.
    pub fn wait_any_signal(
        &self,
        signals: &[Arc<Signal>],
        conditions: &[SignalCondition],
        values: &[SignalValue],
        timeout: u64,
        hint: WaitState,
    ) -> Result<Option<(usize, SignalValue)>> {
        wait_any::wait_any_signal(&self.runtime, signals, conditions, values, timeout, hint)
    }

    // =========================================================================
    // Signal groups
    // =========================================================================

    /// Group existing signals for repeated multi-waits
    pub fn create_signal_group(&self, signals: &[SignalHandle]) -> Result<SignalGroupHandle> {
        if signals.is_empty() {
            return Err(Error::InvalidArgument);
        }
        let members = signals
            .iter()
            .map(|&handle| self.convert(handle).ok_or(Error::InvalidSignal))
            .collect::<Result<Vec<_>>>()?;

        let handle = SignalGroupHandle::from_raw(self.next_group.fetch_add(1, Ordering::Relaxed));
        self.groups.write().insert(handle.raw(), members.into());
        Ok(handle)
    }

    /// Forget a signal group; its signals stay alive
    pub fn destroy_signal_group(&self, group: SignalGroupHandle) -> Result<()> {
        self.groups
            .write()
            .remove(&group.raw())
            .map(drop)
            .ok_or(Error::InvalidHandle)
    }

    /// [`StreamPool::wait_any_signal`] over a group
    pub fn wait_any_group(
        &self,
        group: SignalGroupHandle,
        conditions: &[SignalCondition],
        values: &[SignalValue],
        timeout: u64,
        hint: WaitState,
    ) -> Result<Option<(usize, SignalValue)>> {
        let members = self
            .groups
            .read()
            .get(&group.raw())
            .cloned()
            .ok_or(Error::InvalidHandle)?;
        self.wait_any_signal(&members, conditions, values, timeout, hint)
    }

    // =========================================================================
    // Async handlers
    // =========================================================================

    /// Run `handler` whenever `signal` satisfies `condition` against `value`
    pub fn set_async_signal_handler(
        &self,
        signal: &Arc<Signal>,
        condition: SignalCondition,
        value: SignalValue,
        handler: AsyncHandler,
    ) -> Result<()> {
        self.runtime.events().set_async_signal_handler(
            &self.runtime,
            Some(Arc::clone(signal)),
            condition,
            value,
            handler,
        )
    }

    /// Run `f` once on the async dispatcher thread
    pub fn run_async<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut f = Some(f);
        self.runtime.events().set_async_signal_handler(
            &self.runtime,
            None,
            SignalCondition::Eq,
            0,
            Box::new(move |_| {
                if let Some(f) = f.take() {
                    f();
                }
                false
            }),
        )
    }

    // =========================================================================
    // Queues
    // =========================================================================

    /// Create a queue
    ///
    /// With an agent the queue is device-backed; without one it is a software
    /// queue with a fresh doorbell signal. A cooperative request returns the
    /// agent's shared cooperative queue, creating it on first use.
    pub fn create_queue(&self, agent: Option<AgentId>, request: QueueRequest) -> Result<Arc<Queue>> {
        if request.size == 0 || !request.size.is_power_of_two() {
            return Err(Error::InvalidArgument);
        }

        let Some(agent) = agent else {
            self.check_queue_limit()?;
            let doorbell = self.create_signal(0, &[], SignalAttributes::empty())?;
            let queue = SoftQueue::new(
                &self.runtime,
                request.size,
                request.features,
                Arc::clone(&doorbell),
                true,
                request.callback,
            );
            let queue = match queue {
                Ok(queue) => queue,
                Err(err) => {
                    let _ = doorbell.destroy();
                    return Err(err);
                },
            };
            return Ok(self.register_queue(Queue::Software(queue)));
        };

        let info = self.agent_info(agent)?;
        if request.queue_type != QueueType::Cooperative {
            self.check_queue_limit()?;
            let queue = HardQueue::new(&self.runtime, &info, &request)?;
            return Ok(self.register_queue(Queue::Hardware(queue)));
        }

        let mut cooperative = self.cooperative.lock();
        if let Some((queue, shares)) = cooperative.get_mut(&agent) {
            *shares += 1;
            return Ok(Arc::clone(queue));
        }
        self.check_queue_limit()?;
        let queue = self.register_queue(Queue::Hardware(HardQueue::new(&self.runtime, &info, &request)?));
        cooperative.insert(agent, (Arc::clone(&queue), 1));
        Ok(queue)
    }

    fn agent_info(&self, agent: AgentId) -> Result<AgentInfo> {
        let info = self
            .runtime
            .device()
            .agent(agent)
            .cloned()
            .ok_or(Error::InvalidArgument)?;
        if info.is_cpu() {
            return Err(Error::InvalidQueueCreation);
        }
        Ok(info)
    }

    fn check_queue_limit(&self) -> Result<()> {
        let max = self.runtime.flags().max_queues;
        if max != 0 && self.live_queues() >= max {
            return Err(Error::OutOfResources);
        }
        Ok(())
    }

    fn register_queue(&self, queue: Queue) -> Arc<Queue> {
        let queue = Arc::new(queue);
        self.queues.write().insert(queue.handle().raw(), Arc::clone(&queue));
        queue
    }

    /// Resolve a queue handle
    pub fn queue(&self, handle: QueueHandle) -> Option<Arc<Queue>> {
        self.queues.read().get(&handle.raw()).cloned()
    }

    /// Queues currently registered
    pub fn live_queues(&self) -> usize {
        self.queues.read().len()
    }

    /// Destroy a queue
    ///
    /// A cooperative queue only loses one share until the last one goes.
    pub fn destroy_queue(&self, handle: QueueHandle) -> Result<()> {
        let queue = self.queue(handle).ok_or(Error::InvalidQueue)?;

        if let Some(agent) = queue.agent() {
            let mut cooperative = self.cooperative.lock();
            let shared = cooperative
                .get(&agent)
                .is_some_and(|(q, _)| Arc::ptr_eq(q, &queue));
            if shared {
                if let Some((_, shares)) = cooperative.get_mut(&agent) {
                    *shares -= 1;
                    if *shares != 0 {
                        return Ok(());
                    }
                }
                cooperative.remove(&agent);
            }
        }

        if self.pooled.lock().remove(&handle.raw()).is_some() {
            log::warn!("stream pool: queue {:?} destroyed while still pooled", handle);
        }

        let removed = self.queues.write().remove(&handle.raw());
        queue.destroy();
        drop(removed);
        Ok(())
    }

    /// Take an idle pooled queue of `agent`, creating one if none is idle
    ///
    /// A new queue gets the largest size the agent supports, bounded by
    /// `size_hint`.
    pub fn acquire_queue(&self, agent: AgentId, size_hint: u32) -> Result<Arc<Queue>> {
        let mut pooled = self.pooled.lock();
        let idle = pooled
            .iter_mut()
            .find(|(_, entry)| entry.agent == agent && entry.ref_count == 0);
        if let Some((&raw, entry)) = idle {
            if let Some(queue) = self.queue(QueueHandle::from_raw(raw)) {
                entry.ref_count += 1;
                return Ok(queue);
            }
        }

        let info = self.agent_info(agent)?;
        let size = info.queue_max_packets.min(size_hint);
        let queue = self.create_queue(Some(agent), QueueRequest::new(size))?;
        pooled.insert(
            queue.handle().raw(),
            PooledQueue {
                agent,
                ref_count: 1,
                hostcall: None,
            },
        );
        Ok(queue)
    }

    /// Drop a reference taken with [`StreamPool::acquire_queue`]
    ///
    /// The last reference destroys the queue and its hostcall buffer.
    pub fn release_queue(&self, handle: QueueHandle) -> Result<()> {
        let mut pooled = self.pooled.lock();
        let entry = pooled.get_mut(&handle.raw()).ok_or(Error::InvalidQueue)?;
        entry.ref_count -= 1;
        if entry.ref_count != 0 {
            return Ok(());
        }
        let entry = pooled.remove(&handle.raw());
        drop(pooled);

        if entry.is_some_and(|e| e.hostcall.is_some()) {
            log::debug!("stream pool: freed hostcall buffer of {:?}", handle);
        }
        self.destroy_queue(handle)
    }

    /// Reference count of a pooled queue
    pub fn pooled_ref_count(&self, handle: QueueHandle) -> Option<u32> {
        self.pooled.lock().get(&handle.raw()).map(|e| e.ref_count)
    }

    /// Address of the hostcall buffer of a pooled queue, allocated on first use
    ///
    /// The buffer holds one packet per hardware wave the agent can run.
    pub fn get_or_create_hostcall_buffer(&self, handle: QueueHandle) -> Result<u64> {
        let mut pooled = self.pooled.lock();
        let entry = pooled.get_mut(&handle.raw()).ok_or(Error::InvalidQueue)?;
        if let Some(buffer) = &entry.hostcall {
            return Ok(buffer.address());
        }

        let info = self.agent_info(entry.agent)?;
        let packets = (info.compute_units as usize)
            .checked_mul(info.waves_per_cu as usize)
            .ok_or(Error::OutOfResources)?;
        let bytes = packets
            .checked_mul(HOSTCALL_PACKET_BYTES)
            .and_then(|b| b.checked_add(HOSTCALL_HEADER_BYTES))
            .ok_or(Error::OutOfResources)?;
        let buffer = self
            .runtime
            .device()
            .allocate_system_memory(bytes, HOSTCALL_ALIGN)
            .map_err(|err| {
                log::error!("stream pool: no hostcall buffer for {:?}: {}", handle, err);
                Error::from(err)
            })?;

        log::debug!(
            "stream pool: hostcall buffer {:#x} ({} packets) for {:?}",
            buffer.address(),
            packets,
            handle
        );
        let address = buffer.address();
        entry.hostcall = Some(buffer);
        Ok(address)
    }
}

impl Drop for StreamPool {
    fn drop(&mut self) {
        self.runtime.events().shutdown();

        self.groups.get_mut().clear();
        self.cooperative.get_mut().clear();
        self.pooled.get_mut().clear();
        for (_, queue) in self.queues.get_mut().drain() {
            queue.destroy();
        }
        self.runtime.clear_tables();
    }
}

impl fmt::Debug for StreamPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamPool")
            .field("runtime", &self.runtime)
            .field("queues", &self.live_queues())
            .field("groups", &self.groups.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueOps;
    use crate::signal::{SignalOps, SignalVariant};
    use crate::time::WAIT_FOREVER;
    use crate::types::QueueFeatures;
    use helix_stream_hal::HostDevice;
    use std::sync::mpsc;
    use std::time::Duration;

    const GPU: AgentId = AgentId(1);
    const CPU: AgentId = AgentId(0);

    fn pool() -> StreamPool {
        StreamPool::new(Arc::new(HostDevice::default()), RuntimeFlags::default())
    }

    #[test]
    fn test_queue_size_validation() {
        let pool = pool();
        assert_eq!(pool.create_queue(Some(GPU), QueueRequest::new(100)).unwrap_err(), Error::InvalidArgument);
        assert_eq!(pool.create_queue(None, QueueRequest::new(0)).unwrap_err(), Error::InvalidArgument);

        let queue = pool.create_queue(Some(GPU), QueueRequest::new(4)).unwrap();
        assert_eq!(queue.size(), helix_stream_hal::MIN_QUEUE_PACKETS);
        assert!(queue.is_hardware());
    }

    #[test]
    fn test_queue_agent_checks() {
        let pool = pool();
        assert_eq!(pool.create_queue(Some(CPU), QueueRequest::new(64)).unwrap_err(), Error::InvalidQueueCreation);
        assert_eq!(pool.create_queue(Some(AgentId(7)), QueueRequest::new(64)).unwrap_err(), Error::InvalidArgument);
    }

    #[test]
    fn test_soft_queue_owns_doorbell() {
        let pool = pool();
        let queue = pool.create_queue(None, QueueRequest::new(16)).unwrap();
        assert!(!queue.is_hardware());
        assert_eq!(queue.doorbell().variant(), SignalVariant::Interrupt);

        queue.store_read_index_release(0);
        let doorbell = Arc::clone(queue.doorbell());
        pool.destroy_queue(queue.handle()).unwrap();
        assert!(!doorbell.is_valid());
        assert!(pool.queue(queue.handle()).is_none());
        assert_eq!(pool.destroy_queue(queue.handle()), Err(Error::InvalidQueue));
    }

    #[test]
    fn test_queue_limit() {
        let flags = RuntimeFlags::default().with_max_queues(1);
        let pool = StreamPool::new(Arc::new(HostDevice::default()), flags);
        let first = pool.create_queue(Some(GPU), QueueRequest::new(64)).unwrap();
        assert_eq!(pool.create_queue(None, QueueRequest::new(64)).unwrap_err(), Error::OutOfResources);
        pool.destroy_queue(first.handle()).unwrap();
        pool.create_queue(None, QueueRequest::new(64)).unwrap();
    }

    #[test]
    fn test_cooperative_queue_shared() {
        let pool = pool();
        let request = QueueRequest::new(64).with_type(QueueType::Cooperative);
        let a = pool.create_queue(Some(GPU), request.clone()).unwrap();
        let b = pool.create_queue(Some(GPU), request).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.live_queues(), 1);

        pool.destroy_queue(a.handle()).unwrap();
        assert!(pool.queue(a.handle()).is_some());
        pool.destroy_queue(b.handle()).unwrap();
        assert!(pool.queue(a.handle()).is_none());
    }

    #[test]
    fn test_acquire_release_queue() {
        let pool = pool();
        let a = pool.acquire_queue(GPU, 256).unwrap();
        assert_eq!(a.size(), 256);
        let b = pool.acquire_queue(GPU, 256).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(pool.pooled_ref_count(a.handle()), Some(1));
        assert_eq!(pool.pooled_ref_count(b.handle()), Some(1));
        assert_eq!(pool.live_queues(), 2);

        let buffer = pool.get_or_create_hostcall_buffer(a.handle()).unwrap();
        assert_eq!(buffer % HOSTCALL_ALIGN as u64, 0);
        assert_eq!(pool.get_or_create_hostcall_buffer(a.handle()).unwrap(), buffer);

        pool.release_queue(b.handle()).unwrap();
        assert!(pool.queue(b.handle()).is_none());
        assert!(pool.queue(a.handle()).is_some());
        pool.release_queue(a.handle()).unwrap();
        assert!(pool.queue(a.handle()).is_none());
        assert_eq!(pool.release_queue(a.handle()), Err(Error::InvalidQueue));
        assert_eq!(pool.get_or_create_hostcall_buffer(a.handle()), Err(Error::InvalidQueue));
    }

    #[test]
    fn test_hostcall_buffer_size_overflow() {
        let gpu = AgentInfo::gpu(GPU.0).with_waves(u32::MAX, u32::MAX);
        let device = Arc::new(HostDevice::new(vec![AgentInfo::cpu(CPU.0), gpu]));
        let pool = StreamPool::new(device, RuntimeFlags::default());
        let queue = pool.acquire_queue(GPU, 64).unwrap();
        assert_eq!(pool.get_or_create_hostcall_buffer(queue.handle()), Err(Error::OutOfResources));
        pool.release_queue(queue.handle()).unwrap();
    }

    #[test]
    fn test_signal_handles() {
        let pool = pool();
        let signal = pool.create_signal(3, &[], SignalAttributes::empty()).unwrap();
        let handle = signal.handle();
        assert!(Arc::ptr_eq(&pool.convert(handle).unwrap(), &signal));

        pool.duplicate_signal_handle(handle).unwrap();
        pool.destroy_signal(handle).unwrap();
        assert!(signal.is_valid());
        pool.destroy_signal(handle).unwrap();
        assert!(pool.convert(handle).is_none());
        assert_eq!(pool.destroy_signal(handle), Err(Error::InvalidSignal));
        assert_eq!(pool.ipc_handle(&signal), Err(Error::InvalidSignal));
    }

    #[test]
    fn test_signal_group_wait() {
        let pool = pool();
        let a = pool.create_signal(0, &[], SignalAttributes::empty()).unwrap();
        let b = pool.create_signal(0, &[], SignalAttributes::empty()).unwrap();
        let group = pool.create_signal_group(&[a.handle(), b.handle()]).unwrap();

        let writer = {
            let b = Arc::clone(&b);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(2));
                b.store_release(10);
            })
        };
        let hit = pool
            .wait_any_group(group, &[SignalCondition::Eq, SignalCondition::Gte], &[1, 10], WAIT_FOREVER, WaitState::Blocked)
            .unwrap();
        writer.join().unwrap();
        assert_eq!(hit, Some((1, 10)));

        pool.destroy_signal_group(group).unwrap();
        assert_eq!(pool.destroy_signal_group(group), Err(Error::InvalidHandle));
        assert!(pool.create_signal_group(&[]).is_err());
        assert!(a.is_valid());
    }

    #[test]
    fn test_ipc_between_pools() {
        let blocks = SharedSignalPool::new();
        let device: Arc<dyn Device> = Arc::new(HostDevice::default());
        let exporter = StreamPool::with_shared_signal_pool(Arc::clone(&device), RuntimeFlags::default(), Arc::clone(&blocks));
        let importer = StreamPool::with_shared_signal_pool(device, RuntimeFlags::default(), Arc::clone(&blocks));

        let signal = exporter.create_signal(0, &[], SignalAttributes::IPC).unwrap();
        let handle = exporter.ipc_handle(&signal).unwrap();
        let remote = importer.open_ipc_signal(handle).unwrap();
        assert!(remote.is_ipc());

        let waiter = {
            let signal = Arc::clone(&signal);
            std::thread::spawn(move || signal.wait_acquire(SignalCondition::Eq, 9, WAIT_FOREVER, WaitState::Blocked))
        };
        remote.store_release(9);
        assert_eq!(waiter.join().unwrap(), 9);

        let dup = exporter.duplicate_ipc(handle).unwrap();
        dup.destroy().unwrap();
        exporter.destroy_signal(handle).unwrap();
        assert!(exporter.lookup_ipc(handle).is_none());
        assert_eq!(importer.convert(remote.handle()).unwrap().load_relaxed(), 9);
        importer.destroy_signal(remote.handle()).unwrap();
        assert_eq!(blocks.live(), 0);
    }

    #[test]
    fn test_async_handler_and_deferred_call() {
        let pool = pool();
        let signal = pool.create_signal(0, &[], SignalAttributes::empty()).unwrap();
        let (tx, rx) = mpsc::channel();

        let fired = tx.clone();
        pool.set_async_signal_handler(
            &signal,
            SignalCondition::Eq,
            2,
            Box::new(move |value| {
                fired.send(value).unwrap();
                false
            }),
        )
        .unwrap();
        pool.run_async(move || tx.send(-1).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), -1);

        signal.store_release(2);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
    }

    #[test]
    fn test_drop_tears_down() {
        let device = Arc::new(HostDevice::default());
        let pool = StreamPool::new(device.clone(), RuntimeFlags::default());
        pool.create_queue(Some(GPU), QueueRequest::new(64)).unwrap();
        pool.acquire_queue(GPU, 64).unwrap();
        pool.run_async(|| {}).unwrap();
        drop(pool);
        assert_eq!(device.queue_count(), 0);
    }

    #[test]
    fn test_queue_features_recorded() {
        let pool = pool();
        let queue = pool
            .create_queue(None, QueueRequest::new(8).with_features(QueueFeatures::KERNEL_DISPATCH))
            .unwrap();
        assert_eq!(queue.shared().features.load(Ordering::Relaxed), QueueFeatures::KERNEL_DISPATCH.bits());
    }
}
