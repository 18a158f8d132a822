//! # Runtime Context
//!
//! Everything process-wide lives here and is handed to every signal and
//! queue by shared ownership: the device backend, configuration flags, the
//! shared block pools, the signal and IPC tables, the OS event pool and the
//! queue id counters.
//!
//! Two runtimes built over one [`SharedSignalPool`] behave like two
//! processes sharing IPC memory: each keeps its own tables and wrappers,
//! and the shared block's attach count decides when the block is freed.

use core::sync::atomic::{AtomicU64, Ordering};
use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use helix_stream_hal::{Device, EventKind};

use crate::abi::{SharedQueue, SharedSignal, SignalKind};
use crate::config::RuntimeFlags;
use crate::error::{Error, Result};
use crate::event_pool::EventPool;
use crate::pool::BlockPool;
use crate::rollback::Rollback;
use crate::signal::{InterruptEvent, Signal, Variant};
use crate::time::Clock;
use crate::types::{AgentId, SignalAttributes, SignalHandle, SignalValue};

/// Pool of signal blocks, shareable between runtimes
pub type SharedSignalPool = BlockPool<SharedSignal>;

/// First id handed to software queues; hardware queues count up from zero
const SOFT_QUEUE_ID_BASE: u64 = 0x8000_0000;

/// Process-wide state shared by all signals and queues
pub struct Runtime {
    device: Arc<dyn Device>,
    flags: RuntimeFlags,
    clock: Clock,
    signal_blocks: Arc<SharedSignalPool>,
    queue_blocks: Arc<BlockPool<SharedQueue>>,
    signals: spin::RwLock<HashMap<u64, Arc<Signal>>>,
    ipc: spin::Mutex<HashMap<u64, Arc<Signal>>>,
    events: EventPool,
    next_queue_id: AtomicU64,
    next_soft_queue_id: AtomicU64,
}

impl Runtime {
    /// Create a runtime with private block pools
    pub fn new(device: Arc<dyn Device>, flags: RuntimeFlags) -> Arc<Self> {
        Self::with_signal_blocks(device, flags, SharedSignalPool::new())
    }

    /// Create a runtime whose signal blocks come from `signal_blocks`
    pub fn with_signal_blocks(
        device: Arc<dyn Device>,
        flags: RuntimeFlags,
        signal_blocks: Arc<SharedSignalPool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            events: EventPool::new(Arc::clone(&device)),
            device,
            flags,
            clock: Clock::default(),
            signal_blocks,
            queue_blocks: BlockPool::new(),
            signals: spin::RwLock::new(HashMap::new()),
            ipc: spin::Mutex::new(HashMap::new()),
            next_queue_id: AtomicU64::new(0),
            next_soft_queue_id: AtomicU64::new(SOFT_QUEUE_ID_BASE),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Device backend
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Configuration flags
    pub fn flags(&self) -> &RuntimeFlags {
        &self.flags
    }

    /// Timeout clock
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// OS event pool and async dispatcher
    pub fn events(&self) -> &EventPool {
        &self.events
    }

    /// Signal block pool
    pub fn signal_blocks(&self) -> &Arc<SharedSignalPool> {
        &self.signal_blocks
    }

    /// Queue block pool
    pub fn queue_blocks(&self) -> &Arc<BlockPool<SharedQueue>> {
        &self.queue_blocks
    }

    pub(crate) fn next_queue_id(&self) -> u64 {
        self.next_queue_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_soft_queue_id(&self) -> u64 {
        self.next_soft_queue_id.fetch_add(1, Ordering::Relaxed)
    }

    // =========================================================================
    // Signal creation
    // =========================================================================

    /// Create a signal
    ///
    /// IPC, GPU-only, or a runtime without interrupt support give a busy-wait
    /// signal. Otherwise the signal is interrupt-backed when no CPU agent is
    /// among `consumers` (an empty list means any consumer). An exhausted
    /// event pool silently degrades the interrupt signal to polling.
    pub fn create_signal(
        self: &Arc<Self>,
        initial: SignalValue,
        consumers: &[AgentId],
        attributes: SignalAttributes,
    ) -> Result<Arc<Signal>> {
        for (i, consumer) in consumers.iter().enumerate() {
            if self.device.agent(*consumer).is_none() || consumers[..i].contains(consumer) {
                return Err(Error::InvalidArgument);
            }
        }

        let ipc = attributes.contains(SignalAttributes::IPC);
        let interrupt = self.flags.enable_interrupt
            && !attributes.intersects(SignalAttributes::IPC | SignalAttributes::GPU_ONLY)
            && consumers
                .iter()
                .all(|c| self.device.agent(*c).is_some_and(|agent| !agent.is_cpu()));

        let block = Signal::new_block(self, SignalKind::User, initial)?;
        if ipc {
            block.mark_ipc();
        }

        let variant = if interrupt {
            let event = self.events.alloc();
            if let Some(event) = &event {
                block.event_mailbox_ptr.store(event.mailbox(), Ordering::Relaxed);
                block.event_id.store(event.id().0, Ordering::Relaxed);
            }
            Variant::Interrupt(InterruptEvent::new(event))
        } else {
            Variant::BusyWait
        };

        let signal = Signal::build(self, block, variant, ipc);
        self.register_signal(&signal);
        if ipc {
            self.register_ipc(&signal);
        }

        log::debug!("runtime: created {:?}", signal);
        Ok(signal)
    }

    /// Create a signal backed by a memory-fault event
    ///
    /// The device raises the event and records a fault code on it. Waiting on
    /// several signals returns this one as soon as the fault is fatal.
    pub fn create_fault_signal(self: &Arc<Self>) -> Result<Arc<Signal>> {
        let mut rollback = Rollback::new();
        let event = self.events.create_event(EventKind::Memory, true)?;
        let created = Arc::clone(&event);
        rollback.push("destroy fault event", move || self.events.destroy_event(&created));

        let block = Signal::new_block(self, SignalKind::User, 0)?;
        block.event_mailbox_ptr.store(event.mailbox(), Ordering::Relaxed);
        block.event_id.store(event.id().0, Ordering::Relaxed);
        rollback.commit();

        let signal = Signal::build(self, block, Variant::Interrupt(InterruptEvent::owned(event)), false);
        self.register_signal(&signal);
        Ok(signal)
    }

    /// Attach to an IPC signal created by another runtime sharing the block pool
    ///
    /// A handle already known locally yields a duplicate of the local wrapper.
    pub fn open_ipc_signal(self: &Arc<Self>, handle: SignalHandle) -> Result<Arc<Signal>> {
        let mut table = self.ipc.lock();
        if let Some(signal) = table.get(&handle.raw()) {
            signal.duplicate()?;
            return Ok(Arc::clone(signal));
        }

        let block = self
            .signal_blocks
            .lookup(handle.raw())
            .ok_or(Error::InvalidSignal)?;
        if !block.is_ipc() || block.kind() != SignalKind::User || !block.try_attach() {
            return Err(Error::InvalidSignal);
        }

        let signal = Signal::build(self, block, Variant::BusyWait, true);
        table.insert(handle.raw(), Arc::clone(&signal));
        drop(table);
        self.register_signal(&signal);

        log::debug!("runtime: attached IPC {:?}", signal);
        Ok(signal)
    }

    // =========================================================================
    // Signal table
    // =========================================================================

    pub(crate) fn register_signal(&self, signal: &Arc<Signal>) {
        self.signals
            .write()
            .insert(signal.handle().raw(), Arc::clone(signal));
    }

    pub(crate) fn forget_signal(&self, signal: &Signal) {
        let removed = self.signals.write().remove(&signal.handle().raw());
        drop(removed);
    }

    /// Resolve a live signal
    pub fn lookup_signal(&self, handle: SignalHandle) -> Option<Arc<Signal>> {
        self.signals.read().get(&handle.raw()).cloned()
    }

    /// Signals currently registered
    pub fn live_signals(&self) -> usize {
        self.signals.read().len()
    }

    // =========================================================================
    // IPC table
    // =========================================================================

    pub(crate) fn register_ipc(&self, signal: &Arc<Signal>) {
        self.ipc.lock().insert(signal.handle().raw(), Arc::clone(signal));
    }

    /// Remove a dead IPC signal, returning whether it was listed
    ///
    /// Refuses while a handle reference is still alive.
    pub(crate) fn deregister_ipc(&self, signal: &Signal) -> bool {
        let mut table = self.ipc.lock();
        if signal.ref_counts().0 != 0 {
            return false;
        }
        let removed = table.remove(&signal.handle().raw());
        drop(table);
        removed.is_some()
    }

    /// Resolve an IPC signal without taking a reference
    pub fn lookup_ipc(&self, handle: SignalHandle) -> Option<Arc<Signal>> {
        self.ipc.lock().get(&handle.raw()).cloned()
    }

    /// Resolve an IPC signal and add a handle reference to it
    ///
    /// The reference is taken under the table lock so a concurrent final
    /// destroy cannot free the wrapper in between.
    pub fn duplicate_ipc(&self, handle: SignalHandle) -> Result<Arc<Signal>> {
        let table = self.ipc.lock();
        let signal = table.get(&handle.raw()).ok_or(Error::InvalidSignal)?;
        signal.duplicate()?;
        Ok(Arc::clone(signal))
    }

    /// Drop every table entry, breaking wrapper/runtime reference cycles
    pub(crate) fn clear_tables(&self) {
        let ipc = core::mem::take(&mut *self.ipc.lock());
        let signals = core::mem::take(&mut *self.signals.write());
        if !signals.is_empty() {
            log::warn!("runtime: {} signals still alive at teardown", signals.len());
        }
        drop(ipc);
        drop(signals);
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("device", &self.device)
            .field("flags", &self.flags)
            .field("signals", &self.live_signals())
            .field("ipc", &self.ipc.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{SignalOps, SignalVariant};
    use helix_stream_hal::HostDevice;

    fn runtime(flags: RuntimeFlags) -> Arc<Runtime> {
        Runtime::new(Arc::new(HostDevice::default()), flags)
    }

    #[test]
    fn test_create_signal_policy() {
        let rt = runtime(RuntimeFlags::default());
        let gpu = AgentId(1);
        let cpu = AgentId(0);

        let any = rt.create_signal(0, &[], SignalAttributes::empty()).unwrap();
        assert_eq!(any.variant(), SignalVariant::Interrupt);
        assert!(any.eop_event().is_some());

        let gpu_only = rt.create_signal(0, &[gpu], SignalAttributes::empty()).unwrap();
        assert_eq!(gpu_only.variant(), SignalVariant::Interrupt);

        let mixed = rt.create_signal(0, &[gpu, cpu], SignalAttributes::empty()).unwrap();
        assert_eq!(mixed.variant(), SignalVariant::BusyWait);

        let ipc = rt.create_signal(0, &[], SignalAttributes::IPC).unwrap();
        assert_eq!(ipc.variant(), SignalVariant::BusyWait);
        assert!(ipc.shared().is_ipc());

        let flagged = rt.create_signal(0, &[], SignalAttributes::GPU_ONLY).unwrap();
        assert_eq!(flagged.variant(), SignalVariant::BusyWait);

        for signal in [any, gpu_only, mixed, ipc, flagged] {
            signal.destroy().unwrap();
        }
        assert_eq!(rt.live_signals(), 0);
        assert_eq!(rt.signal_blocks().live(), 0);
    }

    #[test]
    fn test_interrupts_disabled() {
        let rt = runtime(RuntimeFlags::default().with_interrupts(false));
        let signal = rt.create_signal(3, &[], SignalAttributes::empty()).unwrap();
        assert_eq!(signal.variant(), SignalVariant::BusyWait);
        assert_eq!(signal.load_relaxed(), 3);
        signal.destroy().unwrap();
    }

    #[test]
    fn test_bad_consumers() {
        let rt = runtime(RuntimeFlags::default());
        let err = rt.create_signal(0, &[AgentId(9)], SignalAttributes::empty());
        assert_eq!(err.unwrap_err(), Error::InvalidArgument);
        let err = rt.create_signal(0, &[AgentId(1), AgentId(1)], SignalAttributes::empty());
        assert_eq!(err.unwrap_err(), Error::InvalidArgument);
        assert_eq!(rt.signal_blocks().live(), 0);
    }

    #[test]
    fn test_event_exhaustion_degrades_to_polling() {
        let device = Arc::new(HostDevice::default().with_event_limit(0));
        let rt = Runtime::new(device, RuntimeFlags::default());
        let signal = rt.create_signal(0, &[], SignalAttributes::empty()).unwrap();
        assert_eq!(signal.variant(), SignalVariant::Interrupt);
        assert!(signal.eop_event().is_none());
        signal.store_release(4);
        assert_eq!(signal.load_acquire(), 4);
        signal.destroy().unwrap();
    }

    #[test]
    fn test_ipc_duplicate_shares_block() {
        let rt = runtime(RuntimeFlags::default());
        let signal = rt.create_signal(0, &[], SignalAttributes::IPC).unwrap();
        let handle = signal.handle();

        let dup = rt.duplicate_ipc(handle).unwrap();
        assert!(Arc::ptr_eq(&dup, &signal));
        assert_eq!(signal.ref_counts(), (2, 2));

        dup.store_release(11);
        assert_eq!(signal.load_acquire(), 11);

        signal.destroy().unwrap();
        assert!(rt.lookup_ipc(handle).is_some());
        dup.destroy().unwrap();
        assert!(rt.lookup_ipc(handle).is_none());
        assert!(rt.duplicate_ipc(handle).is_err());
    }

    #[test]
    fn test_ipc_across_runtimes() {
        let blocks = SharedSignalPool::new();
        let device: Arc<dyn Device> = Arc::new(HostDevice::default());
        let a = Runtime::with_signal_blocks(Arc::clone(&device), RuntimeFlags::default(), Arc::clone(&blocks));
        let b = Runtime::with_signal_blocks(device, RuntimeFlags::default(), Arc::clone(&blocks));

        let plain = a.create_signal(0, &[], SignalAttributes::empty()).unwrap();
        assert_eq!(b.open_ipc_signal(plain.handle()).unwrap_err(), Error::InvalidSignal);

        let origin = a.create_signal(1, &[], SignalAttributes::IPC).unwrap();
        let remote = b.open_ipc_signal(origin.handle()).unwrap();
        assert!(!Arc::ptr_eq(&origin, &remote));
        assert_eq!(remote.load_relaxed(), 1);

        remote.store_release(2);
        assert_eq!(origin.load_acquire(), 2);

        origin.destroy().unwrap();
        assert_eq!(blocks.live(), 2);
        assert_eq!(remote.load_acquire(), 2);
        remote.destroy().unwrap();
        assert_eq!(blocks.live(), 1);

        plain.destroy().unwrap();
        assert_eq!(blocks.live(), 0);
    }
}
