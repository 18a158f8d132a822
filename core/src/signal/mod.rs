//! # Signals
//!
//! A signal wraps one value in a shared [`SharedSignal`] block and exposes
//! the full operation matrix of [`SignalOps`]: loads, stores, bitwise and
//! arithmetic read-modify-writes, exchange and compare-and-swap at the four
//! memory orderings, and waits on a [`SignalCondition`].
//!
//! Three variants share that surface:
//!
//! | Variant | Waits | Notifies |
//! |---------|-------|----------|
//! | [`SignalVariant::BusyWait`] | spin, then sleep in small steps | nothing |
//! | [`SignalVariant::Interrupt`] | spin, then block on an OS event | sets the event when someone waits |
//! | [`SignalVariant::Doorbell`] | illegal | rings the queue doorbell |
//!
//! A wait may return before its condition holds, but always returns once
//! the condition has held at some instant, when the timeout elapses, or when
//! the signal is destroyed.
//!
//! ## Lifetime
//!
//! Handle references ([`Signal::destroy`]) and retains ([`Signal::retain`],
//! taken by every in-flight wait) are counted separately. The signal stops
//! being valid when the last handle reference goes, and its shared block is
//! returned to the pool only once the last retain is released as well.

use core::sync::atomic::{fence, AtomicU32, Ordering};
use std::fmt;
use std::sync::Arc;

use helix_stream_hal::{DoorbellRegister, OsEvent};

use crate::abi::{SharedSignal, SignalKind};
use crate::error::{Error, Result};
use crate::pool::BlockRef;
use crate::runtime::Runtime;
use crate::types::{
    AgentId, AtomicSignalValue, QueueHandle, RmwOp, SignalCondition, SignalHandle, SignalValue,
    WaitState,
};

mod busy_wait;
mod doorbell;
mod interrupt;
mod refs;

pub(crate) use doorbell::DoorbellTarget;
pub(crate) use interrupt::InterruptEvent;
use refs::RefState;

// =============================================================================
// OPERATION MATRIX
// =============================================================================

macro_rules! with_orderings {
    ($name:ident($($arg:ident: $ty:ty),*) => $method:ident $([$pre:expr])?, $doc:literal) => {
        paste::paste! {
            #[doc = concat!($doc, ", relaxed ordering")]
            fn [<$name _relaxed>](&self, $($arg: $ty),*) -> SignalValue {
                self.$method($($pre,)? $($arg,)* Ordering::Relaxed)
            }

            #[doc = concat!($doc, ", acquire ordering")]
            fn [<$name _acquire>](&self, $($arg: $ty),*) -> SignalValue {
                self.$method($($pre,)? $($arg,)* Ordering::Acquire)
            }

            #[doc = concat!($doc, ", release ordering")]
            fn [<$name _release>](&self, $($arg: $ty),*) -> SignalValue {
                self.$method($($pre,)? $($arg,)* Ordering::Release)
            }

            #[doc = concat!($doc, ", acquire-release ordering")]
            fn [<$name _acq_rel>](&self, $($arg: $ty),*) -> SignalValue {
                self.$method($($pre,)? $($arg,)* Ordering::AcqRel)
            }
        }
    };
}

/// Operations common to every signal variant
pub trait SignalOps {
    /// Read the value
    fn load(&self, order: Ordering) -> SignalValue;

    /// Write the value
    fn store(&self, value: SignalValue, order: Ordering);

    /// Apply a read-modify-write operation, returning the prior value
    fn fetch(&self, op: RmwOp, value: SignalValue, order: Ordering) -> SignalValue;

    /// Replace the value, returning the prior value
    fn exchange(&self, value: SignalValue, order: Ordering) -> SignalValue;

    /// Replace the value if it equals `expected`, returning the prior value
    fn compare_exchange(&self, expected: SignalValue, value: SignalValue, order: Ordering)
        -> SignalValue;

    /// Wait until `condition` holds against `compare` or `timeout` ticks pass
    ///
    /// Returns the last observed value, which callers must treat as advisory.
    fn wait(
        &self,
        condition: SignalCondition,
        compare: SignalValue,
        timeout: u64,
        hint: WaitState,
        order: Ordering,
    ) -> SignalValue;

    /// Read the value, relaxed ordering
    fn load_relaxed(&self) -> SignalValue {
        self.load(Ordering::Relaxed)
    }

    /// Read the value, acquire ordering
    fn load_acquire(&self) -> SignalValue {
        self.load(Ordering::Acquire)
    }

    /// Write the value, relaxed ordering
    fn store_relaxed(&self, value: SignalValue) {
        self.store(value, Ordering::Relaxed);
    }

    /// Write the value, release ordering
    fn store_release(&self, value: SignalValue) {
        self.store(value, Ordering::Release);
    }

    /// Wait without ordering subsequent reads
    fn wait_relaxed(
        &self,
        condition: SignalCondition,
        compare: SignalValue,
        timeout: u64,
        hint: WaitState,
    ) -> SignalValue {
        self.wait(condition, compare, timeout, hint, Ordering::Relaxed)
    }

    /// Wait, then order subsequent reads after the observed value
    fn wait_acquire(
        &self,
        condition: SignalCondition,
        compare: SignalValue,
        timeout: u64,
        hint: WaitState,
    ) -> SignalValue {
        self.wait(condition, compare, timeout, hint, Ordering::Acquire)
    }

    with_orderings!(and(value: SignalValue) => fetch[RmwOp::And], "Bitwise AND");
    with_orderings!(or(value: SignalValue) => fetch[RmwOp::Or], "Bitwise OR");
    with_orderings!(xor(value: SignalValue) => fetch[RmwOp::Xor], "Bitwise XOR");
    with_orderings!(add(value: SignalValue) => fetch[RmwOp::Add], "Wrapping addition");
    with_orderings!(sub(value: SignalValue) => fetch[RmwOp::Sub], "Wrapping subtraction");
    with_orderings!(exch(value: SignalValue) => exchange, "Exchange");
    with_orderings!(cas(expected: SignalValue, value: SignalValue) => compare_exchange, "Compare-and-swap");
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
    match order {
        Ordering::Release => Ordering::Relaxed,
        Ordering::AcqRel => Ordering::Acquire,
        other => other,
    }
}

fn has_acquire(order: Ordering) -> bool {
    matches!(order, Ordering::Acquire | Ordering::AcqRel | Ordering::SeqCst)
}

// =============================================================================
// SIGNAL
// =============================================================================

/// Public tag of a signal variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalVariant {
    /// Pure polling
    BusyWait,
    /// Polling plus OS event
    Interrupt,
    /// Write-only queue doorbell
    Doorbell,
}

pub(crate) enum Variant {
    BusyWait,
    Interrupt(InterruptEvent),
    Doorbell(DoorbellTarget),
}

/// A signal object
pub struct Signal {
    runtime: Arc<Runtime>,
    block: BlockRef<SharedSignal>,
    variant: Variant,
    refs: RefState,
    waiting: AtomicU32,
    ipc: bool,
    async_copy_agent: spin::Mutex<Option<AgentId>>,
}

impl Signal {
    pub(crate) fn build(
        runtime: &Arc<Runtime>,
        block: BlockRef<SharedSignal>,
        variant: Variant,
        ipc: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime: Arc::clone(runtime),
            block,
            variant,
            refs: RefState::new(),
            waiting: AtomicU32::new(0),
            ipc,
            async_copy_agent: spin::Mutex::new(None),
        })
    }

    /// Allocate and initialize a shared block for a new signal
    pub(crate) fn new_block(
        runtime: &Runtime,
        kind: SignalKind,
        initial: SignalValue,
    ) -> Result<BlockRef<SharedSignal>> {
        let block = runtime.signal_blocks().alloc()?;
        block.value.store(initial, Ordering::Relaxed);
        block.attach_count.store(1, Ordering::Relaxed);
        block.set_kind(kind);
        Ok(block)
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Handle of the signal
    pub fn handle(&self) -> SignalHandle {
        SignalHandle::from_raw(self.block.handle())
    }

    /// Variant tag
    pub fn variant(&self) -> SignalVariant {
        match self.variant {
            Variant::BusyWait => SignalVariant::BusyWait,
            Variant::Interrupt(_) => SignalVariant::Interrupt,
            Variant::Doorbell(_) => SignalVariant::Doorbell,
        }
    }

    /// Kind recorded in the shared block, `Invalid` once torn down
    pub fn kind(&self) -> SignalKind {
        self.pinned(|_| self.block.kind()).unwrap_or(SignalKind::Invalid)
    }

    /// Shared block
    pub fn shared(&self) -> &SharedSignal {
        &self.block
    }

    /// Runtime the signal belongs to
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Whether the signal was created for IPC
    pub fn is_ipc(&self) -> bool {
        self.ipc
    }

    /// Whether a handle reference is still alive
    pub fn is_valid(&self) -> bool {
        self.refs.handles() != 0
    }

    /// Threads currently waiting on the signal
    pub fn waiters(&self) -> u32 {
        self.waiting.load(Ordering::Acquire)
    }

    /// OS event interrupt waits block on
    pub fn eop_event(&self) -> Option<&Arc<OsEvent>> {
        match &self.variant {
            Variant::Interrupt(ev) => ev.event(),
            _ => None,
        }
    }

    /// Queue rung by this doorbell
    pub fn queue(&self) -> Option<QueueHandle> {
        match self.variant {
            Variant::Doorbell(_) => Some(QueueHandle::from_raw(self.block.queue.load(Ordering::Relaxed))),
            _ => None,
        }
    }

    /// Register rung by this doorbell
    pub(crate) fn doorbell_register(&self) -> Option<&Arc<DoorbellRegister>> {
        match &self.variant {
            Variant::Doorbell(target) => Some(target.register()),
            _ => None,
        }
    }

    /// Agent performing async copies that complete this signal
    pub fn async_copy_agent(&self) -> Option<AgentId> {
        *self.async_copy_agent.lock()
    }

    /// Associate an async copy agent
    pub fn set_async_copy_agent(&self, agent: Option<AgentId>) {
        *self.async_copy_agent.lock() = agent;
    }

    /// Record dispatch start and end timestamps
    pub fn set_timestamps(&self, start: u64, end: u64) {
        self.pinned(|_| {
            self.block.start_ts.store(start, Ordering::Relaxed);
            self.block.end_ts.store(end, Ordering::Release);
        });
    }

    /// Dispatch start and end timestamps, zero once torn down
    pub fn timestamps(&self) -> (u64, u64) {
        self.pinned(|_| {
            let end = self.block.end_ts.load(Ordering::Acquire);
            (self.block.start_ts.load(Ordering::Relaxed), end)
        })
        .unwrap_or((0, 0))
    }

    // =========================================================================
    // Lifetime
    // =========================================================================

    /// Pin the signal for an in-flight operation
    ///
    /// Returns false once the signal has been torn down.
    pub fn retain(&self) -> bool {
        self.refs.retain()
    }

    /// Drop a retain taken with [`Signal::retain`]
    pub fn release(&self) {
        if self.refs.release() {
            self.finalize();
        }
    }

    /// Current `(handle, retain)` reference counts
    pub fn ref_counts(&self) -> (u32, u32) {
        (self.refs.handles(), self.refs.retains())
    }

    /// Add a handle reference, failing once the signal is invalid
    pub fn duplicate(&self) -> Result<()> {
        self.refs.duplicate().then_some(()).ok_or(Error::InvalidSignal)
    }

    /// Drop one handle reference
    ///
    /// When the last one goes, waiters are woken and observe the signal as
    /// invalid. Doorbells belong to their queue and cannot be destroyed here.
    pub fn destroy(&self) -> Result<()> {
        if let Variant::Doorbell(_) = self.variant {
            panic!("doorbell signal {:?} is destroyed with its queue", self.handle());
        }
        self.destroy_handle()
    }

    pub(crate) fn destroy_handle(&self) -> Result<()> {
        let dropped = self.refs.drop_handle().ok_or(Error::InvalidSignal)?;
        if dropped.invalidated {
            self.notify();
        }
        if dropped.dead {
            self.finalize();
        }
        Ok(())
    }

    fn finalize(&self) {
        log::debug!("signal {:?}: destroyed", self.handle());

        if self.ipc {
            self.runtime.deregister_ipc(self);
        }
        self.runtime.forget_signal(self);
        if let Variant::Interrupt(ev) = &self.variant {
            ev.free(&self.runtime);
        }
        if self.block.detach() {
            self.block.free();
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn value(&self) -> &AtomicSignalValue {
        &self.block.value
    }

    /// Run `f` on the value under a retain
    ///
    /// Returns `None` once the signal is torn down; its block may already
    /// belong to another signal.
    fn pinned<R>(&self, f: impl FnOnce(&AtomicSignalValue) -> R) -> Option<R> {
        if !self.retain() {
            return None;
        }
        let result = f(self.value());
        self.release();
        Some(result)
    }

    /// Register a waiter, returning how many were already waiting
    ///
    /// The fence orders the registration before the caller's next read of
    /// the value; writers fence between their store and reading `waiting`.
    pub(crate) fn add_waiter(&self) -> u32 {
        let prior = self.waiting.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        prior
    }

    pub(crate) fn remove_waiter(&self) {
        self.waiting.fetch_sub(1, Ordering::Release);
    }

    pub(crate) fn illegal_on_doorbell(&self, op: &str) {
        if let Variant::Doorbell(_) = self.variant {
            panic!("{} is illegal on doorbell signal {:?}", op, self.handle());
        }
    }

    /// Wake sleepers after the value changed
    fn notify(&self) {
        if let Variant::Interrupt(ev) = &self.variant {
            ev.notify(self);
        }
    }
}

impl SignalOps for Signal {
    fn load(&self, order: Ordering) -> SignalValue {
        self.illegal_on_doorbell("load");
        self.pinned(|cell| cell.load(load_order(order))).unwrap_or(0)
    }

    fn store(&self, value: SignalValue, order: Ordering) {
        if let Variant::Doorbell(target) = &self.variant {
            if self.is_valid() {
                target.ring(value, order);
            } else {
                log::warn!("doorbell {:?} rung after its queue was destroyed", self.handle());
            }
            return;
        }
        let stored = self.pinned(|cell| {
            cell.store(value, store_order(order));
            self.notify();
        });
        if stored.is_none() {
            log::warn!("store to destroyed signal {:?} dropped", self.handle());
        }
    }

    fn fetch(&self, op: RmwOp, value: SignalValue, order: Ordering) -> SignalValue {
        self.illegal_on_doorbell("read-modify-write");
        self.pinned(|cell| {
            let prior = match op {
                RmwOp::And => cell.fetch_and(value, order),
                RmwOp::Or => cell.fetch_or(value, order),
                RmwOp::Xor => cell.fetch_xor(value, order),
                RmwOp::Add => cell.fetch_add(value, order),
                RmwOp::Sub => cell.fetch_sub(value, order),
            };
            self.notify();
            prior
        })
        .unwrap_or(0)
    }

    fn exchange(&self, value: SignalValue, order: Ordering) -> SignalValue {
        self.illegal_on_doorbell("exchange");
        self.pinned(|cell| {
            let prior = cell.swap(value, order);
            self.notify();
            prior
        })
        .unwrap_or(0)
    }

    fn compare_exchange(&self, expected: SignalValue, value: SignalValue, order: Ordering) -> SignalValue {
        self.illegal_on_doorbell("compare-and-swap");
        self.pinned(|cell| {
            let prior = match cell.compare_exchange(expected, value, order, cas_failure_order(order)) {
                Ok(prior) | Err(prior) => prior,
            };
            self.notify();
            prior
        })
        .unwrap_or(0)
    }

    fn wait(
        &self,
        condition: SignalCondition,
        compare: SignalValue,
        timeout: u64,
        hint: WaitState,
        order: Ordering,
    ) -> SignalValue {
        self.illegal_on_doorbell("wait");
        if !self.retain() {
            return 0;
        }
        let prior_waiters = self.add_waiter();

        let value = match &self.variant {
            Variant::Interrupt(ev) => {
                interrupt::wait(self, ev, prior_waiters, condition, compare, timeout, hint)
            },
            _ => busy_wait::wait(self, condition, compare, timeout, hint),
        };

        self.remove_waiter();
        self.release();
        if has_acquire(order) {
            fence(Ordering::Acquire);
        }
        value
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("handle", &self.handle())
            .field("variant", &self.variant())
            .field("refs", &self.ref_counts())
            .field("ipc", &self.ipc)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeFlags;
    use crate::time::WAIT_FOREVER;
    use crate::types::SignalAttributes;
    use core::sync::atomic::AtomicU64;
    use helix_stream_hal::{DoorbellKind, DoorbellRegister, HostDevice};
    use std::time::Duration;

    fn runtime(interrupts: bool) -> Arc<Runtime> {
        let flags = RuntimeFlags::default().with_interrupts(interrupts);
        Runtime::new(Arc::new(HostDevice::default()), flags)
    }

    fn signal(rt: &Arc<Runtime>, initial: SignalValue) -> Arc<Signal> {
        rt.create_signal(initial, &[], SignalAttributes::empty()).unwrap()
    }

    fn doorbell(rt: &Arc<Runtime>) -> (Arc<Signal>, Arc<DoorbellRegister>) {
        let register = Arc::new(DoorbellRegister::new());
        let queue = rt.queue_blocks().alloc().unwrap();
        let block = Signal::new_block(rt, SignalKind::Doorbell, 0).unwrap();
        let target = DoorbellTarget::new(
            queue,
            Arc::clone(&register),
            DoorbellKind::Hardware,
            rt.flags().machine_model,
        );
        (Signal::build(rt, block, Variant::Doorbell(target), false), register)
    }

    #[test]
    fn test_operation_matrix() {
        let rt = runtime(false);
        let s = signal(&rt, 0b1100);

        assert_eq!(s.and_acquire(0b0110), 0b1100);
        assert_eq!(s.or_release(0b0001), 0b0100);
        assert_eq!(s.xor_acq_rel(0b1111), 0b0101);
        assert_eq!(s.add_relaxed(6), 0b1010);
        assert_eq!(s.sub_acquire(1), 16);
        assert_eq!(s.exch_release(-3), 15);
        assert_eq!(s.load_acquire(), -3);
        s.store_relaxed(SignalValue::MAX);
        assert_eq!(s.add_relaxed(1), SignalValue::MAX);
        assert_eq!(s.load_relaxed(), SignalValue::MIN);

        s.destroy().unwrap();
    }

    #[test]
    fn test_mixed_orderings_normalized() {
        let rt = runtime(false);
        let s = signal(&rt, 1);
        s.store(2, Ordering::AcqRel);
        s.store(3, Ordering::Acquire);
        assert_eq!(s.load(Ordering::Release), 3);
        assert_eq!(s.load(Ordering::AcqRel), 3);
        assert_eq!(s.compare_exchange(3, 4, Ordering::Release), 3);
        assert_eq!(s.load(Ordering::SeqCst), 4);
        s.destroy().unwrap();
    }

    #[test]
    fn test_cas_stale_expected_is_noop() {
        let rt = runtime(true);
        let s = signal(&rt, 5);
        assert_eq!(s.cas_relaxed(5, 9), 5);
        assert_eq!(s.cas_relaxed(5, 12), 9);
        assert_eq!(s.load_relaxed(), 9);
        s.destroy().unwrap();
    }

    #[test]
    fn test_acquire_release_round_trip() {
        for interrupts in [true, false] {
            let rt = runtime(interrupts);
            let s = signal(&rt, 0);
            let data = Arc::new(AtomicU64::new(0));

            let writer = {
                let s = Arc::clone(&s);
                let data = Arc::clone(&data);
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(2));
                    data.store(0xfeed, Ordering::Relaxed);
                    s.store_release(1);
                })
            };

            let value = s.wait_acquire(SignalCondition::Eq, 1, WAIT_FOREVER, WaitState::Blocked);
            assert_eq!(value, 1);
            assert_eq!(data.load(Ordering::Relaxed), 0xfeed);
            writer.join().unwrap();
            s.destroy().unwrap();
        }
    }

    #[test]
    fn test_wait_timeout_returns_last_value() {
        let rt = runtime(true);
        let s = signal(&rt, 7);
        let timeout = rt.clock().ticks(Duration::from_millis(2));
        let value = s.wait_relaxed(SignalCondition::Eq, 0, timeout, WaitState::Blocked);
        assert_eq!(value, 7);
        assert_eq!(s.waiters(), 0);
        assert_eq!(s.ref_counts(), (1, 1));
        s.destroy().unwrap();
    }

    #[test]
    fn test_destroy_while_waiting() {
        for interrupts in [true, false] {
            let rt = runtime(interrupts);
            let s = signal(&rt, 0);

            let waiter = {
                let s = Arc::clone(&s);
                std::thread::spawn(move || {
                    s.wait_relaxed(SignalCondition::Eq, 1, WAIT_FOREVER, WaitState::Blocked)
                })
            };

            while s.waiters() == 0 {
                std::thread::yield_now();
            }
            s.destroy().unwrap();
            assert!(!s.is_valid());

            assert_eq!(waiter.join().unwrap(), 0);
            assert_eq!(s.ref_counts(), (0, 0));
            assert_eq!(rt.signal_blocks().live(), 0);
            assert!(rt.lookup_signal(s.handle()).is_none());
        }
    }

    #[test]
    fn test_block_outlives_retain() {
        let rt = runtime(false);
        let s = signal(&rt, 0);
        assert!(s.retain());
        s.destroy().unwrap();
        assert_eq!(s.ref_counts(), (0, 1));
        assert_eq!(rt.signal_blocks().live(), 1);
        assert_eq!(s.destroy(), Err(Error::InvalidSignal));
        s.release();
        assert_eq!(rt.signal_blocks().live(), 0);
        assert!(!s.retain());
    }

    #[test]
    fn test_second_waiter_polls() {
        let device = Arc::new(HostDevice::default());
        let rt = Runtime::new(device.clone(), RuntimeFlags::default());
        let s = signal(&rt, 0);
        assert_eq!(s.variant(), SignalVariant::Interrupt);

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || {
                    s.wait_acquire(SignalCondition::Gte, 3, WAIT_FOREVER, WaitState::Blocked)
                })
            })
            .collect();

        while s.waiters() < 2 {
            std::thread::yield_now();
        }
        for _ in 0..1000 {
            if device.sleeping_threads() != 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(device.sleeping_threads(), 1);
        s.store_release(3);

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), 3);
        }
        assert_eq!(device.sleeping_threads(), 1);
        assert_eq!(s.waiters(), 0);
        s.destroy().unwrap();
    }

    #[test]
    fn test_destroyed_signal_leaves_reused_block_alone() {
        let rt = runtime(true);
        let old = signal(&rt, 1);
        old.destroy().unwrap();

        let fresh = signal(&rt, 5);
        assert_eq!(rt.signal_blocks().live(), 1);

        old.store_relaxed(99);
        assert_eq!(old.add_acq_rel(1), 0);
        assert_eq!(old.exch_release(7), 0);
        assert_eq!(old.cas_acquire(5, 8), 0);
        assert_eq!(old.load_acquire(), 0);
        old.set_timestamps(1, 2);
        assert_eq!(old.timestamps(), (0, 0));
        assert_eq!(old.kind(), SignalKind::Invalid);

        assert_eq!(fresh.load_acquire(), 5);
        assert_eq!(fresh.timestamps(), (0, 0));
        assert_eq!(fresh.kind(), SignalKind::User);
        fresh.destroy().unwrap();
    }

    #[test]
    fn test_duplicate_handle() {
        let rt = runtime(false);
        let s = signal(&rt, 0);
        s.duplicate().unwrap();
        s.destroy().unwrap();
        assert!(s.is_valid());
        s.destroy().unwrap();
        assert!(!s.is_valid());
        assert_eq!(s.duplicate(), Err(Error::InvalidSignal));
    }

    #[test]
    fn test_metadata() {
        let rt = runtime(false);
        let s = signal(&rt, 0);
        s.set_timestamps(10, 25);
        assert_eq!(s.timestamps(), (10, 25));
        assert_eq!(s.async_copy_agent(), None);
        s.set_async_copy_agent(Some(AgentId(1)));
        assert_eq!(s.async_copy_agent(), Some(AgentId(1)));
        assert_eq!(s.kind(), SignalKind::User);
        assert!(s.queue().is_none());
        assert!(Arc::ptr_eq(&rt.lookup_signal(s.handle()).unwrap(), &s));
        s.destroy().unwrap();
    }

    #[test]
    fn test_doorbell_store_rings() {
        let rt = runtime(false);
        let (bell, register) = doorbell(&rt);
        assert_eq!(bell.variant(), SignalVariant::Doorbell);
        assert!(bell.kind().is_doorbell());
        bell.store_relaxed(3);
        bell.store_release(4);
        assert_eq!(register.history(), vec![3, 4]);

        bell.destroy_handle().unwrap();
        bell.store_release(5);
        assert_eq!(register.write_count(), 2);
    }

    #[test]
    #[should_panic(expected = "illegal on doorbell")]
    fn test_doorbell_load_panics() {
        let rt = runtime(false);
        let (bell, _) = doorbell(&rt);
        bell.load_relaxed();
    }

    #[test]
    #[should_panic(expected = "illegal on doorbell")]
    fn test_doorbell_wait_panics() {
        let rt = runtime(false);
        let (bell, _) = doorbell(&rt);
        bell.wait_relaxed(SignalCondition::Eq, 0, 0, WaitState::Active);
    }

    #[test]
    #[should_panic(expected = "destroyed with its queue")]
    fn test_doorbell_destroy_panics() {
        let rt = runtime(false);
        let (bell, _) = doorbell(&rt);
        let _ = bell.destroy();
    }
}
