//! # Shared ABI Blocks
//!
//! Fixed-layout objects visible to every participant: host threads, other
//! processes attached through IPC, and the device.
//!
//! Both blocks are made of atomics only, never move once allocated and need
//! no destructor. They are handed out by a [`BlockPool`](crate::pool::BlockPool)
//! and named by the pool handle of their slot.

use core::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

use bitflags::bitflags;
use static_assertions::{assert_eq_size, const_assert_eq};

use crate::pool::PoolBlock;
use crate::types::{AtomicSignalValue, SignalValue};

// =============================================================================
// SIGNAL BLOCK
// =============================================================================

/// Kind tag of a shared signal block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum SignalKind {
    /// Not constructed, or released
    Invalid        = 0,
    /// Ordinary host-visible signal
    User           = 1,
    /// Hardware AQL doorbell
    Doorbell       = -1,
    /// Software-filtered legacy doorbell
    LegacyDoorbell = -2,
}

impl SignalKind {
    /// Decode a raw kind tag
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            1 => Self::User,
            -1 => Self::Doorbell,
            -2 => Self::LegacyDoorbell,
            _ => Self::Invalid,
        }
    }

    /// Whether this kind is a doorbell of either flavor
    pub fn is_doorbell(self) -> bool {
        matches!(self, Self::Doorbell | Self::LegacyDoorbell)
    }
}

/// Block flag: the signal may be attached from other processes
const SIGNAL_FLAG_IPC: u32 = 1 << 0;

/// Shared part of a signal
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct SharedSignal {
    pub(crate) kind: AtomicI64,
    pub(crate) value: AtomicSignalValue,
    pub(crate) event_mailbox_ptr: AtomicU64,
    pub(crate) event_id: AtomicU32,
    pub(crate) flags: AtomicU32,
    pub(crate) start_ts: AtomicU64,
    pub(crate) end_ts: AtomicU64,
    /// Owning queue handle when the signal is a doorbell
    pub(crate) queue: AtomicU64,
    /// Wrappers attached to this block across all processes
    pub(crate) attach_count: AtomicU32,
    reserved: u32,
}

assert_eq_size!(SharedSignal, [u8; 64]);
const_assert_eq!(core::mem::align_of::<SharedSignal>(), 64);

impl SharedSignal {
    /// Kind tag
    pub fn kind(&self) -> SignalKind {
        SignalKind::from_raw(self.kind.load(Ordering::Acquire))
    }

    pub(crate) fn set_kind(&self, kind: SignalKind) {
        self.kind.store(kind as i64, Ordering::Release);
    }

    /// Current value, relaxed
    pub fn value(&self) -> SignalValue {
        self.value.load(Ordering::Relaxed)
    }

    /// Whether the block may be attached from other processes
    pub fn is_ipc(&self) -> bool {
        self.flags.load(Ordering::Acquire) & SIGNAL_FLAG_IPC != 0
    }

    pub(crate) fn mark_ipc(&self) {
        self.flags.fetch_or(SIGNAL_FLAG_IPC, Ordering::Release);
    }

    /// Mailbox address and event id of the backing OS event
    pub fn event(&self) -> (u64, u32) {
        (
            self.event_mailbox_ptr.load(Ordering::Relaxed),
            self.event_id.load(Ordering::Relaxed),
        )
    }

    /// Attach one more wrapper unless the block is already being freed
    pub(crate) fn try_attach(&self) -> bool {
        self.attach_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n != 0).then(|| n + 1))
            .is_ok()
    }

    /// Detach a wrapper, returning true when it was the last one
    pub(crate) fn detach(&self) -> bool {
        self.attach_count.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

impl PoolBlock for SharedSignal {
    fn reset(&self) {
        self.kind.store(SignalKind::Invalid as i64, Ordering::Relaxed);
        self.value.store(0, Ordering::Relaxed);
        self.event_mailbox_ptr.store(0, Ordering::Relaxed);
        self.event_id.store(0, Ordering::Relaxed);
        self.flags.store(0, Ordering::Relaxed);
        self.start_ts.store(0, Ordering::Relaxed);
        self.end_ts.store(0, Ordering::Relaxed);
        self.queue.store(0, Ordering::Relaxed);
        self.attach_count.store(0, Ordering::Release);
    }
}

// =============================================================================
// QUEUE CONTROL BLOCK
// =============================================================================

bitflags! {
    /// Queue property bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueueProperties: u32 {
        /// Trap handler installed
        const ENABLE_TRAP_HANDLER = 1 << 0;
        /// Pointers in packets are 64-bit
        const IS_PTR64            = 1 << 1;
        /// Dispatch timestamps are recorded
        const ENABLE_PROFILING    = 1 << 3;
    }
}

/// Shared control block of a queue
///
/// The dispatch indices sit on their own cache lines so producers bumping
/// the write index do not contend with the consumer moving the read index.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct SharedQueue {
    pub(crate) queue_type: AtomicU32,
    pub(crate) features: AtomicU32,
    pub(crate) base_address: AtomicU64,
    pub(crate) doorbell_signal: AtomicU64,
    /// Ring size in packets
    pub(crate) size: AtomicU32,
    reserved0: u32,
    pub(crate) id: AtomicU64,
    pub(crate) queue_properties: AtomicU32,
    reserved1: u32,
    pub(crate) queue_inactive_signal: AtomicU64,
    reserved2: u64,

    pub(crate) write_dispatch_id: AtomicU64,
    pad_write: [u64; 7],

    pub(crate) read_dispatch_id: AtomicU64,
    pad_read: [u64; 7],

    pub(crate) max_legacy_doorbell_dispatch_id_plus_1: AtomicU64,
    pub(crate) legacy_doorbell_lock: AtomicU32,
    reserved3: u32,
    pad_tail: [u64; 6],
}

assert_eq_size!(SharedQueue, [u8; 256]);
const_assert_eq!(core::mem::align_of::<SharedQueue>(), 64);

impl SharedQueue {
    /// Ring size in packets
    pub fn size(&self) -> u32 {
        self.size.load(Ordering::Relaxed)
    }

    /// Queue id
    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Relaxed)
    }

    /// Ring base address
    pub fn base_address(&self) -> u64 {
        self.base_address.load(Ordering::Relaxed)
    }

    /// Property bits
    pub fn properties(&self) -> QueueProperties {
        QueueProperties::from_bits_truncate(self.queue_properties.load(Ordering::Relaxed))
    }

    /// Last dispatch id published through the legacy doorbell, plus one
    pub fn legacy_doorbell_last(&self) -> u64 {
        self.max_legacy_doorbell_dispatch_id_plus_1.load(Ordering::Acquire)
    }
}

impl PoolBlock for SharedQueue {
    fn reset(&self) {
        self.queue_type.store(0, Ordering::Relaxed);
        self.features.store(0, Ordering::Relaxed);
        self.base_address.store(0, Ordering::Relaxed);
        self.doorbell_signal.store(0, Ordering::Relaxed);
        self.size.store(0, Ordering::Relaxed);
        self.id.store(0, Ordering::Relaxed);
        self.queue_properties.store(0, Ordering::Relaxed);
        self.queue_inactive_signal.store(0, Ordering::Relaxed);
        self.write_dispatch_id.store(0, Ordering::Relaxed);
        self.read_dispatch_id.store(0, Ordering::Relaxed);
        self.max_legacy_doorbell_dispatch_id_plus_1.store(0, Ordering::Relaxed);
        self.legacy_doorbell_lock.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            SignalKind::Invalid,
            SignalKind::User,
            SignalKind::Doorbell,
            SignalKind::LegacyDoorbell,
        ] {
            assert_eq!(SignalKind::from_raw(kind as i64), kind);
        }
        assert_eq!(SignalKind::from_raw(42), SignalKind::Invalid);
        assert!(SignalKind::LegacyDoorbell.is_doorbell());
    }

    #[test]
    fn test_attach_count() {
        let block = SharedSignal::default();
        assert!(!block.try_attach());
        block.attach_count.store(1, Ordering::Relaxed);
        assert!(block.try_attach());
        assert!(!block.detach());
        assert!(block.detach());
        assert!(!block.try_attach());
    }

    #[test]
    fn test_reset_clears_queue_state() {
        let block = SharedQueue::default();
        block.write_dispatch_id.store(9, Ordering::Relaxed);
        block.legacy_doorbell_lock.store(1, Ordering::Relaxed);
        block.reset();
        assert_eq!(block.write_dispatch_id.load(Ordering::Relaxed), 0);
        assert_eq!(block.legacy_doorbell_lock.load(Ordering::Relaxed), 0);
    }
}
