//! # Core Types
//!
//! Values, conditions, attribute flags and handles shared across the
//! stream runtime.

use core::fmt;
use core::marker::PhantomData;

use bitflags::bitflags;

pub use helix_stream_hal::{AgentId, QueuePriority, QueueType};

// =============================================================================
// SIGNAL VALUE
// =============================================================================

cfg_if::cfg_if! {
    if #[cfg(feature = "small-model")] {
        /// Value carried by a signal
        pub type SignalValue = i32;
        pub(crate) type AtomicSignalValue = core::sync::atomic::AtomicI32;
    } else {
        /// Value carried by a signal
        pub type SignalValue = i64;
        pub(crate) type AtomicSignalValue = core::sync::atomic::AtomicI64;
    }
}

/// Addressing model, which decides how legacy doorbells derive dispatch ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineModel {
    /// 32-bit: dispatch ids are clamped copies of the write index
    Small,
    /// 64-bit: dispatch id is the stored value plus one
    Large,
}

impl MachineModel {
    /// Model matching [`SignalValue`]
    #[cfg(feature = "small-model")]
    pub const NATIVE: Self = Self::Small;
    /// Model matching [`SignalValue`]
    #[cfg(not(feature = "small-model"))]
    pub const NATIVE: Self = Self::Large;
}

// =============================================================================
// WAIT PARAMETERS
// =============================================================================

/// Condition a wait is satisfied by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalCondition {
    /// value == compare
    Eq,
    /// value != compare
    Ne,
    /// value < compare
    Lt,
    /// value >= compare
    Gte,
}

impl SignalCondition {
    /// Whether `value` satisfies the condition against `compare`
    #[inline]
    pub fn is_satisfied(self, value: SignalValue, compare: SignalValue) -> bool {
        match self {
            Self::Eq => value == compare,
            Self::Ne => value != compare,
            Self::Lt => value < compare,
            Self::Gte => value >= compare,
        }
    }
}

/// How a waiter should spend the time it waits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WaitState {
    /// May sleep on an OS event
    #[default]
    Blocked,
    /// Keep polling, never sleep
    Active,
}

/// Read-modify-write operations on a signal value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmwOp {
    /// Bitwise AND
    And,
    /// Bitwise OR
    Or,
    /// Bitwise XOR
    Xor,
    /// Wrapping addition
    Add,
    /// Wrapping subtraction
    Sub,
}

// =============================================================================
// ATTRIBUTES
// =============================================================================

bitflags! {
    /// Signal creation attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SignalAttributes: u32 {
        /// Only agents ever observe the signal
        const GPU_ONLY = 1 << 0;
        /// Shareable with other processes
        const IPC      = 1 << 1;
    }
}

bitflags! {
    /// Packet kinds a queue accepts
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueueFeatures: u32 {
        /// Kernel dispatch packets
        const KERNEL_DISPATCH = 1 << 0;
        /// Agent dispatch packets
        const AGENT_DISPATCH  = 1 << 1;
    }
}

impl Default for QueueFeatures {
    fn default() -> Self {
        Self::KERNEL_DISPATCH | Self::AGENT_DISPATCH
    }
}

// =============================================================================
// HANDLE TYPES
// =============================================================================

/// Opaque 64-bit handle of a shared object
///
/// The low 32 bits index a slot of the owning block pool, the high 32 bits
/// hold the slot generation. Generations start at 1, so the null handle 0
/// never names a live object and a stale handle never matches a reused slot.
#[repr(transparent)]
pub struct Handle<T> {
    id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Wrap a raw handle value
    #[inline]
    pub const fn from_raw(id: u64) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Build a handle from a slot index and generation
    #[inline]
    pub const fn from_parts(index: u32, generation: u32) -> Self {
        Self::from_raw(((generation as u64) << 32) | index as u64)
    }

    /// Create a null handle
    #[inline]
    pub const fn null() -> Self {
        Self::from_raw(0)
    }

    /// Raw handle value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.id
    }

    /// Slot index
    #[inline]
    pub const fn index(self) -> u32 {
        self.id as u32
    }

    /// Slot generation
    #[inline]
    pub const fn generation(self) -> u32 {
        (self.id >> 32) as u32
    }

    /// Check if null
    #[inline]
    pub const fn is_null(self) -> bool {
        self.id == 0
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> core::hash::Hash for Handle<T> {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = core::any::type_name::<T>();
        let name = name.rsplit("::").next().unwrap_or(name);
        write!(f, "Handle<{}>({}:{})", name, self.index(), self.generation())
    }
}

// Marker types for handles
/// Marker for signal handles
#[derive(Debug)]
pub struct SignalMarker;
/// Marker for queue handles
#[derive(Debug)]
pub struct QueueMarker;
/// Marker for signal group handles
#[derive(Debug)]
pub struct SignalGroupMarker;

/// Handle of a signal
pub type SignalHandle = Handle<SignalMarker>;
/// Handle of a queue
pub type QueueHandle = Handle<QueueMarker>;
/// Handle of a signal group
pub type SignalGroupHandle = Handle<SignalGroupMarker>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditions() {
        assert!(SignalCondition::Eq.is_satisfied(3, 3));
        assert!(SignalCondition::Ne.is_satisfied(3, 4));
        assert!(SignalCondition::Lt.is_satisfied(-1, 0));
        assert!(!SignalCondition::Lt.is_satisfied(0, 0));
        assert!(SignalCondition::Gte.is_satisfied(10, 10));
    }

    #[test]
    fn test_handle_encoding() {
        let handle = SignalHandle::from_parts(7, 3);
        assert_eq!(handle.index(), 7);
        assert_eq!(handle.generation(), 3);
        assert_eq!(handle.raw(), (3 << 32) | 7);
        assert_eq!(SignalHandle::from_raw(handle.raw()), handle);
        assert!(SignalHandle::null().is_null());
        assert_eq!(format!("{:?}", handle), "Handle<SignalMarker>(7:3)");
    }
}
