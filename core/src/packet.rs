//! # AQL Packets
//!
//! The 64-byte packet formats stored in queue rings.
//!
//! Every packet starts with a 16-bit header:
//!
//! ```text
//!  15      13 12   11 10    9   8   7                 0
//! ┌──────────┬───────┬───────┬─────┬───────────────────┐
//! │ reserved │release│acquire│ bar │       type        │
//! └──────────┴───────┴───────┴─────┴───────────────────┘
//! ```
//!
//! A slot whose type is [`PacketType::Invalid`] is free. Producers write the
//! body first and publish the header last; consumers reset the header to
//! INVALID once they are done with the slot.

use bytemuck::{Pod, Zeroable};
use helix_stream_hal::mmio::{extract_field, insert_field};
use static_assertions::assert_eq_size;

// =============================================================================
// HEADER
// =============================================================================

/// Header bit offset of the packet type
pub const HEADER_TYPE: u8 = 0;
/// Width of the packet type
pub const HEADER_WIDTH_TYPE: u8 = 8;
/// Header bit offset of the barrier bit
pub const HEADER_BARRIER: u8 = 8;
/// Width of the barrier bit
pub const HEADER_WIDTH_BARRIER: u8 = 1;
/// Header bit offset of the acquire fence scope
pub const HEADER_ACQUIRE_FENCE_SCOPE: u8 = 9;
/// Width of the acquire fence scope
pub const HEADER_WIDTH_ACQUIRE_FENCE_SCOPE: u8 = 2;
/// Header bit offset of the release fence scope
pub const HEADER_RELEASE_FENCE_SCOPE: u8 = 11;
/// Width of the release fence scope
pub const HEADER_WIDTH_RELEASE_FENCE_SCOPE: u8 = 2;

/// Packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Slot is free
    Invalid        = 1,
    /// Kernel dispatch
    KernelDispatch = 2,
    /// Barrier that waits for all dependencies
    BarrierAnd     = 3,
    /// Vendor or agent-specific dispatch
    AgentDispatch  = 4,
    /// Barrier that waits for any dependency
    BarrierOr      = 5,
    /// DMA copy
    DmaCopy        = 6,
    /// Generic host task
    Task           = 7,
    /// Task stolen from another queue
    StealTask      = 8,
}

impl PacketType {
    /// Decode a raw type byte
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            1 => Self::Invalid,
            2 => Self::KernelDispatch,
            3 => Self::BarrierAnd,
            4 => Self::AgentDispatch,
            5 => Self::BarrierOr,
            6 => Self::DmaCopy,
            7 => Self::Task,
            8 => Self::StealTask,
            _ => return None,
        })
    }
}

/// Memory fence scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FenceScope {
    /// No fence
    None   = 0,
    /// Visible to the executing agent
    Agent  = 1,
    /// Visible system wide
    System = 2,
}

impl FenceScope {
    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Agent,
            2 => Self::System,
            _ => Self::None,
        }
    }
}

const fn field_end(offset: u8, width: u8) -> u8 {
    offset + width - 1
}

/// Packet header word
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PacketHeader(pub u16);

impl PacketHeader {
    /// Header of a free slot
    pub const INVALID: Self = Self(PacketType::Invalid as u16);

    /// Header of the given type with no barrier and no fences
    pub const fn new(packet_type: PacketType) -> Self {
        Self(packet_type as u16)
    }

    fn with(self, field: u32, offset: u8, width: u8) -> Self {
        Self(insert_field(u32::from(self.0), field, offset, field_end(offset, width)) as u16)
    }

    fn get(self, offset: u8, width: u8) -> u32 {
        extract_field(u32::from(self.0), offset, field_end(offset, width))
    }

    /// Set the barrier bit
    pub fn with_barrier(self, barrier: bool) -> Self {
        self.with(u32::from(barrier), HEADER_BARRIER, HEADER_WIDTH_BARRIER)
    }

    /// Set the acquire fence scope
    pub fn with_acquire(self, scope: FenceScope) -> Self {
        self.with(scope as u32, HEADER_ACQUIRE_FENCE_SCOPE, HEADER_WIDTH_ACQUIRE_FENCE_SCOPE)
    }

    /// Set the release fence scope
    pub fn with_release(self, scope: FenceScope) -> Self {
        self.with(scope as u32, HEADER_RELEASE_FENCE_SCOPE, HEADER_WIDTH_RELEASE_FENCE_SCOPE)
    }

    /// Packet type, `None` for unknown values
    pub fn packet_type(self) -> Option<PacketType> {
        PacketType::from_raw(self.get(HEADER_TYPE, HEADER_WIDTH_TYPE) as u8)
    }

    /// Whether the slot is free
    pub fn is_invalid(self) -> bool {
        self.packet_type() == Some(PacketType::Invalid)
    }

    /// Barrier bit
    pub fn barrier(self) -> bool {
        self.get(HEADER_BARRIER, HEADER_WIDTH_BARRIER) != 0
    }

    /// Acquire fence scope
    pub fn acquire(self) -> FenceScope {
        FenceScope::from_raw(self.get(HEADER_ACQUIRE_FENCE_SCOPE, HEADER_WIDTH_ACQUIRE_FENCE_SCOPE))
    }

    /// Release fence scope
    pub fn release(self) -> FenceScope {
        FenceScope::from_raw(self.get(HEADER_RELEASE_FENCE_SCOPE, HEADER_WIDTH_RELEASE_FENCE_SCOPE))
    }
}

impl core::fmt::Debug for PacketHeader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PacketHeader")
            .field("type", &self.packet_type())
            .field("barrier", &self.barrier())
            .field("acquire", &self.acquire())
            .field("release", &self.release())
            .finish()
    }
}

// =============================================================================
// PACKET FORMATS
// =============================================================================

/// A typed packet layout
pub trait Packet: Pod {
    /// Header of the packet
    fn header(&self) -> PacketHeader;
}

macro_rules! impl_packet {
    ($($ty:ty),* $(,)?) => {
        $(
            assert_eq_size!($ty, [u8; 64]);

            impl Packet for $ty {
                fn header(&self) -> PacketHeader {
                    PacketHeader(self.header)
                }
            }
        )*
    };
}

/// Kernel dispatch packet
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
#[allow(missing_docs)]
pub struct KernelDispatchPacket {
    pub header: u16,
    pub setup: u16,
    pub workgroup_size_x: u16,
    pub workgroup_size_y: u16,
    pub workgroup_size_z: u16,
    pub reserved0: u16,
    pub grid_size_x: u32,
    pub grid_size_y: u32,
    pub grid_size_z: u32,
    pub private_segment_size: u32,
    pub group_segment_size: u32,
    pub kernel_object: u64,
    pub kernarg_address: u64,
    pub reserved2: u64,
    pub completion_signal: u64,
}

/// Agent dispatch packet
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
#[allow(missing_docs)]
pub struct AgentDispatchPacket {
    pub header: u16,
    pub kind: u16,
    pub reserved0: u32,
    pub return_address: u64,
    pub arg: [u64; 4],
    pub reserved2: u64,
    pub completion_signal: u64,
}

/// Barrier packet, AND or OR flavored by its header type
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
#[allow(missing_docs)]
pub struct BarrierPacket {
    pub header: u16,
    pub reserved0: u16,
    pub reserved1: u32,
    pub dep_signal: [u64; 5],
    pub reserved2: u64,
    pub completion_signal: u64,
}

/// DMA copy packet
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
#[allow(missing_docs)]
pub struct DmaCopyPacket {
    pub header: u16,
    pub reserved0: u16,
    pub reserved1: u32,
    pub dep_signal: u64,
    pub src: u64,
    pub dst: u64,
    pub bytes: u64,
    pub completion_signal: u64,
    pub reserved2: [u64; 2],
}

/// Host task packet, also used for stolen tasks
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
#[allow(missing_docs)]
pub struct TaskPacket {
    pub header: u16,
    pub reserved0: u16,
    pub reserved1: u32,
    pub dep_signal: u64,
    pub task: u64,
    pub arg: u64,
    pub stack_size: u64,
    pub completion_signal: u64,
    pub reserved2: [u64; 2],
}

/// Raw ring slot contents
#[derive(Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct AqlPacket {
    /// Packet words; the header is the low half-word of `words[0]`
    pub words: [u64; 8],
}

impl_packet!(
    KernelDispatchPacket,
    AgentDispatchPacket,
    BarrierPacket,
    DmaCopyPacket,
    TaskPacket,
);

assert_eq_size!(AqlPacket, [u8; 64]);

impl AqlPacket {
    /// Packet of a free slot
    pub const INVALID: Self = Self {
        words: [PacketType::Invalid as u64, 0, 0, 0, 0, 0, 0, 0],
    };

    /// Erase a typed packet
    pub fn from_packet<P: Packet>(packet: &P) -> Self {
        bytemuck::cast(*packet)
    }

    /// View as a typed packet
    pub fn as_packet<P: Packet>(&self) -> &P {
        bytemuck::cast_ref(self)
    }

    /// Packet header
    pub fn header(&self) -> PacketHeader {
        PacketHeader(self.words[0] as u16)
    }

    /// Packet type
    pub fn packet_type(&self) -> Option<PacketType> {
        self.header().packet_type()
    }
}

impl Default for AqlPacket {
    fn default() -> Self {
        Self::INVALID
    }
}

impl core::fmt::Debug for AqlPacket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AqlPacket")
            .field("header", &self.header())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_fields() {
        let header = PacketHeader::new(PacketType::KernelDispatch)
            .with_barrier(true)
            .with_acquire(FenceScope::System)
            .with_release(FenceScope::Agent);

        assert_eq!(header.0, 2 | (1 << 8) | (2 << 9) | (1 << 11));
        assert_eq!(header.packet_type(), Some(PacketType::KernelDispatch));
        assert!(header.barrier());
        assert_eq!(header.acquire(), FenceScope::System);
        assert_eq!(header.release(), FenceScope::Agent);

        let cleared = header.with_barrier(false);
        assert!(!cleared.barrier());
        assert_eq!(cleared.acquire(), FenceScope::System);
    }

    #[test]
    fn test_invalid_header() {
        assert!(PacketHeader::INVALID.is_invalid());
        assert!(AqlPacket::default().header().is_invalid());
        assert_eq!(PacketHeader(0).packet_type(), None);
    }

    #[test]
    fn test_typed_views() {
        let dispatch = KernelDispatchPacket {
            header: PacketHeader::new(PacketType::KernelDispatch).0,
            workgroup_size_x: 64,
            grid_size_x: 4096,
            kernel_object: 0xdead_beef,
            completion_signal: 0x1_0000_0003,
            ..Default::default()
        };
        let raw = AqlPacket::from_packet(&dispatch);
        assert_eq!(raw.packet_type(), Some(PacketType::KernelDispatch));

        let view: &KernelDispatchPacket = raw.as_packet();
        assert_eq!(view.grid_size_x, 4096);
        assert_eq!(view.kernel_object, 0xdead_beef);
        assert_eq!(view.completion_signal, 0x1_0000_0003);

        let barrier = BarrierPacket {
            header: PacketHeader::new(PacketType::BarrierOr).0,
            dep_signal: [1, 2, 3, 4, 5],
            ..Default::default()
        };
        let raw = AqlPacket::from_packet(&barrier);
        assert_eq!(raw.as_packet::<BarrierPacket>().dep_signal[4], 5);
        assert_eq!(raw.as_packet::<BarrierPacket>().header().packet_type(), Some(PacketType::BarrierOr));
    }
}
