//! Packet ring storage.
//!
//! A ring is `packets` 64-byte slots in device-visible memory. Slots are
//! accessed through atomics only: the header word is published with release
//! ordering after the body, and reset to INVALID once the packet has been
//! consumed.

use core::sync::atomic::{AtomicU64, Ordering};

use helix_stream_hal::{DeviceMemory, PACKET_BYTES};

use crate::error::{Error, Result};
use crate::packet::{AqlPacket, Packet, PacketHeader};

#[repr(C, align(64))]
struct PacketSlot {
    words: [AtomicU64; 8],
}

/// Ring of packet slots
pub struct PacketRing {
    memory: DeviceMemory,
    packets: u32,
}

impl PacketRing {
    /// Wrap `memory` as a ring of `packets` slots
    pub fn new(memory: DeviceMemory, packets: u32) -> Result<Self> {
        let bytes = u64::from(packets) * u64::from(PACKET_BYTES);
        if !packets.is_power_of_two()
            || (memory.size() as u64) < bytes
            || memory.align() < core::mem::align_of::<PacketSlot>()
        {
            return Err(Error::InvalidArgument);
        }
        Ok(Self { memory, packets })
    }

    fn slots(&self) -> &[PacketSlot] {
        // SAFETY: the memory is zero-initialized, large and aligned enough for
        // `packets` slots (checked in `new`), and lives as long as `self`.
        // Slots are only ever touched through atomics.
        unsafe {
            core::slice::from_raw_parts(self.memory.as_ptr().cast::<PacketSlot>(), self.packets as usize)
        }
    }

    fn slot(&self, index: u64) -> &PacketSlot {
        &self.slots()[(index & u64::from(self.packets - 1)) as usize]
    }

    /// Ring size in packets
    pub fn packets(&self) -> u32 {
        self.packets
    }

    /// Ring base address
    pub fn base_address(&self) -> u64 {
        self.memory.address()
    }

    /// Ring size in bytes
    pub fn bytes(&self) -> usize {
        self.packets as usize * PACKET_BYTES as usize
    }

    /// Mark every slot free
    pub fn invalidate_all(&self) {
        for slot in self.slots() {
            slot.words[0].store(AqlPacket::INVALID.words[0], Ordering::Relaxed);
        }
        core::sync::atomic::fence(Ordering::Release);
    }

    /// Header of the slot holding write index `index`
    pub fn header(&self, index: u64) -> PacketHeader {
        PacketHeader(self.slot(index).words[0].load(Ordering::Acquire) as u16)
    }

    /// Write a packet into the slot for `index`, header last
    ///
    /// Fails with `InvalidArgument` if the slot still holds an unconsumed
    /// packet.
    pub fn publish<P: Packet>(&self, index: u64, packet: &P) -> Result<()> {
        let slot = self.slot(index);
        if !PacketHeader(slot.words[0].load(Ordering::Acquire) as u16).is_invalid() {
            return Err(Error::InvalidArgument);
        }

        let raw = AqlPacket::from_packet(packet);
        for (word, value) in slot.words.iter().zip(raw.words).skip(1) {
            word.store(value, Ordering::Relaxed);
        }
        slot.words[0].store(raw.words[0], Ordering::Release);
        Ok(())
    }

    /// Take the packet at `index` and free its slot
    ///
    /// Returns `None` if no packet has been published there.
    pub fn consume(&self, index: u64) -> Option<AqlPacket> {
        let slot = self.slot(index);
        let first = slot.words[0].load(Ordering::Acquire);
        if PacketHeader(first as u16).is_invalid() {
            return None;
        }

        let mut packet = AqlPacket { words: [first, 0, 0, 0, 0, 0, 0, 0] };
        for (out, word) in packet.words.iter_mut().zip(&slot.words).skip(1) {
            *out = word.load(Ordering::Relaxed);
        }
        slot.words[0].store(AqlPacket::INVALID.words[0], Ordering::Release);
        Some(packet)
    }
}

impl core::fmt::Debug for PacketRing {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PacketRing")
            .field("base", &format_args!("{:#x}", self.base_address()))
            .field("packets", &self.packets)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{BarrierPacket, PacketType, TaskPacket};

    fn ring(packets: u32) -> PacketRing {
        let memory = DeviceMemory::host(packets as usize * 64, 64).unwrap();
        PacketRing::new(memory, packets).unwrap()
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let memory = DeviceMemory::host(64 * 8, 64).unwrap();
        assert!(PacketRing::new(memory, 12).is_err());
        let memory = DeviceMemory::host(64 * 4, 64).unwrap();
        assert!(PacketRing::new(memory, 8).is_err());
    }

    #[test]
    fn test_invalidate_all() {
        let ring = ring(16);
        ring.invalidate_all();
        assert!((0..16).all(|i| ring.header(i).is_invalid()));
        assert_eq!(ring.bytes(), 1024);
    }

    #[test]
    fn test_publish_consume_wraps() {
        let ring = ring(4);
        ring.invalidate_all();

        let task = TaskPacket {
            header: PacketHeader::new(PacketType::Task).0,
            task: 0x1000,
            arg: 7,
            ..Default::default()
        };
        ring.publish(2, &task).unwrap();
        assert_eq!(ring.header(6).packet_type(), Some(PacketType::Task));

        let barrier = BarrierPacket {
            header: PacketHeader::new(PacketType::BarrierAnd).0,
            ..Default::default()
        };
        assert_eq!(ring.publish(6, &barrier), Err(Error::InvalidArgument));

        let taken = ring.consume(6).unwrap();
        assert_eq!(taken.as_packet::<TaskPacket>().arg, 7);
        assert!(ring.header(2).is_invalid());
        assert!(ring.consume(2).is_none());

        ring.publish(6, &barrier).unwrap();
        assert_eq!(ring.consume(2).unwrap().packet_type(), Some(PacketType::BarrierAnd));
    }
}
