//! # Doorbell Registers
//!
//! Memory-mapped doorbell registers through which a host tells a device
//! that a queue has new packets.
//!
//! The backends in this crate emulate the register in host memory. Writes
//! are fenced exactly as a real MMIO write would be, and the most recent
//! values are kept for inspection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// FIELD HELPERS
// =============================================================================

/// Extract the bit field `[low_bit, high_bit]` of a register value
pub const fn extract_field(value: u32, low_bit: u8, high_bit: u8) -> u32 {
    let mask = ((1u32 << (high_bit - low_bit + 1)) - 1) << low_bit;
    (value & mask) >> low_bit
}

/// Replace the bit field `[low_bit, high_bit]` of a register value
pub const fn insert_field(value: u32, field: u32, low_bit: u8, high_bit: u8) -> u32 {
    let mask = ((1u32 << (high_bit - low_bit + 1)) - 1) << low_bit;
    (value & !mask) | ((field << low_bit) & mask)
}

// =============================================================================
// MEMORY FENCE OPERATIONS
// =============================================================================

/// Memory barrier types for MMIO
pub mod fence {
    //! Memory barrier operations

    /// Compiler fence (prevents reordering)
    #[inline(always)]
    pub fn compiler() {
        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
    }

    /// Memory barrier before MMIO write
    #[inline(always)]
    pub fn mmio_write_barrier() {
        #[cfg(target_arch = "x86_64")]
        {
            // x86_64 has strong memory model, compiler fence is sufficient
            compiler();
        }

        #[cfg(not(target_arch = "x86_64"))]
        {
            core::sync::atomic::fence(core::sync::atomic::Ordering::Release);
        }
    }
}

// =============================================================================
// DOORBELL REGISTER
// =============================================================================

/// Writes kept for inspection
const HISTORY_DEPTH: usize = 256;

/// An emulated doorbell register
#[derive(Debug, Default)]
pub struct DoorbellRegister {
    value: AtomicU64,
    writes: AtomicU64,
    history: spin::Mutex<VecDeque<u64>>,
}

impl DoorbellRegister {
    /// Create a register reading zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Ring with a 32-bit value (legacy firmware)
    pub fn write32(&self, value: u32) {
        self.write(u64::from(value));
    }

    /// Ring with a 64-bit value (AQL doorbell)
    pub fn write64(&self, value: u64) {
        self.write(value);
    }

    fn write(&self, value: u64) {
        fence::mmio_write_barrier();
        self.value.store(value, Ordering::Release);
        self.writes.fetch_add(1, Ordering::Relaxed);

        let mut history = self.history.lock();
        if history.len() == HISTORY_DEPTH {
            history.pop_front();
        }
        history.push_back(value);
    }

    /// Last value written
    pub fn read(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Number of writes since creation
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Most recent writes, oldest first
    pub fn history(&self) -> Vec<u64> {
        self.history.lock().iter().copied().collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_helpers() {
        assert_eq!(extract_field(0x0000_0a02, 0, 7), 0x02);
        assert_eq!(extract_field(0x0000_0a02, 9, 10), 0x1);
        assert_eq!(insert_field(0, 0x2, 11, 12), 0x1000);
    }

    #[test]
    fn test_register_writes() {
        let reg = DoorbellRegister::new();
        reg.write32(5);
        reg.write64(0x1_0000_0007);
        assert_eq!(reg.read(), 0x1_0000_0007);
        assert_eq!(reg.write_count(), 2);
        assert_eq!(reg.history(), vec![5, 0x1_0000_0007]);
    }

    #[test]
    fn test_history_is_bounded() {
        let reg = DoorbellRegister::new();
        for i in 0..(HISTORY_DEPTH as u64 + 10) {
            reg.write64(i);
        }
        let history = reg.history();
        assert_eq!(history.len(), HISTORY_DEPTH);
        assert_eq!(history[0], 10);
    }
}
