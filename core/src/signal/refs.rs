//! Packed handle/retain reference counts.
//!
//! The high half counts handle references (`destroy` drops one), the low
//! half counts retains (each handle reference owns one, each in-flight
//! operation adds one). Both halves move in a single compare-and-swap so
//! "destroy only when both are zero" is decided atomically.

use core::sync::atomic::{AtomicU64, Ordering};

const HANDLE_ONE: u64 = 1 << 32;
const RETAIN_ONE: u64 = 1;

#[inline]
fn handles(state: u64) -> u32 {
    (state >> 32) as u32
}

#[inline]
fn retains(state: u64) -> u32 {
    state as u32
}

/// Outcome of dropping a handle reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HandleDrop {
    /// The last handle reference is gone; the signal is now invalid
    pub(crate) invalidated: bool,
    /// No retain remains either; the signal must be torn down
    pub(crate) dead: bool,
}

#[derive(Debug)]
pub(crate) struct RefState(AtomicU64);

impl RefState {
    /// One handle reference and its retain
    pub(crate) fn new() -> Self {
        Self(AtomicU64::new(HANDLE_ONE | RETAIN_ONE))
    }

    fn update(&self, f: impl FnMut(u64) -> Option<u64>) -> Result<u64, u64> {
        self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, f)
    }

    pub(crate) fn handles(&self) -> u32 {
        handles(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn retains(&self) -> u32 {
        retains(self.0.load(Ordering::Acquire))
    }

    /// Add a retain unless the object is already dead
    pub(crate) fn retain(&self) -> bool {
        self.update(|s| (retains(s) != 0).then(|| s + RETAIN_ONE)).is_ok()
    }

    /// Drop a retain, returning true if the object just died
    pub(crate) fn release(&self) -> bool {
        match self.update(|s| (retains(s) != 0).then(|| s - RETAIN_ONE)) {
            Ok(prev) => prev - RETAIN_ONE == 0,
            Err(_) => {
                debug_assert!(false, "release without matching retain");
                false
            },
        }
    }

    /// Drop a handle reference together with the retain it owns
    ///
    /// Returns `None` if no handle reference was left.
    pub(crate) fn drop_handle(&self) -> Option<HandleDrop> {
        let prev = self
            .update(|s| {
                (handles(s) != 0 && retains(s) != 0).then(|| s - HANDLE_ONE - RETAIN_ONE)
            })
            .ok()?;
        let next = prev - HANDLE_ONE - RETAIN_ONE;
        Some(HandleDrop {
            invalidated: handles(next) == 0,
            dead: next == 0,
        })
    }

    /// Add a handle reference and its retain, unless the handle is gone
    pub(crate) fn duplicate(&self) -> bool {
        self.update(|s| (handles(s) != 0).then(|| s + HANDLE_ONE + RETAIN_ONE))
            .is_ok()
    }
}
