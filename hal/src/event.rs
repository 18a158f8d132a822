//! # OS Wait Events
//!
//! Kernel-style wait objects a thread can block on until a driver, another
//! thread or a fault handler sets them.
//!
//! An [`OsEvent`] is either auto-reset (a successful wait consumes the set
//! state) or manual-reset (stays set until [`OsEvent::reset`]). Threads may
//! block on a single event or on several at once through
//! [`OsEvent::wait_multiple`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bitflags::bitflags;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Timeout value that never expires
pub const INFINITE_MS: u32 = u32::MAX;

/// Base of the emulated mailbox address range
const MAILBOX_BASE: u64 = 0x7f00_0000_0000;

// =============================================================================
// TYPES
// =============================================================================

/// Backend-assigned event id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct EventId(pub u32);

/// What an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Raised on signal value changes
    Signal,
    /// Raised by the memory fault handler
    Memory,
}

/// Outcome of an event wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventWait {
    /// At least one waited event was set
    Signaled,
    /// The timeout elapsed first
    TimedOut,
}

bitflags! {
    /// Memory access fault details
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemoryFault: u32 {
        /// Page not present
        const NOT_PRESENT   = 1 << 0;
        /// Write to a read-only page
        const READ_ONLY     = 1 << 1;
        /// Execute on a non-executable page
        const NO_EXECUTE    = 1 << 2;
        /// Fault address is imprecise
        const IMPRECISE     = 1 << 3;
        /// The process cannot continue
        const FATAL_PROCESS = 1 << 4;
    }
}

// =============================================================================
// WAKER
// =============================================================================

/// Wake target shared by every event in a multi-event wait
#[derive(Debug, Default)]
struct Waker {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Waker {
    fn fire(&self) {
        *lock(&self.fired) = true;
        self.cond.notify_all();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn deadline(timeout_ms: u32) -> Option<Instant> {
    if timeout_ms == INFINITE_MS {
        None
    } else {
        Some(Instant::now() + Duration::from_millis(u64::from(timeout_ms)))
    }
}

// =============================================================================
// OS EVENT
// =============================================================================

/// A settable wait object
#[derive(Debug)]
pub struct OsEvent {
    id: EventId,
    kind: EventKind,
    manual_reset: bool,
    state: Mutex<bool>,
    cond: Condvar,
    watchers: spin::Mutex<Vec<Arc<Waker>>>,
    fault: AtomicU32,
}

impl OsEvent {
    /// Create an unset event
    pub fn new(id: EventId, kind: EventKind, manual_reset: bool) -> Self {
        Self {
            id,
            kind,
            manual_reset,
            state: Mutex::new(false),
            cond: Condvar::new(),
            watchers: spin::Mutex::new(Vec::new()),
            fault: AtomicU32::new(0),
        }
    }

    /// Event id
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Event kind
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Address a device writes to when it raises this event
    pub fn mailbox(&self) -> u64 {
        MAILBOX_BASE + u64::from(self.id.0) * 8
    }

    /// Set the event and wake every thread blocked on it
    pub fn set(&self) {
        *lock(&self.state) = true;
        self.cond.notify_all();

        let watchers = self.watchers.lock().clone();
        for waker in watchers {
            waker.fire();
        }
    }

    /// Clear the set state
    pub fn reset(&self) {
        *lock(&self.state) = false;
    }

    /// Whether the event is currently set
    pub fn is_set(&self) -> bool {
        *lock(&self.state)
    }

    /// Record a memory fault and raise the event
    pub fn report_fault(&self, fault: MemoryFault) {
        self.fault.fetch_or(fault.bits(), Ordering::Release);
        self.set();
    }

    /// Fault recorded on a memory event, if any
    pub fn fault(&self) -> Option<MemoryFault> {
        let bits = self.fault.load(Ordering::Acquire);
        (self.kind == EventKind::Memory && bits != 0).then(|| MemoryFault::from_bits_truncate(bits))
    }

    fn try_consume(&self) -> bool {
        let mut state = lock(&self.state);
        if !*state {
            return false;
        }
        if !self.manual_reset {
            *state = false;
        }
        true
    }

    /// Block until the event is set or `timeout_ms` elapses
    pub fn wait(&self, timeout_ms: u32) -> EventWait {
        let deadline = deadline(timeout_ms);
        let mut state = lock(&self.state);

        loop {
            if *state {
                if !self.manual_reset {
                    *state = false;
                }
                return EventWait::Signaled;
            }

            state = match deadline {
                None => self.cond.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return EventWait::TimedOut;
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                },
            };
        }
    }

    /// Block on several events at once
    ///
    /// With `wait_all == false` the call returns as soon as any event is
    /// set and consumes only that one. With `wait_all == true` it returns
    /// once every event is set and consumes all of them.
    pub fn wait_multiple(events: &[Arc<OsEvent>], wait_all: bool, timeout_ms: u32) -> EventWait {
        if events.is_empty() {
            return EventWait::Signaled;
        }

        let deadline = deadline(timeout_ms);
        let waker = Arc::new(Waker::default());
        for event in events {
            event.watchers.lock().push(Arc::clone(&waker));
        }

        let result = loop {
            if wait_all {
                if events.iter().all(|e| e.is_set()) {
                    for event in events {
                        event.try_consume();
                    }
                    break EventWait::Signaled;
                }
            } else if events.iter().any(|e| e.try_consume()) {
                break EventWait::Signaled;
            }

            let mut fired = lock(&waker.fired);
            if !*fired {
                fired = match deadline {
                    None => waker.cond.wait(fired).unwrap_or_else(PoisonError::into_inner),
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            break EventWait::TimedOut;
                        }
                        waker
                            .cond
                            .wait_timeout(fired, deadline - now)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0
                    },
                };
            }
            *fired = false;
        };

        for event in events {
            event.watchers.lock().retain(|w| !Arc::ptr_eq(w, &waker));
        }
        result
    }
}

// =============================================================================
// TESTS
// =============================================================================
