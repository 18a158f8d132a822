//! Interrupt-assisted waits.
//!
//! Waiters spin through the grace period and then block on the signal's OS
//! event. Writers raise the event only when somebody is registered in
//! `waiting`, so an undisturbed signal costs no system call.
//!
//! Only the first waiter sleeps on the event: the event auto-resets, so a
//! second sleeper could miss the wakeup. Later waiters poll actively.

use core::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use helix_stream_hal::OsEvent;

use super::{busy_wait, Signal};
use crate::runtime::Runtime;
use crate::time::WaitClock;
use crate::types::{SignalCondition, SignalValue, WaitState};

/// OS event attached to an interrupt signal
///
/// `None` when the event pool was exhausted at creation; the signal then
/// degrades to polling.
#[derive(Debug)]
pub(crate) struct InterruptEvent {
    event: Option<Arc<OsEvent>>,
    pooled: bool,
}

impl InterruptEvent {
    /// An event borrowed from the runtime's event pool
    pub(crate) fn new(event: Option<Arc<OsEvent>>) -> Self {
        Self {
            event,
            pooled: true,
        }
    }

    /// An event owned outright, destroyed with the signal
    pub(crate) fn owned(event: Arc<OsEvent>) -> Self {
        Self {
            event: Some(event),
            pooled: false,
        }
    }

    pub(crate) fn event(&self) -> Option<&Arc<OsEvent>> {
        self.event.as_ref()
    }

    pub(super) fn notify(&self, signal: &Signal) {
        let Some(event) = &self.event else {
            return;
        };
        // Pairs with the fence in `Signal::add_waiter`.
        fence(Ordering::SeqCst);
        if signal.waiting.load(Ordering::Relaxed) != 0 {
            signal.runtime.events().set_event(event);
        }
    }

    pub(super) fn free(&self, runtime: &Runtime) {
        match &self.event {
            Some(event) if self.pooled => runtime.events().free(Arc::clone(event)),
            Some(event) => runtime.events().destroy_event(event),
            None => {},
        }
    }
}

pub(super) fn wait(
    signal: &Signal,
    ev: &InterruptEvent,
    prior_waiters: u32,
    condition: SignalCondition,
    compare: SignalValue,
    timeout: u64,
    hint: WaitState,
) -> SignalValue {
    let event = match ev.event() {
        Some(event) if prior_waiters == 0 && hint == WaitState::Blocked => event,
        _ => {
            let hint = if prior_waiters == 0 { hint } else { WaitState::Active };
            return busy_wait::wait(signal, condition, compare, timeout, hint);
        },
    };

    let clock = WaitClock::start(signal.runtime.clock(), timeout);
    loop {
        if !signal.is_valid() {
            return 0;
        }

        let value = signal.value().load(Ordering::Relaxed);
        if condition.is_satisfied(value, compare) || clock.expired() {
            return value;
        }

        if clock.in_grace() {
            core::hint::spin_loop();
            continue;
        }

        signal.runtime.events().wait_on_event(event, clock.remaining_ms());
    }
}
