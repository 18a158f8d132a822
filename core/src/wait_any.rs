//! Waiting on the first of several signals.
//!
//! Every signal is retained and gets a waiter registered for the duration.
//! The caller may sleep only if every signal has an OS event and nobody else
//! was already waiting on any of them; otherwise it polls actively. Events
//! shared by several signals are waited on once.

use std::sync::Arc;

use arrayvec::ArrayVec;
use helix_stream_hal::{MemoryFault, OsEvent};

use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::signal::Signal;
use crate::time::WaitClock;
use crate::types::{SignalCondition, SignalValue, WaitState};

/// Signal counts whose event set stays on the stack
const INLINE_EVENTS: usize = 10;

enum EventSet {
    Inline(ArrayVec<Arc<OsEvent>, INLINE_EVENTS>),
    Heap(Vec<Arc<OsEvent>>),
}

impl EventSet {
    fn as_slice(&self) -> &[Arc<OsEvent>] {
        match self {
            Self::Inline(events) => events,
            Self::Heap(events) => events,
        }
    }
}

fn unique_events<'a>(signals: impl Iterator<Item = &'a Arc<OsEvent>>, count: usize) -> EventSet {
    fn dedup(events: &mut [Arc<OsEvent>]) -> usize {
        events.sort_unstable_by_key(|e| Arc::as_ptr(e) as usize);
        let mut unique = 0;
        for i in 0..events.len() {
            if unique == 0 || !Arc::ptr_eq(&events[i], &events[unique - 1]) {
                events.swap(unique, i);
                unique += 1;
            }
        }
        unique
    }

    if count <= INLINE_EVENTS {
        let mut set: ArrayVec<_, INLINE_EVENTS> = signals.cloned().collect();
        let unique = dedup(&mut set);
        set.truncate(unique);
        EventSet::Inline(set)
    } else {
        let mut set: Vec<_> = signals.cloned().collect();
        let unique = dedup(&mut set);
        set.truncate(unique);
        EventSet::Heap(set)
    }
}

/// Undo the retains and waiter registrations on every exit path
struct Registration<'a> {
    signals: &'a [Arc<Signal>],
    retained: usize,
    waiting: usize,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        for signal in &self.signals[..self.waiting] {
            signal.remove_waiter();
        }
        for signal in &self.signals[..self.retained] {
            signal.release();
        }
    }
}

/// Wait until one of `signals` satisfies its condition
///
/// Returns the index and observed value of the first satisfied signal, or of
/// a signal whose event reports a fatal memory fault. `None` means the
/// timeout elapsed or one of the signals became invalid.
pub(crate) fn wait_any_signal(
    runtime: &Runtime,
    signals: &[Arc<Signal>],
    conditions: &[SignalCondition],
    values: &[SignalValue],
    timeout: u64,
    mut hint: WaitState,
) -> Result<Option<(usize, SignalValue)>> {
    if signals.is_empty() || signals.len() != conditions.len() || signals.len() != values.len() {
        return Err(Error::InvalidArgument);
    }
    for signal in signals {
        signal.illegal_on_doorbell("wait");
    }

    let mut registration = Registration {
        signals,
        retained: 0,
        waiting: 0,
    };
    for signal in signals {
        if !signal.retain() {
            return Ok(None);
        }
        registration.retained += 1;
    }

    let mut prior = 0;
    for signal in signals {
        prior = prior.max(signal.add_waiter());
        registration.waiting += 1;
    }

    if prior != 0 || signals.iter().any(|s| s.eop_event().is_none()) {
        hint = WaitState::Active;
    }

    let events = match hint {
        WaitState::Blocked => Some(unique_events(
            signals.iter().filter_map(|s| s.eop_event()),
            signals.len(),
        )),
        WaitState::Active => None,
    };

    let clock = WaitClock::start(runtime.clock(), timeout);
    loop {
        for (i, signal) in signals.iter().enumerate() {
            if !signal.is_valid() {
                return Ok(None);
            }

            let fault = signal.eop_event().and_then(|event| event.fault());
            if let Some(fault) = fault.filter(|f| f.contains(MemoryFault::FATAL_PROCESS)) {
                report_memory_fault(runtime, signal, fault);
                return Ok(Some((i, signal.shared().value())));
            }

            let value = signal.shared().value();
            if conditions[i].is_satisfied(value, values[i]) {
                return Ok(Some((i, value)));
            }
        }

        if clock.expired() {
            return Ok(None);
        }

        match &events {
            None => std::thread::yield_now(),
            Some(_) if clock.in_grace() => core::hint::spin_loop(),
            Some(events) => {
                runtime.events().wait_on_multiple_events(events.as_slice(), false, clock.remaining_ms());
            },
        }
    }
}

fn report_memory_fault(runtime: &Runtime, signal: &Signal, fault: MemoryFault) {
    log::error!("memory fault on signal {:?}: {:?}", signal.handle(), fault);
    if runtime.flags().enable_vm_fault_message {
        eprintln!("Memory access fault on signal {:#x}:\n\t{:?}", signal.handle().raw(), fault);
    }
}
