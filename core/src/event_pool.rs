//! # Event Pool
//!
//! Recycles OS wait events for interrupt signals and runs the asynchronous
//! signal-handler thread.
//!
//! ## Event recycling
//!
//! Events handed back with [`EventPool::free`] are reset and reused before a
//! new one is requested from the device. Once the device refuses to create an
//! event the pool stops asking, and later interrupt signals fall back to
//! polling.
//!
//! ## Async handlers
//!
//! The first [`EventPool::set_async_signal_handler`] call starts one thread
//! (`helix-stream-async`) together with a private wake signal. Registrations
//! are staged under a lock and merged into the watch list at the top of the
//! dispatcher loop, which waits on the watch list plus the wake signal. A
//! handler returning `false` is removed; watches whose signal became invalid
//! are swept every round.

use core::sync::atomic::{AtomicBool, Ordering};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use helix_stream_hal::{Device, EventKind, EventWait, OsEvent};

use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::signal::{Signal, SignalOps};
use crate::time::WAIT_FOREVER;
use crate::types::{SignalAttributes, SignalCondition, SignalValue, WaitState};
use crate::wait_any::wait_any_signal;

/// Callback run by the async dispatcher
///
/// Receives the observed signal value; returning `false` unregisters it.
pub type AsyncHandler = Box<dyn FnMut(SignalValue) -> bool + Send>;

struct Watch {
    signal: Option<Arc<Signal>>,
    condition: SignalCondition,
    value: SignalValue,
    handler: AsyncHandler,
}

#[derive(Default)]
struct AsyncShared {
    staged: spin::Mutex<Vec<Watch>>,
    exit: AtomicBool,
}

struct Dispatcher {
    wake: Arc<Signal>,
    thread: JoinHandle<()>,
}

/// OS event pool and async dispatcher
pub struct EventPool {
    device: Arc<dyn Device>,
    free: spin::Mutex<Vec<Arc<OsEvent>>>,
    all_allocated: AtomicBool,
    shared: Arc<AsyncShared>,
    dispatcher: spin::Mutex<Option<Dispatcher>>,
}

impl EventPool {
    /// Create an empty pool over `device`
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            free: spin::Mutex::new(Vec::new()),
            all_allocated: AtomicBool::new(false),
            shared: Arc::default(),
            dispatcher: spin::Mutex::new(None),
        }
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Take an auto-reset signal event, or `None` once the device ran out
    pub fn alloc(&self) -> Option<Arc<OsEvent>> {
        if let Some(event) = self.free.lock().pop() {
            return Some(event);
        }
        if self.all_allocated.load(Ordering::Relaxed) {
            return None;
        }

        match self.device.create_event(EventKind::Signal, false) {
            Ok(event) => Some(event),
            Err(err) => {
                if !self.all_allocated.swap(true, Ordering::Relaxed) {
                    log::warn!("event pool: device refused a new event ({}), polling from now on", err);
                }
                None
            },
        }
    }

    /// Return an event taken with [`EventPool::alloc`]
    pub fn free(&self, event: Arc<OsEvent>) {
        event.reset();
        self.free.lock().push(event);
    }

    /// Events waiting for reuse
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    /// Create an event outside the pool
    pub fn create_event(&self, kind: EventKind, manual_reset: bool) -> Result<Arc<OsEvent>> {
        Ok(self.device.create_event(kind, manual_reset)?)
    }

    /// Destroy an event made with [`EventPool::create_event`]
    pub fn destroy_event(&self, event: &Arc<OsEvent>) {
        self.device.destroy_event(event);
    }

    /// Raise an event
    pub fn set_event(&self, event: &OsEvent) {
        self.device.set_event(event);
    }

    /// Block on one event
    pub fn wait_on_event(&self, event: &OsEvent, timeout_ms: u32) -> EventWait {
        self.device.wait_on_event(event, timeout_ms)
    }

    /// Block until any (or every) event is set
    pub fn wait_on_multiple_events(
        &self,
        events: &[Arc<OsEvent>],
        wait_all: bool,
        timeout_ms: u32,
    ) -> EventWait {
        self.device.wait_on_multiple_events(events, wait_all, timeout_ms)
    }

    // =========================================================================
    // Async handlers
    // =========================================================================

    /// Run `handler` whenever `signal` satisfies `condition` against `value`
    ///
    /// With no signal, `handler` is called once on the dispatcher thread with
    /// `value`. The signal is retained until the handler is unregistered.
    pub fn set_async_signal_handler(
        &self,
        runtime: &Arc<Runtime>,
        signal: Option<Arc<Signal>>,
        condition: SignalCondition,
        value: SignalValue,
        handler: AsyncHandler,
    ) -> Result<()> {
        if let Some(signal) = &signal {
            signal.illegal_on_doorbell("async handler");
            if !signal.retain() {
                return Err(Error::InvalidSignal);
            }
            if !signal.is_valid() {
                signal.release();
                return Err(Error::InvalidSignal);
            }
        }

        let wake = match self.dispatcher_wake(runtime) {
            Ok(wake) => wake,
            Err(err) => {
                if let Some(signal) = &signal {
                    signal.release();
                }
                return Err(err);
            },
        };

        self.shared.staged.lock().push(Watch {
            signal,
            condition,
            value,
            handler,
        });
        wake.store_release(1);
        Ok(())
    }

    fn dispatcher_wake(&self, runtime: &Arc<Runtime>) -> Result<Arc<Signal>> {
        let mut dispatcher = self.dispatcher.lock();
        if let Some(running) = dispatcher.as_ref() {
            return Ok(Arc::clone(&running.wake));
        }

        let wake = runtime.create_signal(0, &[], SignalAttributes::empty())?;
        let thread = {
            let runtime = Arc::clone(runtime);
            let wake = Arc::clone(&wake);
            let shared = Arc::clone(&self.shared);
            std::thread::Builder::new()
                .name("helix-stream-async".into())
                .spawn(move || dispatch(&runtime, &wake, &shared))
        };

        match thread {
            Ok(thread) => {
                log::debug!("event pool: async dispatcher started");
                *dispatcher = Some(Dispatcher {
                    wake: Arc::clone(&wake),
                    thread,
                });
                Ok(wake)
            },
            Err(err) => {
                log::error!("event pool: failed to spawn async dispatcher: {}", err);
                // Best effort; the wake signal has no other owner.
                let _ = wake.destroy();
                Err(Error::OutOfResources)
            },
        }
    }

    /// Whether the dispatcher thread is running
    pub fn dispatcher_running(&self) -> bool {
        self.dispatcher.lock().is_some()
    }

    /// Stop the dispatcher thread and release every registered signal
    ///
    /// Must not be called from an async handler.
    pub fn shutdown(&self) {
        let Some(dispatcher) = self.dispatcher.lock().take() else {
            return;
        };

        self.shared.exit.store(true, Ordering::Release);
        dispatcher.wake.store_release(1);
        if dispatcher.thread.join().is_err() {
            log::error!("event pool: async dispatcher panicked");
        }
        let _ = dispatcher.wake.destroy();

        let staged = core::mem::take(&mut *self.shared.staged.lock());
        for watch in staged.into_iter().filter_map(|w| w.signal) {
            watch.release();
        }
        self.shared.exit.store(false, Ordering::Release);
        log::debug!("event pool: async dispatcher stopped");
    }
}

impl Drop for EventPool {
    fn drop(&mut self) {
        for event in self.free.get_mut().drain(..) {
            self.device.destroy_event(&event);
        }
    }
}

impl fmt::Debug for EventPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPool")
            .field("idle", &self.idle())
            .field("all_allocated", &self.all_allocated.load(Ordering::Relaxed))
            .field("dispatcher", &self.dispatcher_running())
            .finish()
    }
}

// =============================================================================
// DISPATCHER
// =============================================================================

/// Watch list with the wake signal at index 0
struct WatchList {
    signals: Vec<Arc<Signal>>,
    conditions: Vec<SignalCondition>,
    values: Vec<SignalValue>,
    handlers: Vec<AsyncHandler>,
}

impl WatchList {
    fn new(wake: &Arc<Signal>) -> Self {
        Self {
            signals: vec![Arc::clone(wake)],
            conditions: vec![SignalCondition::Ne],
            values: vec![0],
            handlers: Vec::new(),
        }
    }

    fn push(&mut self, signal: Arc<Signal>, condition: SignalCondition, value: SignalValue, handler: AsyncHandler) {
        self.signals.push(signal);
        self.conditions.push(condition);
        self.values.push(value);
        self.handlers.push(handler);
    }

    fn remove(&mut self, index: usize) {
        let signal = self.signals.swap_remove(index);
        self.conditions.swap_remove(index);
        self.values.swap_remove(index);
        self.handlers.swap_remove(index - 1);
        signal.release();
    }

    fn sweep(&mut self) {
        let mut i = self.signals.len();
        while i > 1 {
            i -= 1;
            if !self.signals[i].is_valid() {
                self.remove(i);
            }
        }
    }

    fn release_all(&mut self) {
        while self.signals.len() > 1 {
            self.remove(self.signals.len() - 1);
        }
    }
}

fn dispatch(runtime: &Arc<Runtime>, wake: &Arc<Signal>, shared: &AsyncShared) {
    let mut list = WatchList::new(wake);

    loop {
        let staged = core::mem::take(&mut *shared.staged.lock());
        for watch in staged {
            let mut handler = watch.handler;
            match watch.signal {
                Some(signal) => list.push(signal, watch.condition, watch.value, handler),
                None => {
                    handler(watch.value);
                },
            }
        }

        if shared.exit.load(Ordering::Acquire) {
            break;
        }

        let hit = wait_any_signal(
            runtime,
            &list.signals,
            &list.conditions,
            &list.values,
            WAIT_FOREVER,
            WaitState::Blocked,
        );

        match hit {
            Ok(Some((0, _))) => wake.store_relaxed(0),
            Ok(Some((i, value))) => {
                if !(list.handlers[i - 1])(value) {
                    list.remove(i);
                }
            },
            Ok(None) => {},
            Err(err) => {
                log::error!("event pool: async wait failed: {}", err);
                break;
            },
        }

        list.sweep();
    }

    list.release_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeFlags;
    use helix_stream_hal::HostDevice;
    use std::sync::mpsc;
    use std::time::Duration;

    fn runtime() -> Arc<Runtime> {
        Runtime::new(Arc::new(HostDevice::default()), RuntimeFlags::default())
    }

    #[test]
    fn test_alloc_recycles() {
        let device = Arc::new(HostDevice::default().with_event_limit(1));
        let pool = EventPool::new(device.clone());

        let first = pool.alloc().unwrap();
        assert!(pool.alloc().is_none());
        first.set();
        pool.free(Arc::clone(&first));
        assert_eq!(pool.idle(), 1);

        let again = pool.alloc().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(!again.is_set());
        pool.free(again);
        drop(pool);
        assert_eq!(device.event_count(), 0);
    }

    #[test]
    fn test_handler_runs_until_false() {
        let rt = runtime();
        let signal = rt.create_signal(0, &[], SignalAttributes::empty()).unwrap();
        let (tx, rx) = mpsc::channel();

        let counter = Arc::clone(&signal);
        rt.events()
            .set_async_signal_handler(
                &rt,
                Some(Arc::clone(&signal)),
                SignalCondition::Gte,
                1,
                Box::new(move |value| {
                    tx.send(value).unwrap();
                    counter.store_relaxed(0);
                    false
                }),
            )
            .unwrap();
        assert!(rt.events().dispatcher_running());
        assert!(signal.ref_counts().1 >= 2);

        signal.store_release(5);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 5);

        for _ in 0..500 {
            if signal.ref_counts() == (1, 1) {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(signal.ref_counts(), (1, 1));

        rt.events().shutdown();
        assert!(!rt.events().dispatcher_running());
        signal.destroy().unwrap();
    }

    #[test]
    fn test_deferred_call() {
        let rt = runtime();
        let (tx, rx) = mpsc::channel();
        rt.events()
            .set_async_signal_handler(
                &rt,
                None,
                SignalCondition::Eq,
                42,
                Box::new(move |value| {
                    tx.send(value).unwrap();
                    false
                }),
            )
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        rt.events().shutdown();
    }

    #[test]
    fn test_destroyed_signal_is_swept() {
        let rt = runtime();
        let signal = rt.create_signal(0, &[], SignalAttributes::empty()).unwrap();
        rt.events()
            .set_async_signal_handler(
                &rt,
                Some(Arc::clone(&signal)),
                SignalCondition::Eq,
                7,
                Box::new(|_| true),
            )
            .unwrap();

        signal.destroy().unwrap();
        for _ in 0..500 {
            if signal.ref_counts() == (0, 0) {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(signal.ref_counts(), (0, 0));
        rt.events().shutdown();
    }

    #[test]
    fn test_shutdown_releases_watches() {
        let rt = runtime();
        let signal = rt.create_signal(0, &[], SignalAttributes::empty()).unwrap();
        rt.events()
            .set_async_signal_handler(
                &rt,
                Some(Arc::clone(&signal)),
                SignalCondition::Eq,
                7,
                Box::new(|_| true),
            )
            .unwrap();

        rt.events().shutdown();
        assert_eq!(signal.ref_counts(), (1, 1));
        signal.destroy().unwrap();
        assert_eq!(rt.live_signals(), 0);
    }

    #[test]
    fn test_rejects_dead_signal() {
        let rt = runtime();
        let signal = rt.create_signal(0, &[], SignalAttributes::empty()).unwrap();
        signal.destroy().unwrap();
        let err = rt.events().set_async_signal_handler(
            &rt,
            Some(signal),
            SignalCondition::Eq,
            0,
            Box::new(|_| true),
        );
        assert_eq!(err.unwrap_err(), Error::InvalidSignal);
        assert!(!rt.events().dispatcher_running());
    }
}
