//! Polling wait shared by every non-doorbell signal.

use core::sync::atomic::Ordering;

use super::Signal;
use crate::time::{WaitClock, SLEEP_STEP};
use crate::types::{SignalCondition, SignalValue, WaitState};

/// Poll until `condition` holds, the signal dies or the timeout passes
///
/// Spins through the grace period, then yields (`Active`) or sleeps in
/// small steps (`Blocked`).
pub(super) fn wait(
    signal: &Signal,
    condition: SignalCondition,
    compare: SignalValue,
    timeout: u64,
    hint: WaitState,
) -> SignalValue {
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

        match hint {
            WaitState::Active => std::thread::yield_now(),
            WaitState::Blocked => std::thread::sleep(SLEEP_STEP),
        }
    }
}
