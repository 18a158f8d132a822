//! Doorbell signals.
//!
//! A doorbell is write-only: storing a write index rings the queue. AQL
//! doorbells forward the value to the 64-bit register. Legacy doorbells
//! translate it to a dispatch id under the queue's doorbell lock and only
//! ring when the id moves past the last one published, because the
//! firmware mis-handles a doorbell that goes backwards.

use core::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use helix_stream_hal::{DoorbellKind, DoorbellRegister};

use crate::abi::SharedQueue;
use crate::pool::BlockRef;
use crate::types::{MachineModel, SignalValue};

/// What a doorbell signal rings
#[derive(Debug)]
pub(crate) struct DoorbellTarget {
    queue: BlockRef<SharedQueue>,
    register: Arc<DoorbellRegister>,
    kind: DoorbellKind,
    model: MachineModel,
}

impl DoorbellTarget {
    pub(crate) fn new(
        queue: BlockRef<SharedQueue>,
        register: Arc<DoorbellRegister>,
        kind: DoorbellKind,
        model: MachineModel,
    ) -> Self {
        Self {
            queue,
            register,
            kind,
            model,
        }
    }

    pub(crate) fn register(&self) -> &Arc<DoorbellRegister> {
        &self.register
    }

    pub(crate) fn ring(&self, value: SignalValue, order: Ordering) {
        if matches!(order, Ordering::Release | Ordering::AcqRel | Ordering::SeqCst) {
            fence(Ordering::Release);
        }
        match self.kind {
            DoorbellKind::Hardware => self.register.write64(value as u64),
            DoorbellKind::Legacy => self.ring_legacy(value),
        }
    }

    fn ring_legacy(&self, value: SignalValue) {
        let queue = &*self.queue;

        while queue
            .legacy_doorbell_lock
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::thread::yield_now();
        }

        let dispatch_id = match self.model {
            MachineModel::Large => (value as u64).wrapping_add(1),
            MachineModel::Small => {
                let write = queue.write_dispatch_id.load(Ordering::Relaxed);
                let read = queue.read_dispatch_id.load(Ordering::Relaxed);
                write.min(read + u64::from(queue.size()))
            },
        };

        let last = queue.max_legacy_doorbell_dispatch_id_plus_1.load(Ordering::Relaxed);
        if dispatch_id > last {
            queue
                .max_legacy_doorbell_dispatch_id_plus_1
                .store(dispatch_id, Ordering::Release);
            self.register.write32(dispatch_id as u32);
        } else {
            log::trace!(
                "legacy doorbell: dropped dispatch id {} (last {})",
                dispatch_id,
                last
            );
        }

        queue.legacy_doorbell_lock.store(0, Ordering::Release);
    }
}
