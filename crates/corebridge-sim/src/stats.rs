//! Counters observed by tests.

use std::sync::atomic::{AtomicUsize, Ordering};

macro_rules! counters {
    ($($name:ident),* $(,)?) => {
        #[derive(Debug, Default)]
        pub struct SimStats {
            $($name: AtomicUsize,)*
        }

        impl SimStats {
            $(
                pub fn $name(&self) -> usize {
                    self.$name.load(Ordering::SeqCst)
                }
            )*
        }
    };
}

counters!(
    byte_arrays_allocated,
    byte_arrays_freed,
    double_frees,
    clients_created,
    clients_freed,
    workers_created,
    workers_freed,
    use_after_free,
    client_replacements,
    callbacks_fired,
    freed_with_pending_calls,
);

#[derive(Debug, Clone, Copy)]
pub(crate) enum Counter {
    ByteArraysAllocated,
    ByteArraysFreed,
    DoubleFrees,
    ClientsCreated,
    ClientsFreed,
    WorkersCreated,
    WorkersFreed,
    UseAfterFree,
    ClientReplacements,
    CallbacksFired,
    FreedWithPendingCalls,
}

impl SimStats {
    pub(crate) fn bump(&self, counter: Counter) {
        let slot = match counter {
            Counter::ByteArraysAllocated => &self.byte_arrays_allocated,
            Counter::ByteArraysFreed => &self.byte_arrays_freed,
            Counter::DoubleFrees => &self.double_frees,
            Counter::ClientsCreated => &self.clients_created,
            Counter::ClientsFreed => &self.clients_freed,
            Counter::WorkersCreated => &self.workers_created,
            Counter::WorkersFreed => &self.workers_freed,
            Counter::UseAfterFree => &self.use_after_free,
            Counter::ClientReplacements => &self.client_replacements,
            Counter::CallbacksFired => &self.callbacks_fired,
            Counter::FreedWithPendingCalls => &self.freed_with_pending_calls,
        };
        slot.fetch_add(1, Ordering::SeqCst);
    }
}
