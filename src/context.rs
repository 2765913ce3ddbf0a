//! Main thread context: designates the main thread and owns the loop adapter

use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

use crate::adapter::EventLoopAdapter;
use crate::config::TrampolineConfig;
use crate::trampoline::{Shared, Trampoline};

/// Created once on the main thread when the host loop starts
///
/// Not `Send`: it stays on the thread it designates. Dropping it (or calling
/// `shutdown`) stops the trampolines handed out from it.
pub struct MainContext {
    shared: Arc<Shared>,
    _main_thread_only: PhantomData<*const ()>,
}

impl MainContext {
    /// Designate the current thread as main
    pub fn new<A: EventLoopAdapter>(adapter: A) -> Self {
        Self::with_config(adapter, TrampolineConfig::default())
    }

    pub fn with_config<A: EventLoopAdapter>(adapter: A, config: TrampolineConfig) -> Self {
        let main_id = thread::current().id();
        info!(thread = ?main_id, ?config, "Main context started");
        Self {
            shared: Arc::new(Shared::new(main_id, Box::new(adapter), config)),
            _main_thread_only: PhantomData,
        }
    }

    pub fn trampoline(&self) -> Trampoline {
        Trampoline {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_main_thread(&self) -> bool {
        self.shared.is_main_thread()
    }

    /// Calls waiting in the queue
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Run every queued call now, in FIFO order
    /// For hosts that poll instead of relying on scheduled callbacks.
    pub fn drain(&self) -> usize {
        let ran = self.shared.queue.drain(None).ran;
        debug!(ran, "Manual drain");
        ran
    }

    /// Stop accepting calls; queued calls fail with `Stopped`
    pub fn shutdown(&self) {
        if self.shared.queue.is_stopped() {
            return;
        }
        let failed = self.shared.queue.shutdown();
        info!(failed, "Main context stopped");
    }
}

impl Drop for MainContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
