//! Trampoline: marshal closures from any thread onto the main thread

use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{error, trace, warn};

use crate::adapter::EventLoopAdapter;
use crate::call::{PendingCall, PostedCall, run_guarded};
use crate::config::TrampolineConfig;
use crate::error::{AdapterError, TrampolineError};
use crate::queue::CallQueue;

/// State shared by the context, every trampoline and scheduled drain callbacks
pub(crate) struct Shared {
    pub(crate) main_id: ThreadId,
    pub(crate) queue: CallQueue,
    adapter: Box<dyn EventLoopAdapter>,
    pub(crate) config: TrampolineConfig,
}

impl Shared {
    pub(crate) fn new(
        main_id: ThreadId,
        adapter: Box<dyn EventLoopAdapter>,
        config: TrampolineConfig,
    ) -> Self {
        Self {
            main_id,
            queue: CallQueue::new(),
            adapter,
            config,
        }
    }

    pub(crate) fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_id
    }

    /// Ask the host loop to run one drain pass
    fn schedule_drain(self: &Arc<Self>) -> Result<(), TrampolineError> {
        let shared = Arc::clone(self);
        self.adapter
            .schedule(Box::new(move || shared.drain_callback()))
            .map_err(|e| {
                self.queue.cancel_scheduled();
                TrampolineError::from(e)
            })
    }

    /// Body of the scheduled callback
    fn drain_callback(self: Arc<Self>) {
        if !self.is_main_thread() {
            error!(
                thread = ?thread::current().id(),
                "Adapter ran drain off the main thread → refused"
            );
            self.queue.cancel_scheduled();
            return;
        }
        let outcome = self.queue.drain(self.config.drain_budget);
        if outcome.reschedule
            && let Err(e) = self.schedule_drain()
        {
            error!("Drain reschedule failed: {e}");
            self.fail_stranded(&e);
        }
    }

    /// Take call `id` back after its drain could not be scheduled
    ///
    /// Returns false when a drain already took the call (it will run). Calls
    /// queued by other threads behind the failed wake-up get one retry; if
    /// that fails too they are failed rather than left to run at some later
    /// drain.
    fn withdraw(self: &Arc<Self>, id: u64) -> bool {
        let withdrawn = self.queue.remove(id).is_some();
        if withdrawn {
            trace!(id, "Drain not scheduled → call withdrawn");
        }
        if self.queue.len() > 0
            && self.queue.claim_schedule()
            && let Err(e) = self.schedule_drain()
        {
            self.fail_stranded(&e);
        }
        withdrawn
    }

    /// Fail queued calls that no drain will pick up
    fn fail_stranded(&self, cause: &TrampolineError) {
        let stranded = self
            .queue
            .reject_all(|| TrampolineError::Schedule(AdapterError::Unscheduled));
        if stranded > 0 {
            warn!(stranded, "No drain scheduled → queued calls failed: {cause}");
        }
    }
}

/// Handle for sending work to the main thread
///
/// Cheap to clone and `Send + Sync`; obtained from `MainContext::trampoline`.
#[derive(Clone)]
pub struct Trampoline {
    pub(crate) shared: Arc<Shared>,
}

impl Trampoline {
    pub fn is_main_thread(&self) -> bool {
        self.shared.is_main_thread()
    }

    pub fn config(&self) -> &TrampolineConfig {
        &self.shared.config
    }

    /// Run `func` on the main thread and return its result
    /// Waits at most the configured default timeout.
    pub fn call<F, T>(&self, func: F) -> Result<T, TrampolineError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.call_timeout(func, self.shared.config.default_timeout)
    }

    /// Run `func` on the main thread, waiting at most `timeout` (None = forever)
    ///
    /// On the main thread `func` runs inline, without queueing. Elsewhere the
    /// caller blocks until the main thread has run it. A panic in `func` is
    /// caught on the main thread and returned as `TrampolineError::Execution`.
    ///
    /// On timeout a call that has not started is skipped; one already running
    /// finishes and its result is dropped.
    pub fn call_timeout<F, T>(&self, func: F, timeout: Option<Duration>) -> Result<T, TrampolineError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let queue = &self.shared.queue;
        if queue.is_stopped() {
            return Err(TrampolineError::Stopped);
        }

        if self.is_main_thread() {
            trace!("Call on main thread → inline");
            return run_guarded(func);
        }

        let id = queue.next_id();
        let (call, completion) = PendingCall::new(id, func);
        if queue.push(Box::new(call))?
            && let Err(e) = self.shared.schedule_drain()
            && self.shared.withdraw(id)
        {
            return Err(e);
        }

        trace!(id, ?timeout, "Waiting on main thread");
        completion.wait(id, timeout)
    }

    /// Queue `func` for the main thread without waiting
    ///
    /// Always queued, even from the main thread, so it never runs inside the
    /// current callback. Panics are logged and dropped. On `Err` the closure
    /// has been dropped and will never run.
    pub fn post<F>(&self, func: F) -> Result<(), TrampolineError>
    where
        F: FnOnce() + Send + 'static,
    {
        let queue = &self.shared.queue;
        let id = queue.next_id();
        if queue.push(Box::new(PostedCall::new(id, func)))?
            && let Err(e) = self.shared.schedule_drain()
            && self.shared.withdraw(id)
        {
            return Err(e);
        }
        trace!(id, "Posted");
        Ok(())
    }
}
