//! Pending call: queued closure + completion slot shared with the waiting caller

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{trace, warn};

use crate::error::{ExecutionFailure, TrampolineError};

/// Call lifecycle: Queued → Running → Done, or → Abandoned (caller gave up)
const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const ABANDONED: u8 = 2;
const DONE: u8 = 3;

/// Run a closure, converting a panic into `ExecutionFailure`
pub(crate) fn run_guarded<F, T>(func: F) -> Result<T, TrampolineError>
where
    F: FnOnce() -> T,
{
    catch_unwind(AssertUnwindSafe(func))
        .map_err(|payload| TrampolineError::from(ExecutionFailure::from_panic(payload)))
}

/// Type-erased queue entry, consumed on the main thread
pub(crate) trait Runnable: Send {
    fn id(&self) -> u64;

    /// Execute (main thread only)
    fn run(self: Box<Self>);

    /// Fail without executing (shutdown, or no drain could be scheduled)
    fn reject(self: Box<Self>, err: TrampolineError);
}

/// Completion signal + result slot
pub(crate) struct Completion<T> {
    state: AtomicU8,
    slot: Mutex<Option<Result<T, TrampolineError>>>,
    done: Condvar,
}

impl<T> Completion<T> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(QUEUED),
            slot: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<Result<T, TrampolineError>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queued → Running; false if the caller already gave up
    fn begin(&self) -> bool {
        self.state
            .compare_exchange(QUEUED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Write result once + raise signal; dropped if caller abandoned
    fn finish(&self, result: Result<T, TrampolineError>) -> bool {
        let mut slot = self.lock_slot();
        if self.state.load(Ordering::SeqCst) != RUNNING {
            return false;
        }
        *slot = Some(result);
        self.state.store(DONE, Ordering::SeqCst);
        self.done.notify_all();
        true
    }

    /// Caller gives up; returns previous state
    #[cfg(test)]
    fn abandon(&self) -> u8 {
        let _slot = self.lock_slot();
        self.abandon_locked()
    }

    fn abandon_locked(&self) -> u8 {
        // Done is terminal; anything else becomes Abandoned
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if current == DONE {
                return DONE;
            }
            match self.state.compare_exchange(
                current,
                ABANDONED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(prev) => return prev,
                Err(actual) => current = actual,
            }
        }
    }

    /// Block until the result is written or `timeout` elapses
    pub(crate) fn wait(&self, id: u64, timeout: Option<Duration>) -> Result<T, TrampolineError> {
        let slot = self.lock_slot();
        let mut slot = match timeout {
            None => self
                .done
                .wait_while(slot, |s| s.is_none())
                .unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                let (slot, _) = self
                    .done
                    .wait_timeout_while(slot, timeout, |s| s.is_none())
                    .unwrap_or_else(PoisonError::into_inner);
                if slot.is_none() {
                    // Lock still held: main thread cannot write the slot now
                    match self.abandon_locked() {
                        QUEUED => warn!(id, ?timeout, "Call timed out → dropped before start"),
                        RUNNING => warn!(id, ?timeout, "Call timed out → running, result discarded"),
                        _ => {}
                    }
                    return Err(TrampolineError::Timeout { timeout });
                }
                slot
            }
        };
        slot.take().unwrap_or(Err(TrampolineError::Stopped))
    }
}

/// Call whose caller blocks on the result
pub(crate) struct PendingCall<F, T> {
    id: u64,
    func: F,
    completion: Arc<Completion<T>>,
}

impl<F, T> PendingCall<F, T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    pub(crate) fn new(id: u64, func: F) -> (Self, Arc<Completion<T>>) {
        let completion = Arc::new(Completion::new());
        let call = Self {
            id,
            func,
            completion: Arc::clone(&completion),
        };
        (call, completion)
    }
}

impl<F, T> Runnable for PendingCall<F, T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    fn id(&self) -> u64 {
        self.id
    }

    fn run(self: Box<Self>) {
        let PendingCall {
            id,
            func,
            completion,
        } = *self;

        if !completion.begin() {
            trace!(id, "Call abandoned before start → skipped");
            return;
        }

        let result = run_guarded(func);
        if let Err(e) = &result {
            warn!(id, "Call failed: {e}");
        }
        if !completion.finish(result) {
            trace!(id, "Caller gone → result dropped");
        }
    }

    fn reject(self: Box<Self>, err: TrampolineError) {
        if self.completion.begin() {
            self.completion.finish(Err(err));
        }
    }
}

/// Fire-and-forget call: nobody waits, failures are only logged
pub(crate) struct PostedCall<F> {
    id: u64,
    func: F,
}

impl<F> PostedCall<F>
where
    F: FnOnce() + Send + 'static,
{
    pub(crate) fn new(id: u64, func: F) -> Self {
        Self { id, func }
    }
}

impl<F> Runnable for PostedCall<F>
where
    F: FnOnce() + Send + 'static,
{
    fn id(&self) -> u64 {
        self.id
    }

    fn run(self: Box<Self>) {
        let id = self.id;
        if let Err(e) = run_guarded(self.func) {
            warn!(id, "Posted call failed: {e}");
        }
    }

    fn reject(self: Box<Self>, err: TrampolineError) {
        warn!(id = self.id, "Posted call dropped: {err}");
    }
}
