//! FIFO of pending calls shared by workers (enqueue) and the main thread (drain)

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

use crate::call::Runnable;
use crate::error::TrampolineError;

struct QueueState {
    calls: VecDeque<Box<dyn Runnable>>,
    stopped: bool,
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DrainOutcome {
    pub ran: usize,
    /// Budget hit with calls left → caller must schedule another drain
    pub reschedule: bool,
}

pub(crate) struct CallQueue {
    state: Mutex<QueueState>,
    /// A drain callback is outstanding on the event loop
    drain_scheduled: AtomicBool,
    next_id: AtomicU64,
}

impl CallQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                calls: VecDeque::new(),
                stopped: false,
            }),
            drain_scheduled: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().calls.len()
    }

    /// Append call; Ok(true) when the caller must schedule a drain
    pub(crate) fn push(&self, call: Box<dyn Runnable>) -> Result<bool, TrampolineError> {
        let mut state = self.lock();
        if state.stopped {
            return Err(TrampolineError::Stopped);
        }
        trace!(id = call.id(), depth = state.calls.len(), "Enqueue");
        state.calls.push_back(call);
        drop(state);
        Ok(self.claim_schedule())
    }

    /// Take the outstanding-drain flag; true when the caller must schedule
    pub(crate) fn claim_schedule(&self) -> bool {
        !self.drain_scheduled.swap(true, Ordering::SeqCst)
    }

    /// Drain callback could not be scheduled; allow the next push to retry
    pub(crate) fn cancel_scheduled(&self) {
        self.drain_scheduled.store(false, Ordering::SeqCst);
    }

    /// Withdraw call `id` before it runs; None if already taken by a drain
    pub(crate) fn remove(&self, id: u64) -> Option<Box<dyn Runnable>> {
        let mut state = self.lock();
        let index = state.calls.iter().position(|call| call.id() == id)?;
        state.calls.remove(index)
    }

    fn pop(&self) -> Option<Box<dyn Runnable>> {
        self.lock().calls.pop_front()
    }

    /// Run queued calls in FIFO order (main thread only)
    /// Lock is released while each call runs, so calls may enqueue more work
    pub(crate) fn drain(&self, budget: Option<usize>) -> DrainOutcome {
        // Cleared first: a push racing this drain schedules a fresh callback
        self.drain_scheduled.store(false, Ordering::SeqCst);

        let mut ran = 0;
        while budget.is_none_or(|limit| ran < limit) {
            let Some(call) = self.pop() else {
                break;
            };
            call.run();
            ran += 1;
        }

        let left = self.len();
        let reschedule = left > 0 && self.claim_schedule();
        if ran > 0 {
            debug!(ran, left, "Drained main-thread queue");
        }
        DrainOutcome { ran, reschedule }
    }

    /// Fail everything still queued, without running it
    pub(crate) fn reject_all<E>(&self, make_err: E) -> usize
    where
        E: Fn() -> TrampolineError,
    {
        let pending: Vec<_> = self.lock().calls.drain(..).collect();
        let count = pending.len();
        for call in pending {
            call.reject(make_err());
        }
        count
    }

    /// Refuse further pushes and fail everything still queued
    pub(crate) fn shutdown(&self) -> usize {
        self.lock().stopped = true;
        self.reject_all(|| TrampolineError::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{PendingCall, PostedCall};
    use std::sync::{Arc, Mutex};

    fn recorder(log: &Arc<Mutex<Vec<u32>>>, value: u32) -> Box<dyn Runnable> {
        let log = Arc::clone(log);
        Box::new(PostedCall::new(value as u64, move || {
            log.lock().unwrap().push(value);
        }))
    }

    // ========== Push / Schedule Tests ==========

    #[test]
    fn test_first_push_requests_drain() {
        let queue = CallQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        assert!(queue.push(recorder(&log, 1)).unwrap());
        // Drain already outstanding → no second wake-up
        assert!(!queue.push(recorder(&log, 2)).unwrap());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_cancel_scheduled_allows_retry() {
        let queue = CallQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        assert!(queue.push(recorder(&log, 1)).unwrap());
        queue.cancel_scheduled();
        assert!(queue.push(recorder(&log, 2)).unwrap());
    }

    #[test]
    fn test_remove_withdraws_only_that_call() {
        let queue = CallQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.push(recorder(&log, 1)).unwrap();
        queue.push(recorder(&log, 2)).unwrap();
        queue.push(recorder(&log, 3)).unwrap();

        let removed = queue.remove(2).expect("call 2 queued");
        assert_eq!(removed.id(), 2);
        assert!(queue.remove(2).is_none());
        assert_eq!(queue.len(), 2);

        queue.drain(None);
        assert_eq!(*log.lock().unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_reject_all_keeps_accepting() {
        let queue = CallQueue::new();
        let (call, completion) = PendingCall::new(queue.next_id(), || 1u32);
        queue.push(Box::new(call)).unwrap();

        assert_eq!(queue.reject_all(|| TrampolineError::Stopped), 1);
        assert_eq!(queue.len(), 0);
        assert!(!queue.is_stopped());
        assert!(matches!(
            completion.wait(1, None),
            Err(TrampolineError::Stopped)
        ));
    }

    #[test]
    fn test_ids_increase() {
        let queue = CallQueue::new();
        let a = queue.next_id();
        let b = queue.next_id();
        assert!(b > a);
    }

    // ========== Drain Tests ==========

    #[test]
    fn test_drain_fifo_order() {
        let queue = CallQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            queue.push(recorder(&log, i)).unwrap();
        }
        let outcome = queue.drain(None);
        assert_eq!(outcome, DrainOutcome { ran: 5, reschedule: false });
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_drain_budget_requests_reschedule() {
        let queue = CallQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            queue.push(recorder(&log, i)).unwrap();
        }
        let first = queue.drain(Some(2));
        assert_eq!(first, DrainOutcome { ran: 2, reschedule: true });
        assert_eq!(*log.lock().unwrap(), vec![0, 1]);

        // Rescheduled drain outstanding → pushes don't request another
        assert!(!queue.push(recorder(&log, 5)).unwrap());

        let second = queue.drain(Some(10));
        assert_eq!(second, DrainOutcome { ran: 4, reschedule: false });
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_drain_empty() {
        let queue = CallQueue::new();
        assert_eq!(queue.drain(None), DrainOutcome { ran: 0, reschedule: false });
    }

    #[test]
    fn test_call_enqueued_during_drain_runs_same_pass() {
        let queue = Arc::new(CallQueue::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_queue = Arc::clone(&queue);
        let inner_log = Arc::clone(&log);
        queue
            .push(Box::new(PostedCall::new(1, move || {
                inner_log.lock().unwrap().push(1);
                let log = Arc::clone(&inner_log);
                inner_queue
                    .push(Box::new(PostedCall::new(2, move || {
                        log.lock().unwrap().push(2);
                    })))
                    .unwrap();
            })))
            .unwrap();

        let outcome = queue.drain(None);
        assert_eq!(outcome.ran, 2);
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    // ========== Shutdown Tests ==========

    #[test]
    fn test_shutdown_fails_pending_and_rejects_new() {
        let queue = CallQueue::new();
        let (call, completion) = PendingCall::new(queue.next_id(), || 1u32);
        queue.push(Box::new(call)).unwrap();

        assert_eq!(queue.shutdown(), 1);
        assert!(queue.is_stopped());
        assert!(matches!(
            completion.wait(1, None),
            Err(TrampolineError::Stopped)
        ));

        let log = Arc::new(Mutex::new(Vec::new()));
        assert!(matches!(
            queue.push(recorder(&log, 9)),
            Err(TrampolineError::Stopped)
        ));
    }
}
