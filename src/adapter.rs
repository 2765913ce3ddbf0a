//! Event loop adapters: "run this callback on the main thread ASAP"

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError, channel};
use std::time::{Duration, Instant};
use tracing::trace;

use crate::error::AdapterError;

/// Callback handed to the host loop
pub type MainCallback = Box<dyn FnOnce() + Send + 'static>;

/// Host event loop hook
///
/// Implementations queue `callback` so the main thread runs it on its next
/// loop iteration. Must not run it inline on the calling thread.
pub trait EventLoopAdapter: Send + Sync + 'static {
    fn schedule(&self, callback: MainCallback) -> Result<(), AdapterError>;
}

impl<A: EventLoopAdapter + ?Sized> EventLoopAdapter for std::sync::Arc<A> {
    fn schedule(&self, callback: MainCallback) -> Result<(), AdapterError> {
        (**self).schedule(callback)
    }
}

/// Channel-backed loop pumped explicitly by the main thread
///
/// For hosts without a toolkit loop (tests, CLI tools), or to embed in a
/// loop that can poll once per frame.
pub struct PumpLoop {
    rx: Receiver<MainCallback>,
    tx: Sender<MainCallback>,
}

/// Cloneable, thread-safe side of a `PumpLoop`
#[derive(Clone)]
pub struct PumpHandle {
    tx: Sender<MainCallback>,
}

impl EventLoopAdapter for PumpHandle {
    fn schedule(&self, callback: MainCallback) -> Result<(), AdapterError> {
        self.tx.send(callback).map_err(|_| AdapterError::Disconnected)
    }
}

impl Default for PumpLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl PumpLoop {
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self { rx, tx }
    }

    pub fn handle(&self) -> PumpHandle {
        PumpHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run callbacks already queued, without blocking
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(callback) => {
                    callback();
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        ran
    }

    /// Run callbacks as they arrive for `duration`
    pub fn pump_for(&self, duration: Duration) -> usize {
        let deadline = Instant::now() + duration;
        let mut ran = 0;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.rx.recv_timeout(deadline - now) {
                Ok(callback) => {
                    callback();
                    ran += 1;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        ran
    }

    /// Run callbacks until `done()` holds; `done` is checked at least every `tick`
    pub fn run_until<F>(&self, mut done: F, tick: Duration) -> usize
    where
        F: FnMut() -> bool,
    {
        let mut ran = 0;
        while !done() {
            match self.rx.recv_timeout(tick) {
                Ok(callback) => {
                    callback();
                    ran += 1;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        trace!(ran, "Pump loop finished");
        ran
    }
}
