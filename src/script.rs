//! Scripts: sequential routines that hop between a background thread and the
//! main thread
//!
//! A script body runs on its own thread. Steps that touch the UI go through
//! [`Script::main`]; blocking steps (`sleep`, `bounce`, polling delays) stay in
//! the background so the main loop keeps running between them.
//!
//! ```no_run
//! # use main_trampoline::{MainContext, PumpLoop, WaitError, WaitOptions};
//! # use std::time::Duration;
//! let pump = PumpLoop::new();
//! let ctx = MainContext::new(pump.handle());
//! let script = ctx.trampoline().spawn_script("open-dialog", |s| -> Result<bool, WaitError> {
//!     s.main(|| println!("on the main thread"))?;
//!     s.sleep(Duration::from_secs(1));
//!     let ready = s.wait_for("dialog ready", || Some(true), WaitOptions::default())?;
//!     Ok(ready.is_some())
//! });
//! # let _ = script;
//! ```

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, debug_span};

use crate::error::{TrampolineError, WaitError};
use crate::trampoline::Trampoline;

/// Polling options for [`Script::wait_for`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub repeat_delay: Duration,
    /// Unresolved check → `WaitError::Unresolved` instead of `Ok(None)`
    pub strict: bool,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            repeat_delay: Duration::from_millis(33),
            strict: false,
        }
    }
}

impl WaitOptions {
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Handle passed to a running script body
pub struct Script {
    name: String,
    trampoline: Trampoline,
}

impl Script {
    pub fn new(name: impl Into<String>, trampoline: Trampoline) -> Self {
        Self {
            name: name.into(),
            trampoline,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trampoline(&self) -> &Trampoline {
        &self.trampoline
    }

    /// Run `func` on the main thread
    pub fn main<F, T>(&self, func: F) -> Result<T, TrampolineError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        debug!("→ main thread");
        let result = self.trampoline.call(func);
        debug!(ok = result.is_ok(), "← main thread");
        result
    }

    /// Run blocking work here, off the main thread
    pub fn bounce<F, T>(&self, func: F) -> T
    where
        F: FnOnce() -> T,
    {
        debug!("bounce");
        func()
    }

    /// Sleep without holding up the main loop
    pub fn sleep(&self, duration: Duration) {
        debug!(?duration, "sleep");
        thread::sleep(duration);
    }

    /// Evaluate `check` on the main thread until it yields `Some`
    ///
    /// Sleeps `repeat_delay` between attempts, in the background. Gives up
    /// once `timeout` has elapsed: `Ok(None)`, or an error when `strict`.
    /// Each attempt waits at most the time left, so a stalled main thread
    /// counts as unresolved instead of blocking past `timeout`.
    pub fn wait_for<P, T>(
        &self,
        what: &str,
        check: P,
        options: WaitOptions,
    ) -> Result<Option<T>, WaitError>
    where
        P: Fn() -> Option<T> + Clone + Send + 'static,
        T: Send + 'static,
    {
        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let remaining = options.timeout.saturating_sub(started.elapsed());
            match self.trampoline.call_timeout(check.clone(), Some(remaining)) {
                Ok(Some(found)) => {
                    debug!(what, attempts, waited = ?started.elapsed(), "wait resolved");
                    return Ok(Some(found));
                }
                Ok(None) | Err(TrampolineError::Timeout { .. }) => {}
                Err(e) => return Err(e.into()),
            }
            let waited = started.elapsed();
            if waited >= options.timeout {
                debug!(what, attempts, ?waited, "wait unresolved");
                if options.strict {
                    return Err(WaitError::Unresolved {
                        what: what.to_string(),
                        waited,
                    });
                }
                return Ok(None);
            }
            thread::sleep(options.repeat_delay.min(options.timeout - waited));
        }
    }
}

impl Trampoline {
    /// Run `body` on a named background thread as a script
    pub fn spawn_script<F, T>(&self, name: &str, body: F) -> io::Result<JoinHandle<T>>
    where
        F: FnOnce(&Script) -> T + Send + 'static,
        T: Send + 'static,
    {
        let script = Script::new(name, self.clone());
        thread::Builder::new()
            .name(format!("script:{name}"))
            .spawn(move || {
                let span = debug_span!("script", name = %script.name);
                let _enter = span.enter();
                debug!("start");
                let out = body(&script);
                debug!("end");
                out
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::PumpLoop;
    use crate::context::MainContext;
    use std::sync::Arc;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn run_script<T: Send + 'static>(
        pump: &PumpLoop,
        handle: io::Result<JoinHandle<T>>,
    ) -> T {
        let handle = handle.expect("spawn failed");
        pump.run_until(|| handle.is_finished(), Duration::from_millis(5));
        handle.join().expect("script panicked")
    }

    #[test]
    fn test_wait_options_default() {
        let options = WaitOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert_eq!(options.repeat_delay, Duration::from_millis(33));
        assert!(!options.strict);
        assert!(options.strict().strict);
    }

    #[test]
    fn test_script_steps_alternate_threads() {
        let pump = PumpLoop::new();
        let ctx = MainContext::new(pump.handle());
        let main_id = thread::current().id();

        let handle = ctx.trampoline().spawn_script("alternate", |s| -> Result<_, TrampolineError> {
            let here = thread::current().id();
            let there = s.main(|| thread::current().id())?;
            let bounced = s.bounce(|| thread::current().id());
            s.sleep(Duration::from_millis(5));
            Ok((here, there, bounced, s.name().to_string()))
        });

        let (here, there, bounced, name) = run_script(&pump, handle).unwrap();
        assert_ne!(here, main_id);
        assert_eq!(there, main_id);
        assert_eq!(bounced, here);
        assert_eq!(name, "alternate");
    }

    #[test]
    fn test_script_thread_named() {
        let pump = PumpLoop::new();
        let ctx = MainContext::new(pump.handle());
        let handle = ctx
            .trampoline()
            .spawn_script("named", |_| thread::current().name().map(String::from));
        assert_eq!(run_script(&pump, handle).as_deref(), Some("script:named"));
    }

    #[test]
    fn test_main_step_panic_caught_in_script() {
        let pump = PumpLoop::new();
        let ctx = MainContext::new(pump.handle());
        let handle = ctx.trampoline().spawn_script("raise", |s| {
            match s.main(|| -> u32 { panic!("expected") }) {
                Err(TrampolineError::Execution(failure)) => failure.message() == "expected",
                _ => false,
            }
        });
        assert!(run_script(&pump, handle));
    }

    #[test]
    fn test_wait_for_resolves_after_attempts() {
        let pump = PumpLoop::new();
        let ctx = MainContext::new(pump.handle());
        let attempts = Arc::new(AtomicUsize::new(0));
        let check_attempts = Arc::clone(&attempts);

        let handle = ctx.trampoline().spawn_script("poll", move |s| {
            let check = move || {
                let n = check_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                (n >= 3).then_some(n)
            };
            let options = WaitOptions {
                repeat_delay: Duration::from_millis(1),
                ..WaitOptions::default()
            };
            s.wait_for("third attempt", check, options)
        });

        assert_eq!(run_script(&pump, handle).unwrap(), Some(3));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_wait_for_timeout_lenient() {
        let pump = PumpLoop::new();
        let ctx = MainContext::new(pump.handle());
        let handle = ctx.trampoline().spawn_script("never", |s| {
            let options = WaitOptions {
                timeout: Duration::from_millis(30),
                repeat_delay: Duration::from_millis(5),
                strict: false,
            };
            s.wait_for("never", || None::<u8>, options)
        });
        assert_eq!(run_script(&pump, handle).unwrap(), None);
    }

    #[test]
    fn test_wait_for_timeout_strict() {
        let pump = PumpLoop::new();
        let ctx = MainContext::new(pump.handle());
        let handle = ctx.trampoline().spawn_script("never-strict", |s| {
            let options = WaitOptions::default()
                .with_timeout(Duration::from_millis(30))
                .strict();
            s.wait_for("missing button", || None::<u8>, options)
        });
        match run_script(&pump, handle) {
            Err(WaitError::Unresolved { what, waited }) => {
                assert_eq!(what, "missing button");
                assert!(waited >= Duration::from_millis(30));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    // ========== Stalled Main Thread Tests ==========

    /// Join a script while the main loop is never pumped
    fn join_unpumped<T>(handle: io::Result<JoinHandle<T>>) -> (T, Duration) {
        let handle = handle.expect("spawn failed");
        let started = Instant::now();
        while !handle.is_finished() && started.elapsed() < Duration::from_secs(3) {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(handle.is_finished(), "wait_for blocked past its timeout");
        let elapsed = started.elapsed();
        (handle.join().expect("script panicked"), elapsed)
    }

    #[test]
    #[serial]
    fn test_wait_for_stalled_main_thread_lenient() {
        let pump = PumpLoop::new();
        let ctx = MainContext::new(pump.handle());
        let handle = ctx.trampoline().spawn_script("stalled", |s| {
            let options = WaitOptions::default().with_timeout(Duration::from_millis(100));
            s.wait_for("busy main thread", || Some(1u8), options)
        });

        let (result, elapsed) = join_unpumped(handle);
        assert_eq!(result.unwrap(), None);
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    #[serial]
    fn test_wait_for_stalled_main_thread_strict() {
        let pump = PumpLoop::new();
        let ctx = MainContext::new(pump.handle());
        let handle = ctx.trampoline().spawn_script("stalled-strict", |s| {
            let options = WaitOptions::default()
                .with_timeout(Duration::from_millis(100))
                .strict();
            s.wait_for("busy main thread", || Some(1u8), options)
        });

        let (result, elapsed) = join_unpumped(handle);
        match result {
            Err(WaitError::Unresolved { what, waited }) => {
                assert_eq!(what, "busy main thread");
                assert!(waited >= Duration::from_millis(100));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(elapsed < Duration::from_secs(1));
    }
}
