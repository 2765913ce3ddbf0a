//! Error types for main-trampoline

use std::any::Any;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Trampolined call errors
#[derive(Debug, Error)]
pub enum TrampolineError {
    #[error("main thread did not run call within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error(transparent)]
    Execution(#[from] ExecutionFailure),

    #[error("main context stopped")]
    Stopped,

    #[error("schedule on main thread failed: {0}")]
    Schedule(#[from] AdapterError),
}

impl TrampolineError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TrampolineError::Timeout { .. })
    }
}

/// Panic captured on the main thread, carried back to the caller
#[derive(Error)]
#[error("call panicked on main thread: {message}")]
pub struct ExecutionFailure {
    message: String,
    payload: Mutex<Box<dyn Any + Send>>,
}

impl ExecutionFailure {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = panic_message(payload.as_ref());
        Self {
            message,
            payload: Mutex::new(payload),
        }
    }

    /// Panic message (`&str` / `String` payloads), or a placeholder
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Original panic payload
    pub fn into_payload(self) -> Box<dyn Any + Send> {
        self.payload
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Re-raise the original panic in the calling thread
    pub fn into_panic(self) -> ! {
        std::panic::resume_unwind(self.into_payload())
    }
}

impl fmt::Debug for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionFailure")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Event loop adapter errors
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("event loop gone")]
    Disconnected,

    #[error("no drain could be scheduled for queued call")]
    Unscheduled,

    /// Native loop failure; the source keeps the platform error intact
    #[error("platform event loop: {0}")]
    Platform(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Strict wait errors
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("{what} unresolved after {waited:?}")]
    Unresolved { what: String, waited: Duration },

    #[error(transparent)]
    Call(#[from] TrampolineError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}={value:?} → not a non-negative integer")]
    InvalidNumber { key: &'static str, value: String },
}
