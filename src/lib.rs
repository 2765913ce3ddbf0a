//! Main Trampoline: run closures on the GUI main thread from any thread
//!
//! ```text
//! Main thread                          Worker threads
//!   MainContext::new(adapter)            tramp.call(|| ...)   (blocks)
//!   host loop ─ adapter callback ─┐        │
//!                                 └─ drain queue (FIFO) ◄─ enqueue
//!                                        result ──────────► returned
//! ```
//!
//! The host loop is reached only through [`EventLoopAdapter`]. [`PumpLoop`]
//! covers hosts that can poll; `Win32Loop` covers a Win32 message loop.

mod adapter;
mod call;
mod config;
mod context;
mod error;
mod queue;
mod script;
mod trampoline;
#[cfg(windows)]
mod win32;

pub use adapter::{EventLoopAdapter, MainCallback, PumpHandle, PumpLoop};
pub use config::TrampolineConfig;
pub use context::MainContext;
pub use error::{AdapterError, ConfigError, ExecutionFailure, TrampolineError, WaitError};
pub use script::{Script, WaitOptions};
pub use trampoline::Trampoline;
#[cfg(windows)]
pub use win32::{WM_TRAMPOLINE, Win32Loop, Win32LoopError};
