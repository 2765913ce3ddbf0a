//! Win32 message loop adapter: wake the main thread through a message-only window
//!
//! Wake-ups are posted to a hidden `HWND_MESSAGE` window owned by the main
//! thread, so any loop that calls `DispatchMessageW` runs them. That includes
//! the modal loops of message boxes, menus and window move/resize, which
//! drop thread messages.

use std::collections::VecDeque;
use std::ffi::c_void;
use std::mem;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, trace};
use windows::Win32::Foundation::{GetLastError, HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, GWLP_USERDATA, GetWindowLongPtrW,
    HWND_MESSAGE, PostMessageW, RegisterClassExW, SetWindowLongPtrW, WINDOW_EX_STYLE,
    WINDOW_STYLE, WM_APP, WM_NCDESTROY, WNDCLASSEXW,
};
use windows::core::{PCWSTR, w};

use crate::adapter::{EventLoopAdapter, MainCallback};
use crate::error::AdapterError;

/// Message posted to the wake-up window; its window procedure runs the callbacks
pub const WM_TRAMPOLINE: u32 = WM_APP + 1;

const CLASS_NAME: PCWSTR = w!("MainTrampolineWake");

/// Win32 adapter errors
#[derive(Debug, Error)]
pub enum Win32LoopError {
    #[error("GetModuleHandleW failed: {0}")]
    ModuleHandle(#[source] windows::core::Error),

    #[error("RegisterClassExW failed: {0}")]
    RegisterClass(#[source] windows::core::Error),

    #[error("CreateWindowExW failed: {0}")]
    CreateWindow(#[source] windows::core::Error),

    #[error("PostMessageW(WM_TRAMPOLINE) failed: {0}")]
    PostMessage(#[source] windows::core::Error),
}

impl From<Win32LoopError> for AdapterError {
    fn from(err: Win32LoopError) -> Self {
        AdapterError::Platform(Box::new(err))
    }
}

struct Inner {
    /// Wake-up window; null once closed
    hwnd: AtomicPtr<c_void>,
    pending: Mutex<VecDeque<MainCallback>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, VecDeque<MainCallback>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_pending(&self) -> usize {
        let mut ran = 0;
        // Pop one at a time: callbacks may schedule more
        while let Some(callback) = self.lock().pop_front() {
            callback();
            ran += 1;
        }
        ran
    }
}

/// Adapter for any loop on the main thread that dispatches messages
///
/// Create it on the main thread. Call [`Win32Loop::close`] on that thread
/// when the loop ends; a window left open is destroyed with its thread.
#[derive(Clone)]
pub struct Win32Loop {
    inner: Arc<Inner>,
}

impl Win32Loop {
    /// Create the wake-up window on the current thread
    pub fn for_current_thread() -> Result<Self, Win32LoopError> {
        let hinstance: HINSTANCE = unsafe { GetModuleHandleW(None) }
            .map_err(Win32LoopError::ModuleHandle)?
            .into();
        register_class(hinstance)?;

        let hwnd = unsafe {
            CreateWindowExW(
                WINDOW_EX_STYLE::default(),
                CLASS_NAME,
                w!("main-trampoline"),
                WINDOW_STYLE::default(),
                0,
                0,
                0,
                0,
                Some(HWND_MESSAGE),
                None,
                Some(hinstance),
                None,
            )
        }
        .map_err(Win32LoopError::CreateWindow)?;

        let inner = Arc::new(Inner {
            hwnd: AtomicPtr::new(hwnd.0),
            pending: Mutex::new(VecDeque::new()),
        });
        // Window holds one reference; released on WM_NCDESTROY
        let raw = Arc::into_raw(Arc::clone(&inner));
        unsafe {
            SetWindowLongPtrW(hwnd, GWLP_USERDATA, raw as isize);
        }
        debug!(?hwnd, "Wake-up window created");
        Ok(Self { inner })
    }

    /// Wake-up window, or None once closed
    pub fn hwnd(&self) -> Option<HWND> {
        let hwnd = self.inner.hwnd.load(Ordering::SeqCst);
        (!hwnd.is_null()).then_some(HWND(hwnd))
    }

    /// Run every callback queued so far without waiting for the message
    pub fn run_pending(&self) -> usize {
        self.inner.run_pending()
    }

    /// Destroy the wake-up window (main thread only)
    ///
    /// Later `schedule` calls fail with `AdapterError::Disconnected`; callbacks
    /// not yet run are dropped.
    pub fn close(&self) {
        let hwnd = self.inner.hwnd.swap(null_mut(), Ordering::SeqCst);
        if hwnd.is_null() {
            return;
        }
        unsafe {
            let _ = DestroyWindow(HWND(hwnd));
        }
        let dropped = mem::take(&mut *self.inner.lock()).len();
        debug!(dropped, "Wake-up window closed");
    }
}

impl EventLoopAdapter for Win32Loop {
    fn schedule(&self, callback: MainCallback) -> Result<(), AdapterError> {
        let Some(hwnd) = self.hwnd() else {
            return Err(AdapterError::Disconnected);
        };
        let mut pending = self.inner.lock();
        pending.push_back(callback);

        // Post under the lock so a failed post can take back exactly this entry
        let posted = unsafe { PostMessageW(Some(hwnd), WM_TRAMPOLINE, WPARAM(0), LPARAM(0)) };
        if let Err(source) = posted {
            pending.pop_back();
            return Err(Win32LoopError::PostMessage(source).into());
        }
        trace!(?hwnd, depth = pending.len(), "Posted WM_TRAMPOLINE");
        Ok(())
    }
}

fn register_class(hinstance: HINSTANCE) -> Result<(), Win32LoopError> {
    static REGISTERED: Mutex<bool> = Mutex::new(false);

    let mut registered = REGISTERED.lock().unwrap_or_else(PoisonError::into_inner);
    if *registered {
        return Ok(());
    }
    let wc = WNDCLASSEXW {
        cbSize: mem::size_of::<WNDCLASSEXW>() as u32,
        lpfnWndProc: Some(wake_proc),
        hInstance: hinstance,
        lpszClassName: CLASS_NAME,
        ..Default::default()
    };
    if unsafe { RegisterClassExW(&wc) } == 0 {
        let code = unsafe { GetLastError() };
        return Err(Win32LoopError::RegisterClass(
            windows::core::Error::from_hresult(code.to_hresult()),
        ));
    }
    *registered = true;
    Ok(())
}

unsafe extern "system" fn wake_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_TRAMPOLINE => {
            let raw = unsafe { GetWindowLongPtrW(hwnd, GWLP_USERDATA) } as *const Inner;
            if !raw.is_null() {
                // Own a reference while callbacks run: one of them may close the window
                let inner = unsafe {
                    Arc::increment_strong_count(raw);
                    Arc::from_raw(raw)
                };
                inner.run_pending();
            }
            LRESULT(0)
        }
        WM_NCDESTROY => {
            let raw = unsafe { SetWindowLongPtrW(hwnd, GWLP_USERDATA, 0) } as *const Inner;
            if !raw.is_null() {
                drop(unsafe { Arc::from_raw(raw) });
            }
            unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
        }
        _ => unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) },
    }
}
