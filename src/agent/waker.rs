//! Window waker: prod a minimized host so its main loop ticks
//!
//! Some host/OS combinations throttle or halt the main loop while the host
//! window is minimized, which would stall main-thread-lane requests
//! forever. The waker restores the window just long enough for the drain
//! to run, then puts it back.
//!
//! `wake_if_minimized` is called from reader threads and must not require
//! the host main thread (ShowWindowAsync posts to the window's own queue);
//! `initialize` and `restore_minimized_state` run on the main thread.
//!
//! If the user manually restores the window while a call is in flight, the
//! sticky flag still re-minimizes it afterwards. The flash is accepted;
//! user-initiated state changes are not tracked.

use std::sync::atomic::{AtomicBool, Ordering};

pub trait WindowWaker: Send + Sync {
    /// Capture the host's top-level window handle. Idempotent across
    /// reloads.
    fn initialize(&self);

    /// If the host window is minimized: remember the current foreground
    /// window, restore the host, and set the sticky woken flag. No-op
    /// otherwise.
    fn wake_if_minimized(&self);

    /// Whether this subsystem woke the window and has not yet put it back.
    fn should_restore(&self) -> bool;

    /// Hand focus back to the saved foreground window and re-minimize the
    /// host, best effort. Clears the woken flag.
    fn restore_minimized_state(&self);
}

/// Waker for platforms without window throttling (or headless hosts).
/// Main-thread-lane work simply waits for the next natural tick.
pub struct NoopWaker;

impl WindowWaker for NoopWaker {
    fn initialize(&self) {}
    fn wake_if_minimized(&self) {}
    fn should_restore(&self) -> bool {
        false
    }
    fn restore_minimized_state(&self) {}
}

#[cfg(windows)]
pub use win32::Win32Waker;

#[cfg(windows)]
mod win32 {
    use super::*;
    use std::sync::atomic::AtomicIsize;
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        CloseWindow, GetForegroundWindow, IsIconic, SetForegroundWindow, ShowWindow,
        ShowWindowAsync, SW_MINIMIZE, SW_RESTORE,
    };

    #[derive(Default)]
    pub struct Win32Waker {
        host_window: AtomicIsize,
        previous_focus: AtomicIsize,
        woken: AtomicBool,
    }

    impl Win32Waker {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl WindowWaker for Win32Waker {
        fn initialize(&self) {
            if self.host_window.load(Ordering::SeqCst) != 0 {
                return;
            }
            // Called during host init on the main thread, while the editor
            // window is foreground.
            let hwnd = unsafe { GetForegroundWindow() };
            self.host_window.store(hwnd as isize, Ordering::SeqCst);
        }

        fn wake_if_minimized(&self) {
            let hwnd = self.host_window.load(Ordering::SeqCst);
            if hwnd == 0 {
                return;
            }
            unsafe {
                if IsIconic(hwnd as _) == 0 {
                    return;
                }
                let focus = GetForegroundWindow();
                self.previous_focus.store(focus as isize, Ordering::SeqCst);
                ShowWindowAsync(hwnd as _, SW_RESTORE);
            }
            self.woken.store(true, Ordering::SeqCst);
        }

        fn should_restore(&self) -> bool {
            self.woken.load(Ordering::SeqCst)
        }

        fn restore_minimized_state(&self) {
            let hwnd = self.host_window.load(Ordering::SeqCst);
            let focus = self.previous_focus.swap(0, Ordering::SeqCst);
            unsafe {
                if focus != 0 {
                    SetForegroundWindow(focus as _);
                }
                if hwnd != 0 {
                    // Descending preference; each call can fail without
                    // elevated rights depending on focus rules.
                    if ShowWindowAsync(hwnd as _, SW_MINIMIZE) == 0
                        && ShowWindow(hwnd as _, SW_MINIMIZE) == 0
                    {
                        CloseWindow(hwnd as _);
                    }
                }
            }
            self.woken.store(false, Ordering::SeqCst);
        }
    }
}

/// The waker for the current platform.
pub fn platform_waker() -> std::sync::Arc<dyn WindowWaker> {
    #[cfg(windows)]
    {
        std::sync::Arc::new(Win32Waker::new())
    }
    #[cfg(not(windows))]
    {
        std::sync::Arc::new(NoopWaker)
    }
}

/// Waker driven by a host-supplied minimized flag; used by hosts that model
/// their own window state (and by the test harness).
pub struct HookWaker<F: Fn() -> bool + Send + Sync> {
    is_minimized: F,
    woken: AtomicBool,
    wakes: std::sync::atomic::AtomicU64,
    restores: std::sync::atomic::AtomicU64,
}

impl<F: Fn() -> bool + Send + Sync> HookWaker<F> {
    pub fn new(is_minimized: F) -> Self {
        Self {
            is_minimized,
            woken: AtomicBool::new(false),
            wakes: std::sync::atomic::AtomicU64::new(0),
            restores: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn wake_count(&self) -> u64 {
        self.wakes.load(Ordering::SeqCst)
    }

    pub fn restore_count(&self) -> u64 {
        self.restores.load(Ordering::SeqCst)
    }
}

impl<F: Fn() -> bool + Send + Sync> WindowWaker for HookWaker<F> {
    fn initialize(&self) {}

    fn wake_if_minimized(&self) {
        if (self.is_minimized)() {
            self.woken.store(true, Ordering::SeqCst);
            self.wakes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn should_restore(&self) -> bool {
        self.woken.load(Ordering::SeqCst)
    }

    fn restore_minimized_state(&self) {
        self.woken.store(false, Ordering::SeqCst);
        self.restores.fetch_add(1, Ordering::SeqCst);
    }
}
