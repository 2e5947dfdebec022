//! Window collaborator seen by render contexts
//!
//! The windowing layer (winit, an editor panel, a test harness) stays
//! outside this crate. A render context only needs raw handles for surface
//! creation, the current client size and, for OpenGL, the windowing layer's
//! GL context.

use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawWindowHandle};
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::{Error, Result};

/// A window (or panel) a render context can present into
pub trait RenderWindow: HasWindowHandle + HasDisplayHandle {
    /// Current client area size in physical pixels
    fn client_size(&self) -> (u32, u32);

    /// Resize flag, polled once per frame by the caller
    ///
    /// Returns true once after the client area changed size.
    fn take_resized(&self) -> bool {
        false
    }

    /// GL surface owned by the windowing layer (OpenGL backend only)
    fn gl_surface(&self) -> Option<&dyn GlSurface> {
        None
    }
}

/// OpenGL context/surface owned by the windowing layer
///
/// Context creation (WGL, GLX, EGL...) is platform glue the host already
/// has; the OpenGL backend loads its function pointers through this trait
/// and asks it to swap buffers at the end of each frame.
pub trait GlSurface {
    /// Address of a GL entry point, null when unavailable
    fn get_proc_address(&self, symbol: &str) -> *const c_void;

    /// Make the GL context current on the calling thread
    fn make_current(&self) -> Result<()>;

    /// Present the back buffer
    fn swap_buffers(&self) -> Result<()>;

    /// Resize the default framebuffer
    fn resize(&self, _width: u32, _height: u32) {}

    /// Set the swap interval (1 with vsync, 0 without)
    fn set_swap_interval(&self, _vsync: bool) -> Result<()> {
        Ok(())
    }
}

impl RenderWindow for winit::window::Window {
    fn client_size(&self) -> (u32, u32) {
        let size = self.inner_size();
        (size.width, size.height)
    }
}

/// Raw HWND of a Win32 window, for the Direct3D swapchains
pub fn win32_hwnd(window: &dyn RenderWindow) -> Result<isize> {
    let handle = window
        .window_handle()
        .map_err(|e| Error::InitializationFailed(format!("window handle unavailable: {}", e)))?;
    match handle.as_raw() {
        RawWindowHandle::Win32(win32) => Ok(win32.hwnd.get()),
        other => Err(Error::InitializationFailed(format!(
            "Direct3D needs a Win32 window, got {:?}",
            other
        ))),
    }
}

/// Resize flag a host can embed in its window type
///
/// The event loop calls [`ResizeFlag::notify`]; the render loop polls
/// [`ResizeFlag::take`] once per frame and forwards the size into
/// `recreate_swapchain`.
#[derive(Debug, Default)]
pub struct ResizeFlag {
    pending: AtomicBool,
    size: AtomicU64,
}

impl ResizeFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new client size
    pub fn notify(&self, width: u32, height: u32) {
        let packed = (u64::from(width) << 32) | u64::from(height);
        self.size.store(packed, Ordering::Release);
        self.pending.store(true, Ordering::Release);
    }

    /// Take the pending resize, if any
    pub fn take(&self) -> Option<(u32, u32)> {
        if self.pending.swap(false, Ordering::AcqRel) {
            let packed = self.size.load(Ordering::Acquire);
            Some(((packed >> 32) as u32, packed as u32))
        } else {
            None
        }
    }
}

#[cfg(test)]
#[path = "window_tests.rs"]
mod tests;
