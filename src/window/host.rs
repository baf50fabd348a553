//! The window-management side the bridge is embedded in

use super::WindowHandle;
use crate::geometry::Rect;
use crate::protocol::ConfigFlags;
use bitflags::bitflags;

bitflags! {
    /// Host window style bits relevant to role and state decisions
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WindowStyle: u32 {
        const VISIBLE = 1 << 0;
        const CAPTION = 1 << 1;
        const SYSMENU = 1 << 2;
        const MAXIMIZE = 1 << 3;
        const MINIMIZE = 1 << 4;
        const CHILD = 1 << 5;
    }
}

/// Window and client rectangles, in host coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowRects {
    pub window: Rect,
    pub client: Rect,
}

impl WindowRects {
    /// Rects of a window without decorations
    pub fn plain(rect: Rect) -> Self {
        Self {
            window: rect,
            client: rect,
        }
    }
}

/// Host services the window manager calls back into.
///
/// Callbacks are invoked on the window's owning thread with no bridge lock
/// held, so they may call back into the [`super::WindowManager`].
pub trait HostWindows: Send + Sync {
    /// Explicit owner or parent of `handle`.
    fn owner(&self, handle: WindowHandle) -> Option<WindowHandle>;

    /// Rectangle of the monitor showing `rect`. `None` defers to the outputs
    /// advertised by the server.
    fn monitor_rect(&self, _rect: Rect) -> Option<Rect> {
        None
    }

    /// Moves/resizes the host window to honor a server proposal.
    fn apply_placement(&self, handle: WindowHandle, rect: Rect, states: ConfigFlags);

    /// The server asked the window to close.
    fn request_close(&self, handle: WindowHandle);

    /// Monitor topology changed.
    fn display_changed(&self) {}

    /// Whether the calling thread's host message queue has work waiting.
    fn thread_has_pending_messages(&self) -> bool {
        false
    }
}
