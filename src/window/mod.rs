//! Window management glue
//!
//! The host calls into [`WindowManager`] when its windows move, resize, change
//! style or go away. The manager keeps one [`table::WindowState`] per window
//! handle, decides the role of each window's surface, reconciles host geometry
//! with the server's configure proposals and drives the window surface that
//! presents the host's pixels.
//!
//! Handlers for a window always run on the host thread that first touched it;
//! other threads only ever read the small published summary of a window.

pub mod configure;
pub mod focus;
pub mod host;
pub mod manager;
pub mod role;
pub mod table;

pub use configure::Reconcile;
pub use focus::{InputFocus, InputKind};
pub use host::{HostWindows, WindowRects, WindowStyle};
pub use manager::WindowManager;
pub use role::{RoleInputs, RoleSnapshot};

/// Opaque host window identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowHandle(pub u64);

/// A window handle pinned to one lifetime of the window.
///
/// Handles may be reused by the host after a window is destroyed; messages
/// carrying a stale generation are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowRef {
    pub handle: WindowHandle,
    pub generation: u64,
}
