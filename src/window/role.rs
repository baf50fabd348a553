//! Role decisions
//!
//! Which role a window's surface takes, which window it is positioned against,
//! and when the surface object has to be rebuilt. Everything here is a pure
//! function of a snapshot so the manager can evaluate it without holding
//! more than one window's state.

use super::host::WindowStyle;
use super::WindowHandle;
use crate::geometry::Rect;
use crate::surface::RoleKind;

/// Inputs that select the role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoleInputs {
    /// The explicit owner/parent exists, has a surface and is visible.
    pub explicit_parent_usable: bool,
    /// The window looks like a transient popup.
    pub popup: bool,
}

/// Everything the rebuild decision compares between two updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleSnapshot {
    pub inputs: RoleInputs,
    pub visible: bool,
    pub parent: Option<WindowHandle>,
    pub effective_parent: Option<WindowHandle>,
    pub window_rect: Rect,
}

/// Undecorated, not minimized, and smaller than `fraction` of the monitor
/// in both dimensions.
pub fn qualifies_as_popup(style: WindowStyle, rect: &Rect, monitor: Option<Rect>, fraction: f64) -> bool {
    if style.intersects(WindowStyle::CAPTION | WindowStyle::SYSMENU)
        || style.contains(WindowStyle::MINIMIZE)
    {
        return false;
    }
    let Some(monitor) = monitor else {
        return false;
    };
    (rect.width as f64) < monitor.width as f64 * fraction
        && (rect.height as f64) < monitor.height as f64 * fraction
}

/// Picks the window to position against.
///
/// A usable explicit parent always wins. Otherwise a popup takes the first
/// presentable candidate that is not the window itself.
pub fn effective_parent<F>(
    this: WindowHandle,
    explicit: Option<WindowHandle>,
    inputs: RoleInputs,
    candidates: [Option<WindowHandle>; 3],
    presentable: F,
) -> Option<WindowHandle>
where
    F: Fn(WindowHandle) -> bool,
{
    if inputs.explicit_parent_usable {
        return explicit;
    }
    if !inputs.popup {
        return None;
    }
    candidates
        .into_iter()
        .flatten()
        .find(|&candidate| candidate != this && presentable(candidate))
}

/// Role for a window with the given effective parent and visibility.
/// Hidden parentless windows stay role-less rather than advertising an empty
/// toplevel.
pub fn decide_role(effective_parent: Option<WindowHandle>, visible: bool) -> RoleKind {
    match (effective_parent, visible) {
        (Some(_), _) => RoleKind::SubSurface,
        (None, true) => RoleKind::TopLevel,
        (None, false) => RoleKind::None,
    }
}

/// Whether the surface must be recreated (or, if role-less, given a role).
///
/// `current_role` is `None` when the window has no surface at all.
pub fn needs_rebuild(prev: Option<&RoleSnapshot>, next: &RoleSnapshot, current_role: Option<RoleKind>) -> bool {
    let (Some(prev), Some(role)) = (prev, current_role) else {
        return true;
    };

    if prev.inputs != next.inputs || prev.parent != next.parent {
        return true;
    }
    if decide_role(next.effective_parent, next.visible) != role {
        return true;
    }
    if prev.visible != next.visible && matches!(role, RoleKind::TopLevel | RoleKind::None) {
        return true;
    }
    // A window that merely appeared keeps its parent assignment
    prev.effective_parent != next.effective_parent && prev.window_rect != next.window_rect
}
