//! Configure reconciliation
//!
//! Applies a window's host geometry to its top-level surface: state requests
//! first, in protocol order, then the acknowledge, then the window geometry.
//! Nothing on the surface changes when the host size fits neither the current
//! nor the pending proposal.

use super::{WindowRects, WindowStyle};
use crate::error::Result;
use crate::geometry::Rect;
use crate::protocol::ConfigFlags;
use crate::surface::{AckOutcome, ConfigRecord, Surface};
use log::{debug, warn};

/// Outcome of reconciling a window with its surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// The surface was positioned and may be drawn to.
    Applied,
    /// The host size fits no proposal yet; nothing changed.
    Deferred,
    /// The window has no surface.
    NoSurface,
    /// The surface is a role-less placeholder.
    NoRole,
}

/// States the host window asks for.
///
/// Covering the monitor without caption or minimize means fullscreen; the
/// maximize style bit means maximized. Both may hold at once.
pub fn desired_flags(style: WindowStyle, rect: &Rect, monitor: Option<Rect>) -> ConfigFlags {
    let mut flags = ConfigFlags::empty();
    if monitor.is_some_and(|m| m == *rect)
        && !style.intersects(WindowStyle::CAPTION | WindowStyle::MINIMIZE)
    {
        flags |= ConfigFlags::FULLSCREEN;
    }
    if style.contains(WindowStyle::MAXIMIZE) {
        flags |= ConfigFlags::MAXIMIZED;
    }
    flags
}

/// Largest width or height taken from a configure proposal
pub const MAX_CONFIGURE_SIZE: u32 = 32767;

/// Host pixels to protocol units
pub fn to_protocol(value: u32, scale: u32) -> u32 {
    let scale = scale.max(1);
    value.saturating_add(scale / 2) / scale
}

/// Protocol units to host pixels
pub fn to_host(value: u32, scale: u32) -> u32 {
    value.saturating_mul(scale.max(1))
}

pub fn rect_to_protocol(rect: &Rect, scale: u32) -> Rect {
    let scale = scale.max(1) as i32;
    Rect::new(
        rect.x.div_euclid(scale),
        rect.y.div_euclid(scale),
        to_protocol(rect.width, scale as u32),
        to_protocol(rect.height, scale as u32),
    )
}

/// Turns a raw configure size into a record.
///
/// Negative sizes are clamped to zero and oversized ones to
/// [`MAX_CONFIGURE_SIZE`]. A zero dimension means the client chooses: the
/// restore size is substituted, falling back to the current configuration.
pub fn sanitize_configure(
    serial: u32,
    width: i32,
    height: i32,
    flags: ConfigFlags,
    restore: Option<Rect>,
    current: Option<ConfigRecord>,
    scale: u32,
) -> ConfigRecord {
    if width < 0 || height < 0 {
        warn!("🔧 Configure {} with negative size {}x{}, clamping", serial, width, height);
    }
    let mut width = width.max(0) as u32;
    let mut height = height.max(0) as u32;
    if width > MAX_CONFIGURE_SIZE || height > MAX_CONFIGURE_SIZE {
        warn!("🔧 Configure {} with oversized {}x{}, clamping", serial, width, height);
        width = width.min(MAX_CONFIGURE_SIZE);
        height = height.min(MAX_CONFIGURE_SIZE);
    }

    let fallback = restore
        .map(|r| (to_protocol(r.width, scale), to_protocol(r.height, scale)))
        .or_else(|| current.map(|c| (c.width, c.height)));
    if let Some((w, h)) = fallback {
        if width == 0 {
            width = w;
        }
        if height == 0 {
            height = h;
        }
    }
    ConfigRecord::new(serial, width, height, flags)
}

/// Reconciles a top-level surface with the host rects.
///
/// With `send` the state requests go to the server; without it the flags
/// come from the server and are only adopted.
pub fn reconcile_toplevel(surface: &Surface, rects: &WindowRects, flags: ConfigFlags, send: bool) -> Result<Reconcile> {
    let scale = surface.scale();
    surface.apply_states(flags, send)?;

    let width = to_protocol(rects.window.width, scale);
    let height = to_protocol(rects.window.height, scale);
    match surface.ack_if_compatible(width, height, flags)? {
        AckOutcome::Incompatible => {
            debug!(
                "🔧 Surface {:?}: {}x{} {:?} fits no proposal, deferring",
                surface.id(),
                width,
                height,
                flags
            );
            return Ok(Reconcile::Deferred);
        }
        AckOutcome::AckedPending(_) | AckOutcome::Current => {}
    }

    let client = rects.client.translate(-rects.window.x, -rects.window.y);
    let geometry = client
        .intersection(&Rect::from_size(rects.window.width, rects.window.height))
        .unwrap_or_else(|| Rect::from_size(rects.window.width, rects.window.height));
    surface.set_window_geometry(rect_to_protocol(&geometry, scale))?;
    surface.set_drawing_allowed(true);
    Ok(Reconcile::Applied)
}
