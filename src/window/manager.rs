//! Window manager
//!
//! Entry points for the host's window-management glue plus the queue handler
//! that consumes configure proposals and cross-thread messages on each
//! window's owning thread.
//!
//! Lock order: a window's state, then the table, then any window's published
//! summary. No lock is held while calling into the host, and no two window
//! states are ever locked together.

use super::configure::{desired_flags, reconcile_toplevel, sanitize_configure, to_host, Reconcile};
use super::role::{decide_role, effective_parent, needs_rebuild, qualifies_as_popup, RoleInputs, RoleSnapshot};
use super::table::{Slot, WindowState, WindowTable};
use super::{HostWindows, WindowHandle, WindowRects, WindowRef, WindowStyle};
use crate::buffer::{BufferStats, FlushOutcome, HostBitmap, WindowSurface};
use crate::config::BridgeConfig;
use crate::connection::{Connection, Route};
use crate::dispatch::{QueueHandler, ThreadContext, WindowMessage};
use crate::error::{Error, Result};
use crate::geometry::{Rect, Region};
use crate::protocol::{ConfigFlags, ObjectId, ProtocolEvent};
use crate::surface::{RoleKind, Surface, SurfaceRole};
use log::{debug, info, trace, warn};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

pub struct WindowManager {
    connection: Arc<Connection>,
    host: Arc<dyn HostWindows>,
    config: BridgeConfig,
    table: WindowTable,
}

impl WindowManager {
    pub fn new(connection: Arc<Connection>, host: Arc<dyn HostWindows>, config: BridgeConfig) -> Self {
        info!("🪟 Window manager ready on connection {}", connection.id());
        Self {
            connection,
            host,
            config,
            table: WindowTable::new(),
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn window_count(&self) -> usize {
        self.table.len()
    }

    fn context(&self) -> Result<Rc<ThreadContext>> {
        ThreadContext::current(&self.connection)
    }

    fn slot(&self, handle: WindowHandle) -> Result<Arc<Slot>> {
        self.table.get(handle).ok_or(Error::UnknownWindow(handle.0))
    }

    fn monitor_for(&self, rect: &Rect) -> Option<Rect> {
        self.host
            .monitor_rect(*rect)
            .or_else(|| self.connection.output_for(rect).map(|o| o.rect))
    }

    fn scale_for(&self, rect: &Rect) -> u32 {
        self.connection
            .output_for(rect)
            .map(|o| o.scale)
            .unwrap_or(self.config.windows.default_scale)
            .max(1)
    }

    // Host entry points

    /// The window is about to move or resize. Returns whether it needs a
    /// surface to present into; if so a window surface is prepared.
    pub fn on_window_pos_changing(&self, handle: WindowHandle, desired: Rect, style: WindowStyle) -> Result<bool> {
        let (slot, created) = self.table.get_or_insert(handle);
        if created {
            debug!("🪟 Tracking window {:?}", handle);
        }

        let needed = style.contains(WindowStyle::VISIBLE) && !desired.is_empty();
        if needed {
            let mut state = slot.state.lock();
            if state.window_surface.is_none() {
                let mut window_surface = WindowSurface::new(&self.connection, desired, &self.config.buffers);
                window_surface.set_surface(state.surface.clone());
                state.window_surface = Some(window_surface);
            }
        }
        Ok(needed)
    }

    /// The window moved, resized or changed style. Recomputes its role and
    /// reconciles its surface.
    pub fn on_window_pos_changed(&self, handle: WindowHandle, rects: WindowRects, style: WindowStyle) -> Result<Reconcile> {
        let ctx = self.context()?;
        let (slot, _) = self.table.get_or_insert(handle);
        let window = slot.window_ref(handle);
        self.update_window(&ctx, &slot, window, rects, style)
    }

    /// Drops every resource of a destroyed window.
    pub fn on_window_destroyed(&self, handle: WindowHandle) {
        let Some(slot) = self.table.remove(handle) else {
            return;
        };
        let (window_surface, surface) = {
            let mut state = slot.state.lock();
            (state.window_surface.take(), state.surface.take())
        };
        *slot.published.lock() = Default::default();
        drop(window_surface);
        drop(surface);

        self.connection.forget_window(handle);
        info!("🪟 Window {:?} destroyed", handle);
        self.refresh_children(handle);
    }

    /// Whether the window's pixels have reached the server and are shown
    pub fn query_surface_mapped(&self, handle: WindowHandle) -> bool {
        self.table
            .published(handle)
            .is_some_and(|p| p.visible && p.surface.is_some_and(|s| s.is_mapped()))
    }

    pub fn set_window_title(&self, handle: WindowHandle, title: &str) -> Result<()> {
        let slot = self.slot(handle)?;
        let mut state = slot.state.lock();
        state.title = Some(title.to_string());
        if let Some(surface) = &state.surface {
            surface.set_title(title)?;
        }
        Ok(())
    }

    /// Sets or clears the window's shape, in window coordinates.
    pub fn set_window_shape(&self, handle: WindowHandle, shape: Option<Region>) -> Result<()> {
        let slot = self.slot(handle)?;
        if let Some(window_surface) = slot.state.lock().window_surface.as_mut() {
            window_surface.set_clip(shape);
        }
        Ok(())
    }

    pub fn set_layered_attributes(&self, handle: WindowHandle, color_key: Option<u32>, alpha: u8) -> Result<()> {
        let slot = self.slot(handle)?;
        if let Some(window_surface) = slot.state.lock().window_surface.as_mut() {
            window_surface.set_color_key(color_key);
            window_surface.set_alpha(alpha);
        }
        Ok(())
    }

    pub fn add_window_damage(&self, handle: WindowHandle, rect: Rect) -> Result<()> {
        let slot = self.slot(handle)?;
        if let Some(window_surface) = slot.state.lock().window_surface.as_mut() {
            window_surface.add_damage(rect);
        }
        Ok(())
    }

    /// Presents the damaged part of `bitmap`. A window without a window
    /// surface fails the flush.
    pub fn flush_window(&self, handle: WindowHandle, bitmap: &HostBitmap<'_>) -> Result<FlushOutcome> {
        let slot = self.slot(handle)?;
        let mut state = slot.state.lock();
        Ok(match state.window_surface.as_mut() {
            Some(window_surface) => window_surface.flush(bitmap),
            None => FlushOutcome::Failed,
        })
    }

    pub fn window_surface_stats(&self, handle: WindowHandle) -> Option<BufferStats> {
        let slot = self.table.get(handle)?;
        let state = slot.state.lock();
        state.window_surface.as_ref().map(WindowSurface::stats)
    }

    /// Current surface of the window
    pub fn surface(&self, handle: WindowHandle) -> Option<Arc<Surface>> {
        self.table.get(handle)?.state.lock().surface.clone()
    }

    pub fn effective_parent(&self, handle: WindowHandle) -> Option<WindowHandle> {
        self.table.get(handle)?.state.lock().effective_parent
    }

    pub fn restore_rect(&self, handle: WindowHandle) -> Option<Rect> {
        self.table.get(handle)?.state.lock().restore_rect
    }

    /// Sets or clears the window holding an explicit pointer grab.
    pub fn set_pointer_grab(&self, handle: Option<WindowHandle>) {
        self.connection.set_pointer_grab(handle);
    }

    /// Runs the calling thread's wait primitive once.
    pub fn dispatch(&self, timeout: Option<Duration>) -> Result<usize> {
        let ctx = self.context()?;
        ctx.wait(self, timeout)
    }

    // Role and state

    fn update_window(
        &self,
        ctx: &ThreadContext,
        slot: &Slot,
        window: WindowRef,
        rects: WindowRects,
        style: WindowStyle,
    ) -> Result<Reconcile> {
        let handle = window.handle;
        let visible = style.contains(WindowStyle::VISIBLE);
        let parent = self.host.owner(handle).filter(|&p| p != handle);
        let monitor = self.monitor_for(&rects.window);
        let inputs = RoleInputs {
            explicit_parent_usable: parent.is_some_and(|p| self.table.presentable(p)),
            popup: qualifies_as_popup(
                style,
                &rects.window,
                monitor,
                self.config.windows.popup_max_monitor_fraction,
            ),
        };
        let candidates = self.connection.focus().popup_candidates();
        let effective = effective_parent(handle, parent, inputs, candidates, |h| self.table.presentable(h));
        let mut next = RoleSnapshot {
            inputs,
            visible,
            parent,
            effective_parent: effective,
            window_rect: rects.window,
        };

        let mut state = slot.state.lock();
        let was_visible = state.visible;
        state.owner_queue = Some(ctx.queue_id());

        let current_role = state.surface.as_ref().map(|s| s.role_kind());
        let mut rebuild = needs_rebuild(state.last.as_ref(), &next, current_role);
        if !rebuild {
            // A window that did not move stays with the parent it has, as
            // long as that parent can still be presented against
            let kept = state.last.and_then(|last| last.effective_parent);
            if let Some(kept) = kept.filter(|&p| next.effective_parent.is_some() && self.table.presentable(p)) {
                if next.effective_parent != Some(kept) {
                    trace!(
                        "🪟 Window {:?} keeps parent {:?} over {:?}",
                        handle,
                        kept,
                        next.effective_parent
                    );
                }
                next.effective_parent = Some(kept);
            }
            let parent_surface = next
                .effective_parent
                .and_then(|p| self.table.published(p))
                .and_then(|p| p.surface.map(|s| s.id()));
            rebuild = parent_is_stale(state.surface.as_deref(), parent_surface);
        }

        state.rects = rects;
        state.style = style;
        state.parent = parent;
        state.effective_parent = next.effective_parent;
        state.visible = visible;

        if rebuild {
            if let Err(err) = self.rebuild(ctx, window, &mut state, &next) {
                warn!("🪟 Window {:?} has no surface: {}", handle, err);
                state.last = None;
                publish(slot, &state);
                drop(state);
                self.refresh_children(handle);
                return Err(err);
            }
        }
        state.last = Some(next);

        let flags = match state.processing {
            Some(flags) => flags,
            None => desired_flags(style, &rects.window, monitor),
        };
        if !flags.intersects(ConfigFlags::NEGOTIATED) {
            state.restore_rect = Some(rects.window);
        }
        if let Some(window_surface) = state.window_surface.as_mut() {
            window_surface.set_rect(rects.window);
        }

        let outcome = self.update_surface_state(&state, flags);
        publish(slot, &state);
        drop(state);

        if rebuild || was_visible != visible {
            self.refresh_children(handle);
        }
        outcome
    }

    /// Gives the window a surface with the role `next` calls for, reusing a
    /// role-less surface when there is one.
    fn rebuild(&self, ctx: &ThreadContext, window: WindowRef, state: &mut WindowState, next: &RoleSnapshot) -> Result<()> {
        let role = decide_role(next.effective_parent, next.visible);

        let reusable = state
            .surface
            .as_ref()
            .filter(|s| s.role_kind() == RoleKind::None)
            .cloned();
        let surface = match reusable {
            Some(surface) => surface,
            None => {
                if let Some(window_surface) = state.window_surface.as_mut() {
                    window_surface.set_surface(None);
                }
                state.surface = None;
                let route = Route {
                    queue: ctx.queue_id(),
                    window,
                };
                let surface = Surface::create(&self.connection, route, self.scale_for(&next.window_rect))?;
                state.surface = Some(Arc::clone(&surface));
                surface
            }
        };

        match role {
            RoleKind::TopLevel => surface.make_toplevel()?,
            RoleKind::SubSurface => {
                let parent = next
                    .effective_parent
                    .and_then(|p| self.table.published(p))
                    .and_then(|p| p.surface);
                match parent {
                    Some(parent) => surface.make_subsurface(&parent)?,
                    None => debug!("🪟 Parent of {:?} lost its surface, staying role-less", window.handle),
                }
            }
            RoleKind::None => {}
        }
        if let Some(title) = &state.title {
            surface.set_title(title)?;
        }
        if let Some(window_surface) = state.window_surface.as_mut() {
            window_surface.set_surface(Some(Arc::clone(&surface)));
        }

        info!(
            "🪟 Window {:?} surface {:?} rebuilt as {:?} (parent {:?})",
            window.handle,
            surface.id(),
            surface.role_kind(),
            next.effective_parent
        );
        Ok(())
    }

    fn update_surface_state(&self, state: &WindowState, flags: ConfigFlags) -> Result<Reconcile> {
        let Some(surface) = state.surface.as_ref() else {
            return Ok(Reconcile::NoSurface);
        };
        match surface.role_kind() {
            RoleKind::None => {
                surface.set_drawing_allowed(false);
                Ok(Reconcile::NoRole)
            }
            RoleKind::SubSurface => {
                let Some(origin) = state
                    .effective_parent
                    .and_then(|p| self.table.published(p))
                    .map(|p| p.window_rect)
                else {
                    return Ok(Reconcile::Deferred);
                };
                let scale = surface.scale().max(1) as i32;
                let x = (state.rects.window.x - origin.x).div_euclid(scale);
                let y = (state.rects.window.y - origin.y).div_euclid(scale);
                surface.set_subsurface_position(x, y)?;
                surface.set_drawing_allowed(true);
                Ok(Reconcile::Applied)
            }
            RoleKind::TopLevel => reconcile_toplevel(surface, &state.rects, flags, state.processing.is_none()),
        }
    }

    fn refresh_children(&self, parent: WindowHandle) {
        for (child, queue) in self.table.children_of(parent) {
            if let Some(queue) = queue {
                trace!("🪟 Refreshing {:?} after parent {:?} changed", child.handle, parent);
                self.connection.post(queue, WindowMessage::Refresh(child));
            }
        }
    }

    // Queue handling

    fn on_configure(&self, ctx: &ThreadContext, surface_id: ObjectId, serial: u32, width: i32, height: i32, states: ConfigFlags) {
        let Some(route) = self.connection.route(surface_id) else {
            debug!("🔧 Configure {} for unrouted surface {:?}", serial, surface_id);
            return;
        };
        let Some(slot) = self.table.get_ref(route.window) else {
            debug!("🔧 Configure {} for a destroyed window", serial);
            return;
        };
        {
            let state = slot.state.lock();
            let Some(surface) = state.surface.as_ref().filter(|s| s.id() == surface_id) else {
                debug!("🔧 Configure {} for replaced surface {:?}", serial, surface_id);
                return;
            };
            let record = sanitize_configure(
                serial,
                width,
                height,
                states,
                state.restore_rect,
                surface.current(),
                surface.scale(),
            );
            debug!("🔧 Window {:?}: configure {:?}", route.window.handle, record);
            surface.store_pending(record);
        }
        ctx.post(WindowMessage::ConfigureArrived(route.window));
    }

    fn on_configure_arrived(&self, ctx: &ThreadContext, window: WindowRef) -> Result<()> {
        let Some(slot) = self.table.get_ref(window) else {
            return Ok(());
        };

        if ctx.has_backlog() || self.host.thread_has_pending_messages() {
            let mut state = slot.state.lock();
            if state.reconcile_scheduled {
                trace!("⏱️ Reconcile of {:?} already pending", window.handle);
                return Ok(());
            }
            match ctx.schedule_reconcile(window, self.config.windows.deferred_reconcile()) {
                Ok(()) => {
                    state.reconcile_scheduled = true;
                    return Ok(());
                }
                Err(err) => warn!("⏱️ Could not defer reconcile of {:?}: {}", window.handle, err),
            }
        }

        self.reconcile_pending(window).map(|_| ())
    }

    /// Moves the host window to the pending proposal and acknowledges it.
    /// Returns `None` when there is nothing to reconcile.
    fn reconcile_pending(&self, window: WindowRef) -> Result<Option<Reconcile>> {
        let Some(slot) = self.table.get_ref(window) else {
            return Ok(None);
        };

        let (surface, pending, placement) = {
            let mut state = slot.state.lock();
            state.reconcile_scheduled = false;
            let Some(surface) = state.surface.clone() else {
                return Ok(None);
            };
            let Some(pending) = surface.pending() else {
                return Ok(None);
            };
            let scale = surface.scale();
            let current = state.rects.window;
            let width = if pending.width == 0 { current.width } else { to_host(pending.width, scale) };
            let height = if pending.height == 0 { current.height } else { to_host(pending.height, scale) };
            state.processing = Some(pending.flags);
            (surface, pending, Rect::new(current.x, current.y, width, height))
        };

        // The host may report the new placement back synchronously, which
        // acknowledges the proposal on the way
        self.host.apply_placement(window.handle, placement, pending.flags);

        let mut state = slot.state.lock();
        let still_pending = state
            .surface
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(s, &surface))
            && surface.pending() == Some(pending);
        let outcome = if still_pending {
            let old = state.rects;
            let decoration_w = old.window.width.saturating_sub(old.client.width);
            let decoration_h = old.window.height.saturating_sub(old.client.height);
            state.rects = WindowRects {
                window: placement,
                client: Rect::new(
                    old.client.x - old.window.x + placement.x,
                    old.client.y - old.window.y + placement.y,
                    placement.width.saturating_sub(decoration_w),
                    placement.height.saturating_sub(decoration_h),
                ),
            };
            if !pending.flags.intersects(ConfigFlags::NEGOTIATED) {
                state.restore_rect = Some(placement);
            }
            if let Some(window_surface) = state.window_surface.as_mut() {
                window_surface.set_rect(placement);
            }
            self.update_surface_state(&state, pending.flags).map(Some)
        } else {
            Ok(None)
        };
        state.processing = None;
        publish(&slot, &state);
        outcome
    }

    fn refresh(&self, ctx: &ThreadContext, window: WindowRef) -> Result<()> {
        let Some(slot) = self.table.get_ref(window) else {
            return Ok(());
        };
        let (rects, style, known) = {
            let state = slot.state.lock();
            (state.rects, state.style, state.last.is_some() || state.surface.is_some())
        };
        if known {
            self.update_window(ctx, &slot, window, rects, style)?;
        }
        Ok(())
    }

    fn report(&self, what: &str, result: Result<()>) {
        if let Err(err) = result {
            if err.is_fatal() {
                self.connection.fail(&err);
            } else {
                warn!("🪟 {} failed: {}", what, err);
            }
        }
    }
}

fn publish(slot: &Slot, state: &WindowState) {
    let mut published = slot.published.lock();
    published.surface = state.surface.clone();
    published.visible = state.visible;
    published.window_rect = state.rects.window;
    published.parent = state.parent;
    published.effective_parent = state.effective_parent;
    published.owner_queue = state.owner_queue;
}

/// A sub-surface whose parent surface was replaced or destroyed. Callers pass
/// the current surface of the parent the window stays attached to.
fn parent_is_stale(surface: Option<&Surface>, parent_surface: Option<ObjectId>) -> bool {
    match surface.map(Surface::role) {
        Some(SurfaceRole::SubSurface { parent, .. }) => parent_surface != Some(parent),
        _ => false,
    }
}

impl QueueHandler for WindowManager {
    fn handle_event(&self, ctx: &ThreadContext, event: ProtocolEvent) {
        match event {
            ProtocolEvent::Configure {
                surface,
                serial,
                width,
                height,
                states,
            } => self.on_configure(ctx, surface, serial, width, height, states),
            ProtocolEvent::ToplevelClose { surface } => match self.connection.route(surface) {
                Some(route) => ctx.post(WindowMessage::CloseRequested(route.window)),
                None => debug!("🚪 Close for unrouted surface {:?}", surface),
            },
            other => trace!("🎯 {:?}", other),
        }
    }

    fn handle_message(&self, ctx: &ThreadContext, message: WindowMessage) {
        match message {
            WindowMessage::ConfigureArrived(window) => {
                self.report("Configure", self.on_configure_arrived(ctx, window));
            }
            WindowMessage::Reconcile(window) => {
                self.report("Reconcile", self.reconcile_pending(window).map(|_| ()));
            }
            WindowMessage::CloseRequested(window) => {
                if self.table.get_ref(window).is_some() {
                    info!("🚪 Server asked window {:?} to close", window.handle);
                    self.host.request_close(window.handle);
                }
            }
            WindowMessage::Refresh(window) => {
                self.report("Refresh", self.refresh(ctx, window));
            }
            WindowMessage::DisplayChanged => {
                debug!("🖥️ Display configuration changed");
                self.host.display_changed();
            }
        }
    }
}

impl std::fmt::Debug for WindowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowManager")
            .field("connection", &self.connection)
            .field("windows", &self.table.len())
            .finish()
    }
}
