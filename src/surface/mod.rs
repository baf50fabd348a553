//! Protocol-facing surfaces
//!
//! A [`Surface`] wraps one protocol surface object together with its role and
//! its configure negotiation state. It is shared (`Arc`) between the window
//! state, the window surface that presents into it, and any child sub-surface
//! positioned against it; the protocol object is destroyed when the last
//! holder drops it.
//!
//! The inner lock is a leaf: it is taken while the reader-side configure path
//! or the host-side reconcile path mutates the records, and nothing else is
//! locked while it is held.

pub mod config;

pub use config::{compatible, state_changes, ConfigRecord, StateChange};

use crate::connection::{Connection, Route};
use crate::error::{Error, Result};
use crate::geometry::{Rect, Region};
use crate::protocol::{ConfigFlags, ObjectId, Request};
use crate::window::WindowHandle;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// Role object attached to a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceRole {
    None,
    TopLevel { toplevel: ObjectId },
    SubSurface { subsurface: ObjectId, parent: ObjectId },
}

/// Role without the protocol objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKind {
    None,
    TopLevel,
    SubSurface,
}

impl SurfaceRole {
    pub fn kind(&self) -> RoleKind {
        match self {
            SurfaceRole::None => RoleKind::None,
            SurfaceRole::TopLevel { .. } => RoleKind::TopLevel,
            SurfaceRole::SubSurface { .. } => RoleKind::SubSurface,
        }
    }
}

/// Result of an acknowledge attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The pending proposal matched and was acknowledged.
    AckedPending(u32),
    /// The already acknowledged configuration still matches.
    Current,
    /// Neither record matches.
    Incompatible,
}

impl AckOutcome {
    pub fn is_compatible(&self) -> bool {
        !matches!(self, AckOutcome::Incompatible)
    }
}

#[derive(Debug)]
struct SurfaceState {
    role: SurfaceRole,
    current: Option<ConfigRecord>,
    pending: Option<ConfigRecord>,
    /// Negotiated states as last requested or acknowledged
    states: ConfigFlags,
    scale: u32,
    title: Option<String>,
    geometry: Option<Rect>,
    drawing_allowed: bool,
    mapped: bool,
}

pub struct Surface {
    id: ObjectId,
    window: WindowHandle,
    connection: Arc<Connection>,
    state: Mutex<SurfaceState>,
}

impl Surface {
    /// Creates a role-less surface whose events are routed per `route`.
    pub fn create(connection: &Arc<Connection>, route: Route, scale: u32) -> Result<Arc<Surface>> {
        let id = connection.new_object();
        connection
            .send(Request::CreateSurface { surface: id })
            .map_err(|e| creation_error("surface", e))?;
        if scale > 1 {
            connection.send(Request::SetBufferScale { surface: id, scale })?;
        }
        connection.register_route(id, route);
        debug!("🪟 Created surface {:?} for window {:?}", id, route.window.handle);

        Ok(Arc::new(Surface {
            id,
            window: route.window.handle,
            connection: Arc::clone(connection),
            state: Mutex::new(SurfaceState {
                role: SurfaceRole::None,
                current: None,
                pending: None,
                states: ConfigFlags::empty(),
                scale: scale.max(1),
                title: None,
                geometry: None,
                drawing_allowed: false,
                mapped: false,
            }),
        }))
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn window(&self) -> WindowHandle {
        self.window
    }

    pub fn role(&self) -> SurfaceRole {
        self.state.lock().role
    }

    pub fn role_kind(&self) -> RoleKind {
        self.state.lock().role.kind()
    }

    /// Gives a role-less surface the top-level role.
    pub fn make_toplevel(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.role != SurfaceRole::None {
            return Err(Error::Protocol(format!("surface {:?} already has a role", self.id)));
        }
        let toplevel = self.connection.new_object();
        self.connection
            .send(Request::GetToplevel {
                surface: self.id,
                toplevel,
            })
            .map_err(|e| creation_error("toplevel", e))?;
        if let Some(title) = &state.title {
            self.connection.send(Request::SetTitle {
                toplevel,
                title: title.clone(),
            })?;
        }
        state.role = SurfaceRole::TopLevel { toplevel };
        reset_negotiation(&mut state);
        info!("🪟 Surface {:?} is now a toplevel", self.id);
        Ok(())
    }

    /// Gives a role-less surface the sub-surface role relative to `parent`.
    pub fn make_subsurface(&self, parent: &Surface) -> Result<()> {
        if parent.id == self.id {
            return Err(Error::Protocol("surface cannot be its own parent".into()));
        }
        let mut state = self.state.lock();
        if state.role != SurfaceRole::None {
            return Err(Error::Protocol(format!("surface {:?} already has a role", self.id)));
        }
        let subsurface = self.connection.new_object();
        self.connection
            .send(Request::GetSubsurface {
                subsurface,
                surface: self.id,
                parent: parent.id,
            })
            .map_err(|e| creation_error("subsurface", e))?;
        self.connection
            .send(Request::SetSubsurfaceDesync { subsurface })?;
        state.role = SurfaceRole::SubSurface {
            subsurface,
            parent: parent.id,
        };
        reset_negotiation(&mut state);
        info!("🪟 Surface {:?} is now a subsurface of {:?}", self.id, parent.id);
        Ok(())
    }

    // Configure negotiation

    pub fn current(&self) -> Option<ConfigRecord> {
        self.state.lock().current
    }

    pub fn pending(&self) -> Option<ConfigRecord> {
        self.state.lock().pending
    }

    /// Stores a proposal as pending. An older unacknowledged proposal is
    /// folded into the new one; it is returned for logging.
    pub fn store_pending(&self, record: ConfigRecord) -> Option<ConfigRecord> {
        let mut state = self.state.lock();
        let superseded = state.pending.replace(record);
        if let Some(old) = superseded {
            debug!(
                "🔧 Surface {:?}: configure {} supersedes {}",
                self.id, record.serial, old.serial
            );
        }
        superseded
    }

    /// Negotiated states the surface currently tracks
    pub fn states(&self) -> ConfigFlags {
        self.state.lock().states
    }

    /// Moves the tracked states to `desired`. With `send` the state requests
    /// are issued in protocol order; otherwise the states are only adopted,
    /// as when they come verbatim from a server proposal.
    pub fn apply_states(&self, desired: ConfigFlags, send: bool) -> Result<Vec<StateChange>> {
        let mut state = self.state.lock();
        let desired = desired & ConfigFlags::NEGOTIATED;
        let SurfaceRole::TopLevel { toplevel } = state.role else {
            return Ok(Vec::new());
        };

        let changes = state_changes(state.states, desired);
        if send {
            for change in &changes {
                let request = match change {
                    StateChange::UnsetMaximized => Request::UnsetMaximized { toplevel },
                    StateChange::UnsetFullscreen => Request::UnsetFullscreen { toplevel },
                    StateChange::SetMaximized => Request::SetMaximized { toplevel },
                    StateChange::SetFullscreen => Request::SetFullscreen { toplevel },
                };
                self.connection.send(request)?;
            }
        }
        state.states = desired;
        Ok(changes)
    }

    /// Acknowledges whichever record accepts the desired configuration,
    /// preferring pending. Nothing changes when neither does.
    pub fn ack_if_compatible(&self, width: u32, height: u32, flags: ConfigFlags) -> Result<AckOutcome> {
        let mut state = self.state.lock();

        if let Some(pending) = state
            .pending
            .filter(|p| p.is_compatible(width, height, flags))
        {
            self.connection.send(Request::AckConfigure {
                surface: self.id,
                serial: pending.serial,
            })?;
            state.current = Some(pending);
            state.pending = None;
            state.states = pending.flags & ConfigFlags::NEGOTIATED;
            debug!(
                "🔧 Surface {:?}: acked configure {} ({}x{})",
                self.id, pending.serial, pending.width, pending.height
            );
            return Ok(AckOutcome::AckedPending(pending.serial));
        }

        if compatible(state.current.as_ref(), width, height, flags) {
            return Ok(AckOutcome::Current);
        }
        Ok(AckOutcome::Incompatible)
    }

    // Placement

    pub fn set_window_geometry(&self, rect: Rect) -> Result<()> {
        let mut state = self.state.lock();
        let SurfaceRole::TopLevel { toplevel } = state.role else {
            return Ok(());
        };
        if state.geometry != Some(rect) {
            self.connection
                .send(Request::SetWindowGeometry { toplevel, rect })?;
            state.geometry = Some(rect);
        }
        Ok(())
    }

    pub fn window_geometry(&self) -> Option<Rect> {
        self.state.lock().geometry
    }

    pub fn set_subsurface_position(&self, x: i32, y: i32) -> Result<()> {
        let state = self.state.lock();
        if let SurfaceRole::SubSurface { subsurface, .. } = state.role {
            self.connection
                .send(Request::SetSubsurfacePosition { subsurface, x, y })?;
        }
        Ok(())
    }

    /// Records the title and forwards it if the surface is a toplevel.
    pub fn set_title(&self, title: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.title.as_deref() == Some(title) {
            return Ok(());
        }
        state.title = Some(title.to_string());
        if let SurfaceRole::TopLevel { toplevel } = state.role {
            self.connection.send(Request::SetTitle {
                toplevel,
                title: title.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn title(&self) -> Option<String> {
        self.state.lock().title.clone()
    }

    pub fn scale(&self) -> u32 {
        self.state.lock().scale
    }

    pub fn set_scale(&self, scale: u32) -> Result<()> {
        let scale = scale.max(1);
        let mut state = self.state.lock();
        if state.scale != scale {
            self.connection.send(Request::SetBufferScale {
                surface: self.id,
                scale,
            })?;
            state.scale = scale;
        }
        Ok(())
    }

    pub fn drawing_allowed(&self) -> bool {
        self.state.lock().drawing_allowed
    }

    pub fn set_drawing_allowed(&self, allowed: bool) {
        self.state.lock().drawing_allowed = allowed;
    }

    /// Whether a buffer has been committed since the role was assigned
    pub fn is_mapped(&self) -> bool {
        self.state.lock().mapped
    }

    /// Attaches `buffer`, damages `damage` and commits.
    pub fn present(&self, buffer: ObjectId, damage: &Region) -> Result<()> {
        let mut state = self.state.lock();
        self.connection.send(Request::Attach {
            surface: self.id,
            buffer: Some(buffer),
        })?;
        for rect in damage.rects() {
            self.connection.send(Request::Damage {
                surface: self.id,
                rect: *rect,
            })?;
        }
        self.connection.send(Request::Commit { surface: self.id })?;
        state.mapped = true;
        Ok(())
    }
}

fn reset_negotiation(state: &mut SurfaceState) {
    state.current = None;
    state.pending = None;
    state.states = ConfigFlags::empty();
    state.geometry = None;
    state.drawing_allowed = false;
    state.mapped = false;
}

fn creation_error(what: &str, err: Error) -> Error {
    if err.is_fatal() {
        err
    } else {
        Error::Allocation(format!("{} creation failed: {}", what, err))
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        let role = self.state.get_mut().role;
        self.connection.unregister_route(self.id);

        let role_request = match role {
            SurfaceRole::None => None,
            SurfaceRole::TopLevel { toplevel } => Some(Request::DestroyToplevel { toplevel }),
            SurfaceRole::SubSurface { subsurface, .. } => {
                Some(Request::DestroySubsurface { subsurface })
            }
        };
        let requests = role_request
            .into_iter()
            .chain(std::iter::once(Request::DestroySurface { surface: self.id }));
        for request in requests {
            if let Err(err) = self.connection.send(request) {
                warn!("🪟 Failed to destroy surface {:?}: {}", self.id, err);
                break;
            }
        }
        debug!("🪟 Destroyed surface {:?}", self.id);
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("window", &self.window)
            .field("state", &*self.state.lock())
            .finish()
    }
}
