//! Wayland display server backend
//!
//! Speaks the core protocol and xdg-shell through `wayland-client`. Every
//! object this backend creates carries its [`ObjectId`] as user data, so
//! events come back addressed the way [`crate::connection::Connection`]
//! routes them.
//!
//! The read side follows the library's prepare/read protocol:
//! [`DisplayBackend::prepare_read`] takes the read guard,
//! [`DisplayBackend::wait_readable`] polls the socket and
//! [`DisplayBackend::read_events`] reads, dispatches and drains.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wlbridge::protocol::wayland::WaylandBackend;
//! use wlbridge::{BridgeConfig, Connection};
//!
//! let config = BridgeConfig::default();
//! let backend = Arc::new(WaylandBackend::connect()?);
//! let connection = Connection::connect(backend, &config.connection)?;
//! # let _ = connection;
//! # Ok::<(), wlbridge::Error>(())
//! ```

use super::{ConfigFlags, DisplayBackend, ObjectId, PixelFormat, ProtocolEvent, Request};
use crate::error::{Error, Result};
use crate::geometry::Rect;
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wayland_client::backend::{ReadEventsGuard, WaylandError};
use wayland_client::globals::{registry_queue_init, GlobalList, GlobalListContents};
use wayland_client::protocol::{
    wl_buffer::{self, WlBuffer},
    wl_compositor::WlCompositor,
    wl_keyboard::{self, WlKeyboard},
    wl_output::{self, WlOutput},
    wl_pointer::{self, WlPointer},
    wl_registry::{self, WlRegistry},
    wl_seat::{self, WlSeat},
    wl_shm::{self, WlShm},
    wl_shm_pool::WlShmPool,
    wl_subcompositor::WlSubcompositor,
    wl_subsurface::WlSubsurface,
    wl_surface::{self, WlSurface},
};
use wayland_client::{
    Connection as WaylandConnection, Dispatch, EventQueue, Proxy, QueueHandle, WEnum,
};
use wayland_protocols::xdg::shell::client::{
    xdg_surface::{self, XdgSurface},
    xdg_toplevel::{self, XdgToplevel},
    xdg_wm_base::{self, XdgWmBase},
};

/// Highest wl_output version we understand (scale and done arrive from 2)
const OUTPUT_VERSION: u32 = 3;

/// Globals bound once at connect time
struct Bound {
    compositor: Option<WlCompositor>,
    subcompositor: Option<WlSubcompositor>,
    shm: Option<WlShm>,
    wm_base: Option<XdgWmBase>,
    _seat: Option<WlSeat>,
}

struct SurfaceObjects {
    wl: WlSurface,
    xdg: Option<XdgSurface>,
}

/// Proxies for the objects requests refer to, keyed by our ids
#[derive(Default)]
struct Objects {
    surfaces: HashMap<ObjectId, SurfaceObjects>,
    /// Toplevel and the surface it was created for
    toplevels: HashMap<ObjectId, (XdgToplevel, ObjectId)>,
    subsurfaces: HashMap<ObjectId, WlSubsurface>,
    buffers: HashMap<ObjectId, WlBuffer>,
}

/// Output properties accumulated until the server sends `done`
struct OutputDraft {
    id: ObjectId,
    global: u32,
    proxy: WlOutput,
    rect: Rect,
    scale: u32,
    announced: bool,
}

/// State handed to the dispatch callbacks
pub struct WaylandState {
    next_id: Arc<AtomicU32>,
    events: Vec<ProtocolEvent>,
    outputs: HashMap<ObjectId, OutputDraft>,
    /// Toplevel configure waiting for the matching xdg_surface configure
    pending: HashMap<ObjectId, (i32, i32, ConfigFlags)>,
    pointer: Option<WlPointer>,
    keyboard: Option<WlKeyboard>,
}

impl WaylandState {
    fn new(next_id: Arc<AtomicU32>) -> Self {
        Self {
            next_id,
            events: Vec::new(),
            outputs: HashMap::new(),
            pending: HashMap::new(),
            pointer: None,
            keyboard: None,
        }
    }

    fn bind_output(
        &mut self,
        registry: &WlRegistry,
        global: u32,
        version: u32,
        qh: &QueueHandle<WaylandState>,
    ) {
        let id = ObjectId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let proxy: WlOutput = registry.bind(global, version.min(OUTPUT_VERSION), qh, id);
        debug!("🖥️ Bound output global {} as {:?}", global, id);
        self.outputs.insert(
            id,
            OutputDraft {
                id,
                global,
                proxy,
                rect: Rect::default(),
                scale: 1,
                announced: false,
            },
        );
    }
}

struct Dispatching {
    queue: EventQueue<WaylandState>,
    state: WaylandState,
}

/// [`DisplayBackend`] over a live Wayland connection
pub struct WaylandBackend {
    conn: WaylandConnection,
    qh: QueueHandle<WaylandState>,
    globals: GlobalList,
    bound: Bound,
    dispatching: Mutex<Dispatching>,
    read_guard: Mutex<Option<ReadEventsGuard>>,
    objects: Mutex<Objects>,
    next_id: Arc<AtomicU32>,
}

impl WaylandBackend {
    /// Connects to the server named by `WAYLAND_DISPLAY` / `WAYLAND_SOCKET`.
    pub fn connect() -> Result<Self> {
        let conn = WaylandConnection::connect_to_env()
            .map_err(|e| Error::Connect(format!("wayland connect: {}", e)))?;
        Self::with_connection(conn)
    }

    /// Connects over an already opened socket.
    pub fn from_socket(stream: UnixStream) -> Result<Self> {
        let conn = WaylandConnection::from_socket(stream)
            .map_err(|e| Error::Connect(format!("wayland socket: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: WaylandConnection) -> Result<Self> {
        let (globals, queue) = registry_queue_init::<WaylandState>(&conn)
            .map_err(|e| Error::Connect(format!("registry: {}", e)))?;
        let qh = queue.handle();

        let bound = Bound {
            compositor: globals.bind::<WlCompositor, _, _>(&qh, 4..=6, ()).ok(),
            subcompositor: globals.bind::<WlSubcompositor, _, _>(&qh, 1..=1, ()).ok(),
            shm: globals.bind::<WlShm, _, _>(&qh, 1..=1, ()).ok(),
            wm_base: globals.bind::<XdgWmBase, _, _>(&qh, 1..=5, ()).ok(),
            _seat: globals.bind::<WlSeat, _, _>(&qh, 1..=7, ()).ok(),
        };
        if bound.compositor.is_none() {
            warn!("🔌 wl_compositor missing or older than version 4");
        }

        let next_id = Arc::new(AtomicU32::new(1));
        let mut state = WaylandState::new(Arc::clone(&next_id));
        for global in globals.contents().clone_list() {
            if global.interface == WlOutput::interface().name {
                state.bind_output(globals.registry(), global.name, global.version, &qh);
            }
        }

        info!(
            "🔌 Wayland connection open (compositor={}, subcompositor={}, shm={}, xdg_wm_base={})",
            bound.compositor.is_some(),
            bound.subcompositor.is_some(),
            bound.shm.is_some(),
            bound.wm_base.is_some()
        );

        Ok(Self {
            conn,
            qh,
            globals,
            bound,
            dispatching: Mutex::new(Dispatching { queue, state }),
            read_guard: Mutex::new(None),
            objects: Mutex::new(Objects::default()),
            next_id,
        })
    }

    fn surface<'a>(objects: &'a Objects, id: ObjectId) -> Result<&'a SurfaceObjects> {
        objects
            .surfaces
            .get(&id)
            .ok_or_else(|| Error::Protocol(format!("unknown surface {:?}", id)))
    }

    fn toplevel(objects: &Objects, id: ObjectId) -> Result<&XdgToplevel> {
        objects
            .toplevels
            .get(&id)
            .map(|(toplevel, _)| toplevel)
            .ok_or_else(|| Error::Protocol(format!("unknown toplevel {:?}", id)))
    }

    fn subsurface(objects: &Objects, id: ObjectId) -> Result<&WlSubsurface> {
        objects
            .subsurfaces
            .get(&id)
            .ok_or_else(|| Error::Protocol(format!("unknown subsurface {:?}", id)))
    }

    fn xdg_surface(objects: &Objects, surface: ObjectId) -> Result<&XdgSurface> {
        Self::surface(objects, surface)?
            .xdg
            .as_ref()
            .ok_or_else(|| Error::Protocol(format!("surface {:?} has no xdg role", surface)))
    }

    fn apply(&self, objects: &mut Objects, request: Request) -> Result<()> {
        let qh = &self.qh;
        match request {
            Request::CreateSurface { surface } => {
                let compositor = self
                    .bound
                    .compositor
                    .as_ref()
                    .ok_or_else(|| Error::Allocation("wl_compositor not bound".into()))?;
                let wl = compositor.create_surface(qh, surface);
                objects.surfaces.insert(surface, SurfaceObjects { wl, xdg: None });
            }
            Request::DestroySurface { surface } => {
                if let Some(entry) = objects.surfaces.remove(&surface) {
                    if let Some(xdg) = entry.xdg {
                        xdg.destroy();
                    }
                    entry.wl.destroy();
                }
            }
            Request::SetBufferScale { surface, scale } => {
                Self::surface(objects, surface)?.wl.set_buffer_scale(to_i32(scale));
            }
            Request::Attach { surface, buffer } => {
                let buffer = match buffer {
                    Some(id) => Some(
                        objects
                            .buffers
                            .get(&id)
                            .ok_or_else(|| Error::Commit(format!("unknown buffer {:?}", id)))?,
                    ),
                    None => None,
                };
                Self::surface(objects, surface)?.wl.attach(buffer, 0, 0);
            }
            Request::Damage { surface, rect } => {
                Self::surface(objects, surface)?.wl.damage_buffer(
                    rect.x,
                    rect.y,
                    to_i32(rect.width),
                    to_i32(rect.height),
                );
            }
            Request::Commit { surface } => {
                Self::surface(objects, surface)?.wl.commit();
            }

            Request::GetToplevel { surface, toplevel } => {
                let wm_base = self
                    .bound
                    .wm_base
                    .as_ref()
                    .ok_or_else(|| Error::Allocation("xdg_wm_base not bound".into()))?;
                let entry = objects
                    .surfaces
                    .get_mut(&surface)
                    .ok_or_else(|| Error::Protocol(format!("unknown surface {:?}", surface)))?;
                let xdg = wm_base.get_xdg_surface(&entry.wl, qh, surface);
                let role = xdg.get_toplevel(qh, surface);
                // The server sends the first configure after an empty commit
                entry.wl.commit();
                entry.xdg = Some(xdg);
                objects.toplevels.insert(toplevel, (role, surface));
            }
            Request::DestroyToplevel { toplevel } => {
                if let Some((role, surface)) = objects.toplevels.remove(&toplevel) {
                    role.destroy();
                    if let Some(xdg) = objects.surfaces.get_mut(&surface).and_then(|s| s.xdg.take()) {
                        xdg.destroy();
                    }
                }
            }
            Request::SetTitle { toplevel, title } => {
                Self::toplevel(objects, toplevel)?.set_title(title);
            }
            Request::SetWindowGeometry { toplevel, rect } => {
                let surface = objects
                    .toplevels
                    .get(&toplevel)
                    .map(|(_, surface)| *surface)
                    .ok_or_else(|| Error::Protocol(format!("unknown toplevel {:?}", toplevel)))?;
                Self::xdg_surface(objects, surface)?.set_window_geometry(
                    rect.x,
                    rect.y,
                    to_i32(rect.width),
                    to_i32(rect.height),
                );
            }
            Request::SetMaximized { toplevel } => Self::toplevel(objects, toplevel)?.set_maximized(),
            Request::UnsetMaximized { toplevel } => {
                Self::toplevel(objects, toplevel)?.unset_maximized()
            }
            Request::SetFullscreen { toplevel } => {
                Self::toplevel(objects, toplevel)?.set_fullscreen(None)
            }
            Request::UnsetFullscreen { toplevel } => {
                Self::toplevel(objects, toplevel)?.unset_fullscreen()
            }
            Request::AckConfigure { surface, serial } => {
                Self::xdg_surface(objects, surface)?.ack_configure(serial);
            }

            Request::GetSubsurface {
                subsurface,
                surface,
                parent,
            } => {
                let subcompositor = self
                    .bound
                    .subcompositor
                    .as_ref()
                    .ok_or_else(|| Error::Allocation("wl_subcompositor not bound".into()))?;
                let child = Self::surface(objects, surface)?;
                let parent = Self::surface(objects, parent)?;
                let role = subcompositor.get_subsurface(&child.wl, &parent.wl, qh, ());
                objects.subsurfaces.insert(subsurface, role);
            }
            Request::DestroySubsurface { subsurface } => {
                if let Some(role) = objects.subsurfaces.remove(&subsurface) {
                    role.destroy();
                }
            }
            Request::SetSubsurfacePosition { subsurface, x, y } => {
                Self::subsurface(objects, subsurface)?.set_position(x, y);
            }
            Request::SetSubsurfaceDesync { subsurface } => {
                Self::subsurface(objects, subsurface)?.set_desync();
            }

            Request::CreateShmBuffer {
                buffer,
                fd,
                width,
                height,
                stride,
                format,
            } => {
                let shm = self
                    .bound
                    .shm
                    .as_ref()
                    .ok_or_else(|| Error::Allocation("wl_shm not bound".into()))?;
                let size = stride
                    .checked_mul(height)
                    .and_then(|size| i32::try_from(size).ok())
                    .ok_or_else(|| {
                        Error::Allocation(format!("shm pool for {}x{} overflows", width, height))
                    })?;
                // SAFETY: the caller keeps the shm file open until the request
                // is sent, and the pool only needs the fd for this call
                let fd = unsafe { BorrowedFd::borrow_raw(fd) };
                let pool: WlShmPool = shm.create_pool(fd, size, qh, ());
                let wl = pool.create_buffer(
                    0,
                    to_i32(width),
                    to_i32(height),
                    to_i32(stride),
                    shm_format(format),
                    qh,
                    buffer,
                );
                pool.destroy();
                objects.buffers.insert(buffer, wl);
            }
            Request::DestroyBuffer { buffer } => {
                if let Some(wl) = objects.buffers.remove(&buffer) {
                    wl.destroy();
                }
            }
        }
        Ok(())
    }
}

impl DisplayBackend for WaylandBackend {
    fn roundtrip(&self) -> Result<Vec<ProtocolEvent>> {
        let mut events: Vec<ProtocolEvent> = self
            .globals
            .contents()
            .clone_list()
            .into_iter()
            .map(|global| ProtocolEvent::Global {
                name: global.name,
                interface: global.interface,
                version: global.version,
            })
            .collect();

        let mut dispatching = self.dispatching.lock();
        let Dispatching { queue, state } = &mut *dispatching;
        queue
            .roundtrip(state)
            .map_err(|e| Error::Connect(format!("initial roundtrip: {}", e)))?;
        events.append(&mut state.events);
        debug!("🔌 Initial roundtrip returned {} events", events.len());
        Ok(events)
    }

    fn new_object(&self) -> ObjectId {
        ObjectId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn send(&self, request: Request) -> Result<()> {
        let name = request.name();
        {
            let mut objects = self.objects.lock();
            self.apply(&mut objects, request)?;
        }
        trace!("📤 wayland {}", name);
        self.flush()
    }

    fn prepare_read(&self) -> Result<()> {
        let mut guard = self.read_guard.lock();
        if guard.is_none() {
            // None means events are already queued; read_events dispatches them
            *guard = self.dispatching.lock().queue.prepare_read();
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        match self.conn.flush() {
            Ok(()) => Ok(()),
            Err(WaylandError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(Error::Transport(format!("flush: {}", e))),
        }
    }

    fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        if self.read_guard.lock().is_none() {
            return Ok(true);
        }
        let backend = self.conn.backend();
        poll_readable(backend.poll_fd().as_raw_fd(), timeout)
    }

    fn read_events(&self) -> Result<Vec<ProtocolEvent>> {
        if let Some(guard) = self.read_guard.lock().take() {
            match guard.read() {
                Ok(_) => {}
                Err(WaylandError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(Error::Transport(format!("read: {}", e))),
            }
        }

        let mut dispatching = self.dispatching.lock();
        let Dispatching { queue, state } = &mut *dispatching;
        queue
            .dispatch_pending(state)
            .map_err(|e| Error::Transport(format!("dispatch: {}", e)))?;
        Ok(std::mem::take(&mut state.events))
    }
}

/// Polls `fd` for input. An interrupted wait counts as a timeout.
fn poll_readable(fd: i32, timeout: Duration) -> Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;

    let rc = unsafe { libc::poll(&mut pfd as *mut libc::pollfd, 1, timeout_ms) };
    if rc < 0 {
        let e = io::Error::last_os_error();
        if e.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(Error::Transport(format!("poll: {}", e)));
    }
    if pfd.revents & (libc::POLLERR | libc::POLLHUP) != 0 {
        return Err(Error::Transport("display socket hung up".into()));
    }
    Ok(rc > 0 && pfd.revents & libc::POLLIN != 0)
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn shm_format(format: PixelFormat) -> wl_shm::Format {
    match format {
        PixelFormat::Argb8888 => wl_shm::Format::Argb8888,
        PixelFormat::Xrgb8888 => wl_shm::Format::Xrgb8888,
    }
}

/// Wire code of an advertised shm format, known to the library or not
fn format_code(format: WEnum<wl_shm::Format>) -> u32 {
    match format {
        WEnum::Value(format) => u32::from(format),
        WEnum::Unknown(raw) => raw,
    }
}

/// Decodes the packed state array of an xdg_toplevel configure.
fn toplevel_states(raw: &[u8]) -> ConfigFlags {
    let maximized = u32::from(xdg_toplevel::State::Maximized);
    let fullscreen = u32::from(xdg_toplevel::State::Fullscreen);
    let resizing = u32::from(xdg_toplevel::State::Resizing);

    raw.chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .fold(ConfigFlags::empty(), |flags, state| match state {
            s if s == maximized => flags | ConfigFlags::MAXIMIZED,
            s if s == fullscreen => flags | ConfigFlags::FULLSCREEN,
            s if s == resizing => flags | ConfigFlags::RESIZING,
            _ => flags,
        })
}

/* ---------- Dispatch ---------- */

impl Dispatch<WlRegistry, GlobalListContents> for WaylandState {
    fn event(
        state: &mut WaylandState,
        registry: &WlRegistry,
        event: wl_registry::Event,
        _data: &GlobalListContents,
        _conn: &WaylandConnection,
        qh: &QueueHandle<WaylandState>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => {
                if interface == WlOutput::interface().name {
                    state.bind_output(registry, name, version, qh);
                }
                state.events.push(ProtocolEvent::Global {
                    name,
                    interface,
                    version,
                });
            }
            wl_registry::Event::GlobalRemove { name } => {
                let output = state
                    .outputs
                    .values()
                    .find(|draft| draft.global == name)
                    .map(|draft| draft.id);
                if let Some(draft) = output.and_then(|id| state.outputs.remove(&id)) {
                    if draft.announced {
                        state.events.push(ProtocolEvent::OutputRemoved { output: draft.id });
                    }
                    if draft.proxy.version() >= 3 {
                        draft.proxy.release();
                    }
                }
                state.events.push(ProtocolEvent::GlobalRemove { name });
            }
            _ => {}
        }
    }
}

impl Dispatch<WlOutput, ObjectId> for WaylandState {
    fn event(
        state: &mut WaylandState,
        _proxy: &WlOutput,
        event: wl_output::Event,
        id: &ObjectId,
        _conn: &WaylandConnection,
        _qh: &QueueHandle<WaylandState>,
    ) {
        let Some(draft) = state.outputs.get_mut(id) else {
            return;
        };
        match event {
            wl_output::Event::Geometry { x, y, .. } => {
                draft.rect.x = x;
                draft.rect.y = y;
            }
            wl_output::Event::Mode {
                flags: WEnum::Value(flags),
                width,
                height,
                ..
            } if flags.contains(wl_output::Mode::Current) => {
                draft.rect.width = width.max(0) as u32;
                draft.rect.height = height.max(0) as u32;
            }
            wl_output::Event::Scale { factor } => {
                draft.scale = factor.max(1) as u32;
            }
            wl_output::Event::Done => {
                let (output, rect, scale) = (draft.id, draft.rect, draft.scale);
                let event = if draft.announced {
                    ProtocolEvent::OutputChanged { output, rect, scale }
                } else {
                    draft.announced = true;
                    ProtocolEvent::OutputAdded { output, rect, scale }
                };
                state.events.push(event);
            }
            _ => {}
        }
    }
}

impl Dispatch<WlShm, ()> for WaylandState {
    fn event(
        state: &mut WaylandState,
        _proxy: &WlShm,
        event: wl_shm::Event,
        _data: &(),
        _conn: &WaylandConnection,
        _qh: &QueueHandle<WaylandState>,
    ) {
        if let wl_shm::Event::Format { format } = event {
            state.events.push(ProtocolEvent::ShmFormat {
                format: format_code(format),
            });
        }
    }
}

impl Dispatch<WlBuffer, ObjectId> for WaylandState {
    fn event(
        state: &mut WaylandState,
        _proxy: &WlBuffer,
        event: wl_buffer::Event,
        id: &ObjectId,
        _conn: &WaylandConnection,
        _qh: &QueueHandle<WaylandState>,
    ) {
        if let wl_buffer::Event::Release = event {
            state.events.push(ProtocolEvent::BufferRelease { buffer: *id });
        }
    }
}

impl Dispatch<WlSurface, ObjectId> for WaylandState {
    fn event(
        _state: &mut WaylandState,
        _proxy: &WlSurface,
        event: wl_surface::Event,
        id: &ObjectId,
        _conn: &WaylandConnection,
        _qh: &QueueHandle<WaylandState>,
    ) {
        // Output membership is derived from window rectangles instead
        trace!("🧩 Surface {:?}: {:?}", id, event);
    }
}

impl Dispatch<WlSeat, ()> for WaylandState {
    fn event(
        state: &mut WaylandState,
        seat: &WlSeat,
        event: wl_seat::Event,
        _data: &(),
        _conn: &WaylandConnection,
        qh: &QueueHandle<WaylandState>,
    ) {
        if let wl_seat::Event::Capabilities {
            capabilities: WEnum::Value(capabilities),
        } = event
        {
            if capabilities.contains(wl_seat::Capability::Pointer) && state.pointer.is_none() {
                state.pointer = Some(seat.get_pointer(qh, ()));
            }
            if capabilities.contains(wl_seat::Capability::Keyboard) && state.keyboard.is_none() {
                state.keyboard = Some(seat.get_keyboard(qh, ()));
            }
            debug!("⌨️ Seat capabilities {:?}", capabilities);
        }
    }
}

impl Dispatch<WlPointer, ()> for WaylandState {
    fn event(
        state: &mut WaylandState,
        _proxy: &WlPointer,
        event: wl_pointer::Event,
        _data: &(),
        _conn: &WaylandConnection,
        _qh: &QueueHandle<WaylandState>,
    ) {
        let event = match event {
            wl_pointer::Event::Enter { serial, surface, .. } => surface
                .data::<ObjectId>()
                .map(|&surface| ProtocolEvent::PointerEnter { surface, serial }),
            wl_pointer::Event::Leave { surface, .. } => surface
                .data::<ObjectId>()
                .map(|&surface| ProtocolEvent::PointerLeave { surface }),
            wl_pointer::Event::Motion { .. } => Some(ProtocolEvent::PointerMotion),
            wl_pointer::Event::Button { serial, .. } => Some(ProtocolEvent::PointerButton { serial }),
            _ => None,
        };
        state.events.extend(event);
    }
}

impl Dispatch<WlKeyboard, ()> for WaylandState {
    fn event(
        state: &mut WaylandState,
        _proxy: &WlKeyboard,
        event: wl_keyboard::Event,
        _data: &(),
        _conn: &WaylandConnection,
        _qh: &QueueHandle<WaylandState>,
    ) {
        let event = match event {
            wl_keyboard::Event::Enter { serial, surface, .. } => surface
                .data::<ObjectId>()
                .map(|&surface| ProtocolEvent::KeyboardEnter { surface, serial }),
            wl_keyboard::Event::Leave { surface, .. } => surface
                .data::<ObjectId>()
                .map(|&surface| ProtocolEvent::KeyboardLeave { surface }),
            wl_keyboard::Event::Key { serial, .. } => Some(ProtocolEvent::KeyboardKey { serial }),
            _ => None,
        };
        state.events.extend(event);
    }
}

impl Dispatch<XdgWmBase, ()> for WaylandState {
    fn event(
        _state: &mut WaylandState,
        wm_base: &XdgWmBase,
        event: xdg_wm_base::Event,
        _data: &(),
        _conn: &WaylandConnection,
        _qh: &QueueHandle<WaylandState>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            wm_base.pong(serial);
        }
    }
}

impl Dispatch<XdgSurface, ObjectId> for WaylandState {
    fn event(
        state: &mut WaylandState,
        _proxy: &XdgSurface,
        event: xdg_surface::Event,
        surface: &ObjectId,
        _conn: &WaylandConnection,
        _qh: &QueueHandle<WaylandState>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            let (width, height, states) = state
                .pending
                .remove(surface)
                .unwrap_or((0, 0, ConfigFlags::empty()));
            state.events.push(ProtocolEvent::Configure {
                surface: *surface,
                serial,
                width,
                height,
                states,
            });
        }
    }
}

impl Dispatch<XdgToplevel, ObjectId> for WaylandState {
    fn event(
        state: &mut WaylandState,
        _proxy: &XdgToplevel,
        event: xdg_toplevel::Event,
        surface: &ObjectId,
        _conn: &WaylandConnection,
        _qh: &QueueHandle<WaylandState>,
    ) {
        match event {
            xdg_toplevel::Event::Configure {
                width,
                height,
                states,
            } => {
                state
                    .pending
                    .insert(*surface, (width, height, toplevel_states(&states)));
            }
            xdg_toplevel::Event::Close => {
                state.events.push(ProtocolEvent::ToplevelClose { surface: *surface });
            }
            _ => {}
        }
    }
}

wayland_client::delegate_noop!(WaylandState: ignore WlCompositor);
wayland_client::delegate_noop!(WaylandState: ignore WlSubcompositor);
wayland_client::delegate_noop!(WaylandState: ignore WlSubsurface);
wayland_client::delegate_noop!(WaylandState: ignore WlShmPool);

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn packed(states: &[xdg_toplevel::State]) -> Vec<u8> {
        states
            .iter()
            .flat_map(|&state| u32::from(state).to_ne_bytes())
            .collect()
    }

    #[test]
    fn test_toplevel_states_decode() {
        let raw = packed(&[
            xdg_toplevel::State::Activated,
            xdg_toplevel::State::Maximized,
            xdg_toplevel::State::Resizing,
        ]);
        assert_eq!(
            toplevel_states(&raw),
            ConfigFlags::MAXIMIZED | ConfigFlags::RESIZING
        );

        let raw = packed(&[xdg_toplevel::State::Fullscreen]);
        assert_eq!(toplevel_states(&raw), ConfigFlags::FULLSCREEN);
        assert_eq!(toplevel_states(&[]), ConfigFlags::empty());
        // A truncated trailing entry is ignored
        assert_eq!(toplevel_states(&[2, 0]), ConfigFlags::empty());
    }

    #[test]
    fn test_shm_format_codes_match_pixel_formats() {
        for format in [PixelFormat::Argb8888, PixelFormat::Xrgb8888] {
            assert_eq!(format_code(WEnum::Value(shm_format(format))), format.wire());
        }
        assert_eq!(format_code(WEnum::Unknown(0x3432_5241)), 0x3432_5241);
    }

    #[test]
    fn test_poll_reports_readable_socket() {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        assert!(!poll_readable(ours.as_raw_fd(), Duration::from_millis(10)).unwrap());

        std::io::Write::write_all(&mut theirs, b"x").unwrap();
        assert!(poll_readable(ours.as_raw_fd(), Duration::from_millis(100)).unwrap());
    }

    #[test]
    fn test_poll_reports_hangup_as_transport_error() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        drop(theirs);
        let err = poll_readable(ours.as_raw_fd(), Duration::from_millis(10)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_closed_socket_fails_to_connect() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        drop(theirs);
        match WaylandBackend::from_socket(ours) {
            Err(Error::Connect(_)) => {}
            Err(other) => panic!("expected a connect error, got {:?}", other),
            Ok(_) => panic!("connected to a closed socket"),
        }
    }

    #[test]
    #[serial]
    fn test_missing_display_fails_to_connect() {
        let dir = tempfile::tempdir().unwrap();
        let saved = (
            std::env::var_os("WAYLAND_DISPLAY"),
            std::env::var_os("WAYLAND_SOCKET"),
        );
        std::env::remove_var("WAYLAND_SOCKET");
        std::env::set_var("WAYLAND_DISPLAY", dir.path().join("wayland-missing"));

        let result = WaylandBackend::connect();

        match saved.0 {
            Some(value) => std::env::set_var("WAYLAND_DISPLAY", value),
            None => std::env::remove_var("WAYLAND_DISPLAY"),
        }
        if let Some(value) = saved.1 {
            std::env::set_var("WAYLAND_SOCKET", value);
        }
        assert!(matches!(result, Err(Error::Connect(_))));
    }
}
