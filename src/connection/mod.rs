//! Connection management
//!
//! One [`Connection`] exists per display server connection, normally one per
//! process (see [`init_global`]). It owns the backend, the registry of
//! globals/outputs/formats, the routing table mapping protocol objects to the
//! thread queue that owns them, and the set of bound thread queues.
//!
//! ```text
//!                 ┌─────────────┐
//!  reader thread  │ Connection  │  route by ObjectId
//!  ─────────────► │  routes     │ ──────────────┬──────────────┐
//!   pump_once()   │  registry   │               ▼              ▼
//!                 └─────────────┘        ┌────────────┐ ┌────────────┐
//!                                        │ EventQueue │ │ EventQueue │
//!                                        │ (thread A) │ │ (thread B) │
//!                                        └────────────┘ └────────────┘
//! ```

pub mod lock;
pub mod queue;
pub mod registry;

pub use lock::{SharedGuard, SharedLock};
pub use queue::{EventQueue, QueueId};
pub use registry::{GlobalInfo, Output, Registry, RegistryChange};

use crate::config::ConnectionConfig;
use crate::dispatch::WindowMessage;
use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::protocol::{DisplayBackend, ObjectId, PixelFormat, ProtocolEvent, Request};
use crate::window::{InputFocus, WindowHandle, WindowRef};
use calloop::ping::Ping;
use log::{debug, error, info, trace};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Where events for a protocol object are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub queue: QueueId,
    pub window: WindowRef,
}

type FatalHook = Box<dyn Fn(&Error) + Send + Sync>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub struct Connection {
    id: u64,
    backend: Arc<dyn DisplayBackend>,
    config: ConnectionConfig,
    shared: SharedLock,
    registry: Mutex<Registry>,
    routes: RwLock<HashMap<ObjectId, Route>>,
    queues: Mutex<HashMap<QueueId, Arc<EventQueue>>>,
    next_queue: AtomicU64,
    /// Busy flags of live shm buffers, cleared on release
    buffers: Mutex<HashMap<ObjectId, Arc<AtomicBool>>>,
    focus: Mutex<InputFocus>,
    fatal_hook: Mutex<Option<FatalHook>>,
    shutdown: AtomicBool,
}

impl Connection {
    /// Connects through `backend` and waits for the initial globals.
    ///
    /// Fails with [`Error::Connect`] if the server is unreachable or lacks one
    /// of the configured required globals.
    pub fn connect(
        backend: Arc<dyn DisplayBackend>,
        config: &ConnectionConfig,
    ) -> Result<Arc<Connection>> {
        let initial = backend.roundtrip()?;

        let mut registry = Registry::new();
        for event in &initial {
            registry.apply(event);
        }

        if let Some(missing) = config
            .required_globals
            .iter()
            .find(|name| !registry.has_global(name))
        {
            return Err(Error::Connect(format!(
                "server does not advertise required global '{}'",
                missing
            )));
        }

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            "🔌 Connected to display server ({} globals, {} outputs, formats {:?})",
            registry.global_count(),
            registry.outputs().len(),
            registry.formats()
        );

        Ok(Arc::new(Connection {
            id,
            backend,
            config: config.clone(),
            shared: SharedLock::new(config.lock_timeout(), config.lock_retry_timeout()),
            registry: Mutex::new(registry),
            routes: RwLock::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
            next_queue: AtomicU64::new(1),
            buffers: Mutex::new(HashMap::new()),
            focus: Mutex::new(InputFocus::default()),
            fatal_hook: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn new_object(&self) -> ObjectId {
        self.backend.new_object()
    }

    pub fn send(&self, request: Request) -> Result<()> {
        trace!("📤 {:?}", request);
        self.backend.send(request)
    }

    /// Acquires the recursive shared lock.
    pub fn shared_lock(&self) -> SharedGuard<'_> {
        self.shared.acquire()
    }

    // Thread registry

    /// Binds a new queue notified through `ping`.
    pub fn register_queue(&self, ping: Ping) -> Arc<EventQueue> {
        let id = QueueId(self.next_queue.fetch_add(1, Ordering::Relaxed));
        let queue = Arc::new(EventQueue::new(id, ping));
        self.queues.lock().insert(id, Arc::clone(&queue));
        debug!("🧵 Bound event queue {:?}", id);
        queue
    }

    /// Unbinds a queue and drops every route still pointing at it.
    pub fn unregister_queue(&self, id: QueueId) {
        self.queues.lock().remove(&id);
        self.routes.write().retain(|_, route| route.queue != id);
        debug!("🧵 Released event queue {:?}", id);
    }

    pub fn queue(&self, id: QueueId) -> Option<Arc<EventQueue>> {
        self.queues.lock().get(&id).cloned()
    }

    pub fn queue_count(&self) -> usize {
        self.queues.lock().len()
    }

    /// Posts a message to one queue. Returns false if the queue is gone.
    pub fn post(&self, queue: QueueId, message: WindowMessage) -> bool {
        match self.queue(queue) {
            Some(queue) => {
                queue.post(message);
                true
            }
            None => false,
        }
    }

    /// Posts a message to every bound queue.
    pub fn broadcast(&self, message: WindowMessage) {
        for queue in self.queues.lock().values() {
            queue.post(message.clone());
        }
    }

    pub fn notify_all(&self) {
        for queue in self.queues.lock().values() {
            queue.notify();
        }
    }

    // Routing

    pub fn register_route(&self, object: ObjectId, route: Route) {
        self.routes.write().insert(object, route);
    }

    pub fn unregister_route(&self, object: ObjectId) {
        self.routes.write().remove(&object);
    }

    pub fn route(&self, object: ObjectId) -> Option<Route> {
        self.routes.read().get(&object).copied()
    }

    // Buffer release tracking

    pub fn track_buffer(&self, buffer: ObjectId, busy: Arc<AtomicBool>) {
        self.buffers.lock().insert(buffer, busy);
    }

    pub fn untrack_buffer(&self, buffer: ObjectId) {
        self.buffers.lock().remove(&buffer);
    }

    // Registry queries

    pub fn supports_format(&self, format: PixelFormat) -> bool {
        self.registry.lock().supports(format)
    }

    pub fn outputs(&self) -> Vec<Output> {
        let _guard = self.shared.acquire();
        self.registry.lock().outputs()
    }

    /// Output that best covers `rect`
    pub fn output_for(&self, rect: &Rect) -> Option<Output> {
        let _guard = self.shared.acquire();
        self.registry.lock().output_for(rect)
    }

    // Input focus

    pub fn focus(&self) -> InputFocus {
        self.focus.lock().clone()
    }

    pub fn set_pointer_grab(&self, window: Option<WindowHandle>) {
        self.focus.lock().grab = window;
    }

    pub fn forget_window(&self, handle: WindowHandle) {
        self.focus.lock().forget(handle);
    }

    // Reading

    /// One reader iteration: flush, wait for readability, read and route.
    /// Returns the number of events read.
    pub fn pump_once(&self) -> Result<usize> {
        self.backend.prepare_read()?;
        self.backend.flush()?;
        if !self.backend.wait_readable(self.config.reader_poll())? {
            return Ok(0);
        }

        let events = self.backend.read_events()?;
        let count = events.len();
        for event in events {
            self.route_event(event);
        }
        if count > 0 {
            self.notify_all();
        }
        Ok(count)
    }

    /// Applies connection-level events and forwards surface events to the
    /// queue of the thread owning the surface.
    pub fn route_event(&self, event: ProtocolEvent) {
        match &event {
            ProtocolEvent::Global { .. }
            | ProtocolEvent::GlobalRemove { .. }
            | ProtocolEvent::ShmFormat { .. } => {
                self.registry.lock().apply(&event);
            }
            ProtocolEvent::OutputAdded { .. }
            | ProtocolEvent::OutputChanged { .. }
            | ProtocolEvent::OutputRemoved { .. } => {
                let _guard = self.shared.acquire();
                let change = self.registry.lock().apply(&event);
                if change == RegistryChange::Outputs {
                    self.broadcast(WindowMessage::DisplayChanged);
                }
            }
            ProtocolEvent::BufferRelease { buffer } => match self.buffers.lock().get(buffer) {
                Some(busy) => {
                    trace!("📤 Buffer {:?} released", buffer);
                    busy.store(false, Ordering::Release);
                }
                None => debug!("📤 Release for unknown buffer {:?}", buffer),
            },
            ProtocolEvent::PointerMotion
            | ProtocolEvent::PointerButton { .. }
            | ProtocolEvent::KeyboardKey { .. } => {
                self.focus.lock().apply(&event, None);
            }
            ProtocolEvent::PointerEnter { surface, .. }
            | ProtocolEvent::PointerLeave { surface }
            | ProtocolEvent::KeyboardEnter { surface, .. }
            | ProtocolEvent::KeyboardLeave { surface } => {
                let route = self.route(*surface);
                self.focus
                    .lock()
                    .apply(&event, route.map(|r| r.window.handle));
                if let Some(route) = route {
                    self.deliver(route, event);
                }
            }
            ProtocolEvent::Configure { surface, .. } | ProtocolEvent::ToplevelClose { surface } => {
                match self.route(*surface) {
                    Some(route) => self.deliver(route, event),
                    None => debug!("📭 Dropping {:?} for unrouted surface", event),
                }
            }
        }
    }

    fn deliver(&self, route: Route, event: ProtocolEvent) {
        match self.queue(route.queue) {
            Some(queue) => queue.push_event(event),
            None => debug!("📭 Queue {:?} is gone, dropping {:?}", route.queue, event),
        }
    }

    // Lifecycle

    /// Replaces the default fatal-error behavior (log and exit the process).
    pub fn set_fatal_hook<F>(&self, hook: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        *self.fatal_hook.lock() = Some(Box::new(hook));
    }

    /// Reports an unrecoverable connection error.
    pub fn fail(&self, err: &Error) {
        error!("💥 Display connection lost: {}", err);
        self.shutdown.store(true, Ordering::SeqCst);
        match self.fatal_hook.lock().as_ref() {
            Some(hook) => hook(err),
            None => std::process::exit(1),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("queues", &self.queue_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

static GLOBAL: OnceLock<Arc<Connection>> = OnceLock::new();
static GLOBAL_INIT: Mutex<()> = parking_lot::const_mutex(());

/// Returns the process-wide connection, connecting on first use.
///
/// Later calls return the existing connection and ignore their arguments.
/// The connection is never recreated while the process lives.
pub fn init_global(
    backend: Arc<dyn DisplayBackend>,
    config: &ConnectionConfig,
) -> Result<Arc<Connection>> {
    let _init = GLOBAL_INIT.lock();
    if let Some(existing) = GLOBAL.get() {
        return Ok(Arc::clone(existing));
    }
    let connection = Connection::connect(backend, config)?;
    Ok(Arc::clone(GLOBAL.get_or_init(|| connection)))
}

/// The process-wide connection, if one was established.
pub fn global() -> Option<Arc<Connection>> {
    GLOBAL.get().cloned()
}
