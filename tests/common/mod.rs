//! Shared fixtures for the integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wlbridge::geometry::Rect;
use wlbridge::protocol::loopback::LoopbackBackend;
use wlbridge::protocol::{ConfigFlags, ProtocolEvent, Request};
use wlbridge::window::{HostWindows, WindowHandle, WindowStyle};
use wlbridge::{BridgeConfig, Connection, WindowManager};

/// Host that records every callback and answers from a script
#[derive(Default)]
pub struct ScriptedHost {
    pub owners: Mutex<HashMap<WindowHandle, WindowHandle>>,
    pub monitor: Mutex<Option<Rect>>,
    pub placements: Mutex<Vec<(WindowHandle, Rect, ConfigFlags)>>,
    pub closed: Mutex<Vec<WindowHandle>>,
    pub display_changes: Mutex<usize>,
    pub busy: AtomicBool,
}

impl ScriptedHost {
    pub fn set_owner(&self, child: WindowHandle, owner: Option<WindowHandle>) {
        let mut owners = self.owners.lock();
        match owner {
            Some(owner) => owners.insert(child, owner),
            None => owners.remove(&child),
        };
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }
}

impl HostWindows for ScriptedHost {
    fn owner(&self, handle: WindowHandle) -> Option<WindowHandle> {
        self.owners.lock().get(&handle).copied()
    }

    fn monitor_rect(&self, _rect: Rect) -> Option<Rect> {
        *self.monitor.lock()
    }

    fn apply_placement(&self, handle: WindowHandle, rect: Rect, states: ConfigFlags) {
        self.placements.lock().push((handle, rect, states));
    }

    fn request_close(&self, handle: WindowHandle) {
        self.closed.lock().push(handle);
    }

    fn display_changed(&self) {
        *self.display_changes.lock() += 1;
    }

    fn thread_has_pending_messages(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

pub struct Bridge {
    pub backend: Arc<LoopbackBackend>,
    pub host: Arc<ScriptedHost>,
    pub manager: WindowManager,
}

impl Bridge {
    pub fn new() -> Self {
        Self::with_backend(LoopbackBackend::new())
    }

    pub fn with_backend(backend: LoopbackBackend) -> Self {
        Self::with_config(backend, BridgeConfig::default())
    }

    pub fn with_config(backend: LoopbackBackend, config: BridgeConfig) -> Self {
        let backend = Arc::new(backend);
        let connection = Connection::connect(backend.clone(), &config.connection).unwrap();
        connection.set_fatal_hook(|err| panic!("unexpected fatal error: {}", err));
        let host = Arc::new(ScriptedHost::default());
        let manager = WindowManager::new(connection, host.clone(), config);
        Self {
            backend,
            host,
            manager,
        }
    }

    /// Delivers a server configure for the window's current surface and
    /// runs the owning thread's dispatch.
    pub fn configure(&self, handle: WindowHandle, serial: u32, width: i32, height: i32, states: ConfigFlags) {
        let surface = self.manager.surface(handle).unwrap().id();
        self.backend.inject(ProtocolEvent::Configure {
            surface,
            serial,
            width,
            height,
            states,
        });
        self.pump();
    }

    /// Reads pending server events and dispatches this thread's queue.
    pub fn pump(&self) {
        self.manager.connection().pump_once().unwrap();
        self.manager.dispatch(Some(Duration::ZERO)).unwrap();
    }

    pub fn requests(&self) -> Vec<Request> {
        self.backend.requests()
    }
}

pub const FRAMED: WindowStyle = WindowStyle::VISIBLE
    .union(WindowStyle::CAPTION)
    .union(WindowStyle::SYSMENU);
