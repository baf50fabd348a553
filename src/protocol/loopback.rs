//! In-process display server stand-in
//!
//! `LoopbackBackend` records every request, hands out object ids and lets the
//! caller inject events, buffer releases and failures. It backs headless runs
//! and the test suite.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use wlbridge::protocol::{DisplayBackend, ProtocolEvent};
//! use wlbridge::protocol::loopback::LoopbackBackend;
//!
//! let backend = LoopbackBackend::new();
//! backend.inject(ProtocolEvent::PointerMotion);
//! assert!(backend.wait_readable(Duration::from_millis(10)).unwrap());
//! assert_eq!(backend.read_events().unwrap(), vec![ProtocolEvent::PointerMotion]);
//! ```

use super::{DisplayBackend, ObjectId, PixelFormat, ProtocolEvent, Request};
use crate::error::{Error, Result};
use crate::geometry::Rect;
use log::{debug, trace};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Globals advertised by a default loopback server
pub const DEFAULT_GLOBALS: [&str; 6] = [
    "wl_compositor",
    "wl_shm",
    "wl_subcompositor",
    "xdg_wm_base",
    "wl_seat",
    "wl_output",
];

/// Output advertised by a default loopback server
pub const DEFAULT_OUTPUT: Rect = Rect::new(0, 0, 1920, 1080);

type FailPredicate = Box<dyn Fn(&Request) -> bool + Send + Sync>;

struct LoopbackState {
    /// Every request in send order
    requests: Vec<Request>,
    /// Events waiting to be read
    inbox: VecDeque<ProtocolEvent>,
    /// Events returned by the initial round trip
    initial: Vec<ProtocolEvent>,
    /// Buffer currently attached to each surface
    attached: HashMap<ObjectId, ObjectId>,
    fail_when: Option<FailPredicate>,
    broken: Option<String>,
    auto_release: bool,
    flushes: usize,
}

pub struct LoopbackBackend {
    next_id: AtomicU32,
    state: Mutex<LoopbackState>,
    readable: Condvar,
}

impl LoopbackBackend {
    /// A server with the usual globals, one 1920x1080 output and both
    /// 32-bit shm formats.
    pub fn new() -> Self {
        let mut initial: Vec<ProtocolEvent> = DEFAULT_GLOBALS
            .iter()
            .enumerate()
            .map(|(i, interface)| ProtocolEvent::Global {
                name: i as u32 + 1,
                interface: interface.to_string(),
                version: 1,
            })
            .collect();
        initial.push(ProtocolEvent::ShmFormat {
            format: PixelFormat::Argb8888.wire(),
        });
        initial.push(ProtocolEvent::ShmFormat {
            format: PixelFormat::Xrgb8888.wire(),
        });
        initial.push(ProtocolEvent::OutputAdded {
            output: ObjectId(1),
            rect: DEFAULT_OUTPUT,
            scale: 1,
        });

        Self::with_initial_events(initial)
    }

    /// A server whose round trip yields exactly `initial`.
    pub fn with_initial_events(initial: Vec<ProtocolEvent>) -> Self {
        Self {
            // Low ids are reserved for globals and outputs
            next_id: AtomicU32::new(100),
            state: Mutex::new(LoopbackState {
                requests: Vec::new(),
                inbox: VecDeque::new(),
                initial,
                attached: HashMap::new(),
                fail_when: None,
                broken: None,
                auto_release: false,
                flushes: 0,
            }),
            readable: Condvar::new(),
        }
    }

    /// Drops a global from the initial advertisement.
    pub fn without_global(self, interface: &str) -> Self {
        self.state.lock().initial.retain(|event| {
            !matches!(event, ProtocolEvent::Global { interface: i, .. } if i == interface)
        });
        self
    }

    /// Drops an shm format from the initial advertisement.
    pub fn without_format(self, format: PixelFormat) -> Self {
        self.state.lock().initial.retain(|event| {
            !matches!(event, ProtocolEvent::ShmFormat { format: f } if *f == format.wire())
        });
        self
    }

    /// Queues an event for the reader and wakes it.
    pub fn inject(&self, event: ProtocolEvent) {
        let mut state = self.state.lock();
        trace!("🔁 loopback inject: {:?}", event);
        state.inbox.push_back(event);
        self.readable.notify_all();
    }

    /// Makes every request matching `predicate` fail.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.state.lock().fail_when = Some(Box::new(predicate));
    }

    pub fn clear_failures(&self) {
        self.state.lock().fail_when = None;
    }

    /// Simulates a socket error on the next transport operation.
    pub fn break_transport(&self, reason: &str) {
        let mut state = self.state.lock();
        state.broken = Some(reason.to_string());
        self.readable.notify_all();
    }

    /// Releases each buffer as soon as another buffer replaces it on its
    /// surface, like a server that copies on commit.
    pub fn set_auto_release(&self, enabled: bool) {
        self.state.lock().auto_release = enabled;
    }

    /// Snapshot of every request sent so far
    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().requests.clone()
    }

    /// Returns and forgets the recorded requests.
    pub fn take_requests(&self) -> Vec<Request> {
        std::mem::take(&mut self.state.lock().requests)
    }

    pub fn flush_count(&self) -> usize {
        self.state.lock().flushes
    }
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayBackend for LoopbackBackend {
    fn roundtrip(&self) -> Result<Vec<ProtocolEvent>> {
        let state = self.state.lock();
        if let Some(reason) = &state.broken {
            return Err(Error::Connect(reason.clone()));
        }
        Ok(state.initial.clone())
    }

    fn new_object(&self) -> ObjectId {
        ObjectId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn send(&self, request: Request) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.broken {
            return Err(Error::Transport(reason.clone()));
        }
        if state.fail_when.as_ref().is_some_and(|fail| fail(&request)) {
            debug!("🔁 loopback rejecting {}", request.name());
            return Err(match request {
                Request::Attach { .. } | Request::Commit { .. } | Request::Damage { .. } => {
                    Error::Commit(format!("{} rejected", request.name()))
                }
                _ => Error::Allocation(format!("{} rejected", request.name())),
            });
        }

        match &request {
            Request::Attach {
                surface,
                buffer: Some(buffer),
            } => {
                let previous = state.attached.insert(*surface, *buffer);
                if state.auto_release {
                    if let Some(previous) = previous.filter(|previous| previous != buffer) {
                        state
                            .inbox
                            .push_back(ProtocolEvent::BufferRelease { buffer: previous });
                        self.readable.notify_all();
                    }
                }
            }
            Request::Attach { surface, buffer: None } | Request::DestroySurface { surface } => {
                state.attached.remove(surface);
            }
            _ => {}
        }

        state.requests.push(request);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.broken {
            return Err(Error::Transport(reason.clone()));
        }
        state.flushes += 1;
        Ok(())
    }

    fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        let mut state = self.state.lock();
        if state.inbox.is_empty() && state.broken.is_none() {
            let _ = self.readable.wait_for(&mut state, timeout);
        }
        if let Some(reason) = &state.broken {
            return Err(Error::Transport(reason.clone()));
        }
        Ok(!state.inbox.is_empty())
    }

    fn read_events(&self) -> Result<Vec<ProtocolEvent>> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.broken {
            return Err(Error::Transport(reason.clone()));
        }
        Ok(state.inbox.drain(..).collect())
    }
}
