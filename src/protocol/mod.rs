//! Display protocol seam
//!
//! The wire protocol itself is owned by the display server and the transport
//! library; this crate only issues requests and consumes events through the
//! [`DisplayBackend`] trait. Requests and events are plain tagged unions so
//! dispatch is an exhaustive `match` and tests can assert on exact request
//! sequences.
//!
//! [`wayland::WaylandBackend`] talks to a real server; [`loopback::LoopbackBackend`]
//! stands in for one in headless runs and tests.
//!
//! ```text
//! ┌──────────────┐  Request   ┌──────────────┐
//! │  Surface /   │───────────►│   Display    │
//! │  Buffers     │            │   Backend    │
//! └──────────────┘            └──────┬───────┘
//!        ▲                           │ ProtocolEvent
//!        │      ┌──────────────┐     │
//!        └──────│  Connection  │◄────┘
//!               │  (routing)   │
//!               └──────────────┘
//! ```

pub mod loopback;
pub mod wayland;

use crate::error::Result;
use crate::geometry::Rect;
use bitflags::bitflags;
use std::os::fd::RawFd;
use std::time::Duration;

/// Protocol object identifier, allocated by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

bitflags! {
    /// Window states carried by a configure proposal.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ConfigFlags: u32 {
        const MAXIMIZED = 1;
        const FULLSCREEN = 2;
        const RESIZING = 4;
        /// States that both sides must agree on before presenting.
        const NEGOTIATED = Self::MAXIMIZED.bits() | Self::FULLSCREEN.bits();
    }
}

impl Default for ConfigFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Shared-memory pixel formats, with their wire codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32-bit ARGB, premultiplied alpha
    Argb8888,
    /// 32-bit RGB, alpha byte ignored
    Xrgb8888,
}

impl PixelFormat {
    pub fn from_wire(code: u32) -> Option<Self> {
        match code {
            0 => Some(PixelFormat::Argb8888),
            1 => Some(PixelFormat::Xrgb8888),
            _ => None,
        }
    }

    pub fn wire(&self) -> u32 {
        match self {
            PixelFormat::Argb8888 => 0,
            PixelFormat::Xrgb8888 => 1,
        }
    }

    pub fn has_alpha(&self) -> bool {
        matches!(self, PixelFormat::Argb8888)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        4
    }
}

/// Outgoing requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CreateSurface { surface: ObjectId },
    DestroySurface { surface: ObjectId },
    SetBufferScale { surface: ObjectId, scale: u32 },
    Attach { surface: ObjectId, buffer: Option<ObjectId> },
    /// Damage in buffer coordinates
    Damage { surface: ObjectId, rect: Rect },
    Commit { surface: ObjectId },

    /// Gives `surface` the top-level role through a new `toplevel` object.
    GetToplevel { surface: ObjectId, toplevel: ObjectId },
    DestroyToplevel { toplevel: ObjectId },
    SetTitle { toplevel: ObjectId, title: String },
    SetWindowGeometry { toplevel: ObjectId, rect: Rect },
    SetMaximized { toplevel: ObjectId },
    UnsetMaximized { toplevel: ObjectId },
    SetFullscreen { toplevel: ObjectId },
    UnsetFullscreen { toplevel: ObjectId },
    AckConfigure { surface: ObjectId, serial: u32 },

    /// Gives `surface` the sub-surface role relative to `parent`.
    GetSubsurface {
        subsurface: ObjectId,
        surface: ObjectId,
        parent: ObjectId,
    },
    DestroySubsurface { subsurface: ObjectId },
    SetSubsurfacePosition { subsurface: ObjectId, x: i32, y: i32 },
    SetSubsurfaceDesync { subsurface: ObjectId },

    CreateShmBuffer {
        buffer: ObjectId,
        fd: RawFd,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
    },
    DestroyBuffer { buffer: ObjectId },
}

impl Request {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Request::CreateSurface { .. } => "create_surface",
            Request::DestroySurface { .. } => "destroy_surface",
            Request::SetBufferScale { .. } => "set_buffer_scale",
            Request::Attach { .. } => "attach",
            Request::Damage { .. } => "damage",
            Request::Commit { .. } => "commit",
            Request::GetToplevel { .. } => "get_toplevel",
            Request::DestroyToplevel { .. } => "destroy_toplevel",
            Request::SetTitle { .. } => "set_title",
            Request::SetWindowGeometry { .. } => "set_window_geometry",
            Request::SetMaximized { .. } => "set_maximized",
            Request::UnsetMaximized { .. } => "unset_maximized",
            Request::SetFullscreen { .. } => "set_fullscreen",
            Request::UnsetFullscreen { .. } => "unset_fullscreen",
            Request::AckConfigure { .. } => "ack_configure",
            Request::GetSubsurface { .. } => "get_subsurface",
            Request::DestroySubsurface { .. } => "destroy_subsurface",
            Request::SetSubsurfacePosition { .. } => "set_subsurface_position",
            Request::SetSubsurfaceDesync { .. } => "set_subsurface_desync",
            Request::CreateShmBuffer { .. } => "create_shm_buffer",
            Request::DestroyBuffer { .. } => "destroy_buffer",
        }
    }
}

/// Incoming events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    Global {
        name: u32,
        interface: String,
        version: u32,
    },
    GlobalRemove { name: u32 },
    ShmFormat { format: u32 },

    OutputAdded { output: ObjectId, rect: Rect, scale: u32 },
    OutputChanged { output: ObjectId, rect: Rect, scale: u32 },
    OutputRemoved { output: ObjectId },

    /// A size/state proposal. Zero width or height means "client chooses".
    Configure {
        surface: ObjectId,
        serial: u32,
        width: i32,
        height: i32,
        states: ConfigFlags,
    },
    ToplevelClose { surface: ObjectId },
    BufferRelease { buffer: ObjectId },

    PointerEnter { surface: ObjectId, serial: u32 },
    PointerLeave { surface: ObjectId },
    PointerMotion,
    PointerButton { serial: u32 },
    KeyboardEnter { surface: ObjectId, serial: u32 },
    KeyboardLeave { surface: ObjectId },
    KeyboardKey { serial: u32 },
}

impl ProtocolEvent {
    /// Object the event is addressed to, if it belongs to a routed object.
    pub fn target(&self) -> Option<ObjectId> {
        match self {
            ProtocolEvent::Configure { surface, .. }
            | ProtocolEvent::ToplevelClose { surface }
            | ProtocolEvent::PointerEnter { surface, .. }
            | ProtocolEvent::PointerLeave { surface }
            | ProtocolEvent::KeyboardEnter { surface, .. }
            | ProtocolEvent::KeyboardLeave { surface } => Some(*surface),
            ProtocolEvent::Global { .. }
            | ProtocolEvent::GlobalRemove { .. }
            | ProtocolEvent::ShmFormat { .. }
            | ProtocolEvent::OutputAdded { .. }
            | ProtocolEvent::OutputChanged { .. }
            | ProtocolEvent::OutputRemoved { .. }
            | ProtocolEvent::BufferRelease { .. }
            | ProtocolEvent::PointerMotion
            | ProtocolEvent::PointerButton { .. }
            | ProtocolEvent::KeyboardKey { .. } => None,
        }
    }
}

/// Transport and request interface of a display server connection.
///
/// Implementations must be usable from the background reader and from any
/// host thread at once.
pub trait DisplayBackend: Send + Sync {
    /// Synchronous round trip returning the initial globals, outputs and formats.
    fn roundtrip(&self) -> Result<Vec<ProtocolEvent>>;

    /// Allocates a fresh object id for a request that creates an object.
    fn new_object(&self) -> ObjectId;

    /// Queues a request. Fails if the object could not be created or the
    /// request was rejected outright.
    fn send(&self, request: Request) -> Result<()>;

    /// Announces the intent to read, before blocking on readiness.
    fn prepare_read(&self) -> Result<()> {
        Ok(())
    }

    /// Writes queued requests to the transport.
    fn flush(&self) -> Result<()>;

    /// Blocks until events are readable or `timeout` elapses.
    fn wait_readable(&self, timeout: Duration) -> Result<bool>;

    /// Reads and decodes whatever events are available.
    fn read_events(&self) -> Result<Vec<ProtocolEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_wire_codes() {
        assert_eq!(PixelFormat::from_wire(0), Some(PixelFormat::Argb8888));
        assert_eq!(PixelFormat::from_wire(1), Some(PixelFormat::Xrgb8888));
        assert_eq!(PixelFormat::from_wire(0x3432_5241), None);
        assert_eq!(PixelFormat::Xrgb8888.wire(), 1);
        assert!(PixelFormat::Argb8888.has_alpha());
        assert!(!PixelFormat::Xrgb8888.has_alpha());
    }

    #[test]
    fn test_negotiated_mask() {
        let flags = ConfigFlags::MAXIMIZED | ConfigFlags::RESIZING;
        assert_eq!(flags & ConfigFlags::NEGOTIATED, ConfigFlags::MAXIMIZED);
        assert_eq!(ConfigFlags::default(), ConfigFlags::empty());
    }

    #[test]
    fn test_event_targets() {
        let configure = ProtocolEvent::Configure {
            surface: ObjectId(7),
            serial: 1,
            width: 0,
            height: 0,
            states: ConfigFlags::empty(),
        };
        assert_eq!(configure.target(), Some(ObjectId(7)));
        assert_eq!(ProtocolEvent::BufferRelease { buffer: ObjectId(3) }.target(), None);
        assert_eq!(ProtocolEvent::PointerButton { serial: 4 }.target(), None);
    }
}
