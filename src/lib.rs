//! # wlbridge
//!
//! Hosts retained-mode windows (one handle, one rectangle, "show these pixels
//! now") on a display server that negotiates every size and state change
//! through configure/acknowledge round trips.
//!
//! ## Architecture
//!
//! - `connection`: the one shared display connection, its globals and outputs,
//!   and the routing of protocol objects to thread queues
//! - `dispatch`: the background reader and the per-thread wait primitive
//! - `surface`: protocol surfaces, their roles and configure records
//! - `window`: window state, role decisions, configure reconciliation and the
//!   host-facing [`WindowManager`]
//! - `buffer`: shared-memory buffer queues and the damage flusher
//! - `protocol`: the request/event seam, a `wayland-client` backend and an
//!   in-process loopback server
//! - `config`: TOML configuration
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wlbridge::protocol::loopback::LoopbackBackend;
//! use wlbridge::window::{HostWindows, WindowHandle, WindowRects, WindowStyle};
//! use wlbridge::{BridgeConfig, Dispatcher, WindowManager};
//! # use wlbridge::geometry::Rect;
//! # use wlbridge::protocol::ConfigFlags;
//! # struct Host;
//! # impl HostWindows for Host {
//! #     fn owner(&self, _: WindowHandle) -> Option<WindowHandle> { None }
//! #     fn apply_placement(&self, _: WindowHandle, _: Rect, _: ConfigFlags) {}
//! #     fn request_close(&self, _: WindowHandle) {}
//! # }
//!
//! fn main() -> wlbridge::Result<()> {
//!     let config = BridgeConfig::default();
//!     wlbridge::logging::init(&config.logging);
//!
//!     let connection = wlbridge::connection::init_global(
//!         Arc::new(LoopbackBackend::new()),
//!         &config.connection,
//!     )?;
//!     let _reader = Dispatcher::spawn(connection.clone())?;
//!     let manager = WindowManager::new(connection, Arc::new(Host), config);
//!
//!     let window = WindowHandle(1);
//!     let rects = WindowRects::plain(Rect::new(0, 0, 800, 600));
//!     manager.on_window_pos_changed(window, rects, WindowStyle::VISIBLE | WindowStyle::CAPTION)?;
//!     manager.dispatch(None)?;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod protocol;
pub mod surface;
pub mod window;

// Re-export main types for easy access
pub use buffer::{FlushOutcome, HostBitmap, WindowSurface};
pub use config::BridgeConfig;
pub use connection::Connection;
pub use dispatch::{Dispatcher, ThreadContext};
pub use error::{Error, Result};
pub use surface::Surface;
pub use window::{Reconcile, WindowManager};

/// Version information for wlbridge
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
