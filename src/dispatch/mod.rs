//! Event dispatch
//!
//! A single [`Dispatcher`] thread reads the connection and routes events into
//! per-thread queues. Each host thread owns a [`ThreadContext`] and drains only
//! its own queue from [`ThreadContext::wait`], so the handlers for a window
//! always run on the thread that owns it.
//!
//! Cross-thread notifications are [`WindowMessage`]s. They share the queue
//! with protocol events and are consumed by the same [`QueueHandler`].

pub mod reader;
pub mod thread;

pub use reader::Dispatcher;
pub use thread::ThreadContext;

use crate::protocol::ProtocolEvent;
use crate::window::WindowRef;

/// Work items delivered to a window's owning thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowMessage {
    /// A configure proposal was stored as pending.
    ConfigureArrived(WindowRef),
    /// Reconcile the window against its pending proposal now.
    Reconcile(WindowRef),
    /// The server asked for the window to close.
    CloseRequested(WindowRef),
    /// The effective parent of the window lost or replaced its surface.
    Refresh(WindowRef),
    /// Outputs were added, removed or changed.
    DisplayChanged,
}

/// Consumer of a thread's queue
pub trait QueueHandler {
    fn handle_event(&self, ctx: &ThreadContext, event: ProtocolEvent);
    fn handle_message(&self, ctx: &ThreadContext, message: WindowMessage);
}
