//! Per-thread dispatch context
//!
//! Every host thread that owns windows gets one [`ThreadContext`] per
//! connection, created on its first window-related call and released when the
//! thread exits. The context owns a calloop event loop that watches the
//! queue's eventfd and runs the low-priority reconcile timers.

use super::{QueueHandler, WindowMessage};
use crate::connection::{Connection, EventQueue, QueueId};
use crate::error::{Error, Result};
use crate::window::WindowRef;
use calloop::ping::make_ping;
use calloop::timer::{TimeoutAction, Timer};
use calloop::EventLoop;
use log::{debug, info, trace};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

thread_local! {
    static CONTEXTS: RefCell<HashMap<u64, Rc<ThreadContext>>> = RefCell::new(HashMap::new());
}

#[derive(Debug, Default)]
struct LoopState {
    woken: bool,
    /// Windows whose deferred reconcile timer fired
    fired: Vec<WindowRef>,
}

pub struct ThreadContext {
    connection: Arc<Connection>,
    queue: Arc<EventQueue>,
    event_loop: RefCell<EventLoop<'static, LoopState>>,
    state: RefCell<LoopState>,
}

impl ThreadContext {
    /// The calling thread's context for `connection`, bound on first use.
    pub fn current(connection: &Arc<Connection>) -> Result<Rc<ThreadContext>> {
        CONTEXTS.with(|contexts| {
            if let Some(ctx) = contexts.borrow().get(&connection.id()) {
                return Ok(Rc::clone(ctx));
            }
            let ctx = Rc::new(Self::bind(connection)?);
            contexts
                .borrow_mut()
                .insert(connection.id(), Rc::clone(&ctx));
            Ok(ctx)
        })
    }

    /// Releases the calling thread's context early. It is otherwise released
    /// when the thread exits.
    pub fn release(connection: &Connection) {
        CONTEXTS.with(|contexts| {
            contexts.borrow_mut().remove(&connection.id());
        });
    }

    fn bind(connection: &Arc<Connection>) -> Result<Self> {
        let event_loop: EventLoop<'static, LoopState> = EventLoop::try_new()
            .map_err(|e| Error::Allocation(format!("thread event loop: {}", e)))?;
        let (ping, ping_source) =
            make_ping().map_err(|e| Error::Allocation(format!("thread eventfd: {}", e)))?;

        event_loop
            .handle()
            .insert_source(ping_source, |(), _, state: &mut LoopState| {
                state.woken = true;
            })
            .map_err(|e| Error::Allocation(format!("thread ping source: {}", e.error)))?;

        let queue = connection.register_queue(ping);
        info!(
            "🧵 Thread {:?} bound to queue {:?}",
            std::thread::current().id(),
            queue.id()
        );

        Ok(Self {
            connection: Arc::clone(connection),
            queue,
            event_loop: RefCell::new(event_loop),
            state: RefCell::new(LoopState::default()),
        })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn queue_id(&self) -> QueueId {
        self.queue.id()
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Whether events or messages are still waiting on this thread.
    pub fn has_backlog(&self) -> bool {
        self.queue.has_backlog()
    }

    pub fn post(&self, message: WindowMessage) {
        self.queue.post(message);
    }

    /// Arms a one-shot timer that turns into [`WindowMessage::Reconcile`]
    /// after `delay`.
    pub fn schedule_reconcile(&self, window: WindowRef, delay: Duration) -> Result<()> {
        let timer = Timer::from_duration(delay);
        self.event_loop
            .borrow()
            .handle()
            .insert_source(
                timer,
                move |_deadline: Instant, _meta: &mut (), state: &mut LoopState| {
                    state.fired.push(window);
                    TimeoutAction::Drop
                },
            )
            .map_err(|e| Error::Allocation(format!("reconcile timer: {}", e.error)))?;
        debug!("⏱️ Reconcile of {:?} deferred by {:?}", window.handle, delay);
        Ok(())
    }

    /// Blocks for at most `timeout` (forever if `None`) until this thread has
    /// work, then dispatches everything queued. Returns the number of events
    /// and messages handled.
    pub fn wait<H>(&self, handler: &H, timeout: Option<Duration>) -> Result<usize>
    where
        H: QueueHandler + ?Sized,
    {
        let timeout = if self.queue.has_backlog() {
            Some(Duration::ZERO)
        } else {
            timeout
        };

        // A handler waiting again from inside dispatch only drains the queue
        if let Ok(mut event_loop) = self.event_loop.try_borrow_mut() {
            let mut state = self.state.borrow_mut();
            event_loop
                .dispatch(timeout, &mut state)
                .map_err(|e| Error::Io(io::Error::other(e)))?;
        }

        let fired = {
            let mut state = self.state.borrow_mut();
            if std::mem::take(&mut state.woken) {
                trace!("🔔 queue {:?} woken", self.queue.id());
            }
            std::mem::take(&mut state.fired)
        };
        for window in fired {
            self.queue.post(WindowMessage::Reconcile(window));
        }

        Ok(self.dispatch_pending(handler))
    }

    /// Dispatches queued events, then queued messages, until both are empty.
    pub fn dispatch_pending<H>(&self, handler: &H) -> usize
    where
        H: QueueHandler + ?Sized,
    {
        let mut handled = 0;
        loop {
            if let Some(event) = self.queue.pop_event() {
                handler.handle_event(self, event);
            } else if let Some(message) = self.queue.pop_message() {
                handler.handle_message(self, message);
            } else {
                break;
            }
            handled += 1;
        }
        handled
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        self.connection.unregister_queue(self.queue.id());
    }
}
