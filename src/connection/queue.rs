//! Per-thread event queues
//!
//! The background reader pushes routed protocol events into the owning
//! thread's queue and pings its eventfd. Window messages (cross-thread
//! notifications) travel through the same queue's mailbox so both kinds of
//! work are drained by the owning thread's wait primitive.

use crate::dispatch::WindowMessage;
use crate::protocol::ProtocolEvent;
use calloop::ping::Ping;
use log::trace;
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(pub u64);

pub struct EventQueue {
    id: QueueId,
    events: Mutex<VecDeque<ProtocolEvent>>,
    mailbox: Mutex<VecDeque<WindowMessage>>,
    ping: Ping,
}

impl EventQueue {
    pub fn new(id: QueueId, ping: Ping) -> Self {
        Self {
            id,
            events: Mutex::new(VecDeque::new()),
            mailbox: Mutex::new(VecDeque::new()),
            ping,
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn push_event(&self, event: ProtocolEvent) {
        trace!("📥 queue {:?} <- {:?}", self.id, event);
        self.events.lock().push_back(event);
    }

    /// Posts a message and wakes the owning thread.
    pub fn post(&self, message: WindowMessage) {
        trace!("📨 queue {:?} <- {:?}", self.id, message);
        self.mailbox.lock().push_back(message);
        self.notify();
    }

    /// Best-effort wakeup; an eventfd write never blocks.
    pub fn notify(&self) {
        self.ping.ping();
    }

    pub fn take_events(&self) -> VecDeque<ProtocolEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn pop_message(&self) -> Option<WindowMessage> {
        self.mailbox.lock().pop_front()
    }

    pub fn pop_event(&self) -> Option<ProtocolEvent> {
        self.events.lock().pop_front()
    }

    /// Whether any event or message is still waiting.
    pub fn has_backlog(&self) -> bool {
        !self.events.lock().is_empty() || !self.mailbox.lock().is_empty()
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("id", &self.id)
            .field("events", &self.events.lock().len())
            .field("messages", &self.mailbox.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_and_messages_are_fifo() {
        let (ping, _source) = calloop::ping::make_ping().unwrap();
        let queue = EventQueue::new(QueueId(1), ping);
        assert!(!queue.has_backlog());

        queue.push_event(ProtocolEvent::PointerMotion);
        queue.push_event(ProtocolEvent::KeyboardKey { serial: 2 });
        queue.post(WindowMessage::DisplayChanged);
        assert!(queue.has_backlog());

        assert_eq!(queue.pop_event(), Some(ProtocolEvent::PointerMotion));
        assert_eq!(queue.take_events().len(), 1);
        assert!(matches!(queue.pop_message(), Some(WindowMessage::DisplayChanged)));
        assert!(!queue.has_backlog());
    }
}
