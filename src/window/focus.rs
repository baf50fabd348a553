//! Process-wide input focus
//!
//! The reader folds seat events into this state as they arrive. The popup
//! heuristic uses it to guess which window an undecorated popup belongs to.

use super::WindowHandle;
use crate::protocol::ProtocolEvent;
use log::trace;

/// Device class of the most recent input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pointer,
    Keyboard,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputFocus {
    pub pointer: Option<WindowHandle>,
    pub keyboard: Option<WindowHandle>,
    /// Window holding an explicit pointer grab, set by the host
    pub grab: Option<WindowHandle>,
    pub last_input: Option<InputKind>,
    pub last_serial: u32,
}

impl InputFocus {
    /// Applies a seat event. `window` is the window owning the event's
    /// target surface, if the target is known.
    pub fn apply(&mut self, event: &ProtocolEvent, window: Option<WindowHandle>) {
        match event {
            ProtocolEvent::PointerEnter { serial, .. } => {
                self.pointer = window;
                self.note(InputKind::Pointer, Some(*serial));
            }
            ProtocolEvent::PointerLeave { .. } => {
                if self.pointer == window {
                    self.pointer = None;
                }
            }
            ProtocolEvent::PointerMotion => self.note(InputKind::Pointer, None),
            ProtocolEvent::PointerButton { serial } => self.note(InputKind::Pointer, Some(*serial)),
            ProtocolEvent::KeyboardEnter { serial, .. } => {
                self.keyboard = window;
                self.note(InputKind::Keyboard, Some(*serial));
            }
            ProtocolEvent::KeyboardLeave { .. } => {
                if self.keyboard == window {
                    self.keyboard = None;
                }
            }
            ProtocolEvent::KeyboardKey { serial } => self.note(InputKind::Keyboard, Some(*serial)),
            _ => return,
        }
        trace!("🎯 focus now {:?}", self);
    }

    fn note(&mut self, kind: InputKind, serial: Option<u32>) {
        self.last_input = Some(kind);
        if let Some(serial) = serial {
            self.last_serial = serial;
        }
    }

    /// Candidate popup owners, most preferred first.
    ///
    /// After pointer input the grab, pointer focus and keyboard focus are
    /// tried in that order. Otherwise, including before any input at all,
    /// the order is reversed. Equally stale sources are never compared by
    /// time; the order of checks alone breaks ties.
    pub fn popup_candidates(&self) -> [Option<WindowHandle>; 3] {
        match self.last_input {
            Some(InputKind::Pointer) => [self.grab, self.pointer, self.keyboard],
            _ => [self.keyboard, self.pointer, self.grab],
        }
    }

    /// Drops every reference to a destroyed window.
    pub fn forget(&mut self, handle: WindowHandle) {
        for slot in [&mut self.pointer, &mut self.keyboard, &mut self.grab] {
            if *slot == Some(handle) {
                *slot = None;
            }
        }
    }
}
