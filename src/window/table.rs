//! Window state table
//!
//! A map from handle to slot guarded by one mutex, with a generation per slot
//! so a reused handle never picks up messages meant for its predecessor.
//!
//! Each slot carries two locks:
//! - `state`: the full window state, only touched by the owning thread.
//! - `published`: a small summary other windows read (parent usability,
//!   parent surface and origin). It is a leaf lock, never held while taking
//!   another.

use super::role::RoleSnapshot;
use super::{WindowHandle, WindowRects, WindowRef, WindowStyle};
use crate::buffer::WindowSurface;
use crate::connection::QueueId;
use crate::geometry::Rect;
use crate::protocol::ConfigFlags;
use crate::surface::Surface;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-window state owned by the window's thread
#[derive(Debug, Default)]
pub struct WindowState {
    pub rects: WindowRects,
    pub style: WindowStyle,
    /// Explicit owner/parent as last reported by the host
    pub parent: Option<WindowHandle>,
    pub effective_parent: Option<WindowHandle>,
    /// Inputs of the last role computation
    pub last: Option<RoleSnapshot>,
    pub surface: Option<Arc<Surface>>,
    pub window_surface: Option<WindowSurface>,
    pub visible: bool,
    /// Host rect to return to once maximize/fullscreen end
    pub restore_rect: Option<Rect>,
    pub title: Option<String>,
    /// A deferred reconcile timer is armed
    pub reconcile_scheduled: bool,
    /// Flags of the server proposal being applied, if any
    pub processing: Option<ConfigFlags>,
    pub owner_queue: Option<QueueId>,
}

/// What other windows may know about this one
#[derive(Debug, Clone, Default)]
pub struct Published {
    pub surface: Option<Arc<Surface>>,
    pub visible: bool,
    pub window_rect: Rect,
    pub parent: Option<WindowHandle>,
    pub effective_parent: Option<WindowHandle>,
    pub owner_queue: Option<QueueId>,
}

impl Published {
    /// Has a live surface and is visible
    pub fn presentable(&self) -> bool {
        self.visible && self.surface.is_some()
    }
}

#[derive(Debug)]
pub struct Slot {
    pub generation: u64,
    pub state: Mutex<WindowState>,
    pub published: Mutex<Published>,
}

impl Slot {
    pub fn window_ref(&self, handle: WindowHandle) -> WindowRef {
        WindowRef {
            handle,
            generation: self.generation,
        }
    }
}

#[derive(Debug)]
pub struct WindowTable {
    slots: Mutex<HashMap<WindowHandle, Arc<Slot>>>,
    next_generation: AtomicU64,
}

impl Default for WindowTable {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowTable {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn get(&self, handle: WindowHandle) -> Option<Arc<Slot>> {
        self.slots.lock().get(&handle).cloned()
    }

    /// The slot `window` refers to, unless the handle was reused since.
    pub fn get_ref(&self, window: WindowRef) -> Option<Arc<Slot>> {
        self.get(window.handle)
            .filter(|slot| slot.generation == window.generation)
    }

    /// Returns the slot and whether it was just created.
    pub fn get_or_insert(&self, handle: WindowHandle) -> (Arc<Slot>, bool) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(&handle) {
            return (Arc::clone(slot), false);
        }
        let slot = Arc::new(Slot {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(WindowState::default()),
            published: Mutex::new(Published::default()),
        });
        slots.insert(handle, Arc::clone(&slot));
        (slot, true)
    }

    pub fn remove(&self, handle: WindowHandle) -> Option<Arc<Slot>> {
        self.slots.lock().remove(&handle)
    }

    /// Published summary of `handle`, if the window is known.
    pub fn published(&self, handle: WindowHandle) -> Option<Published> {
        self.get(handle).map(|slot| slot.published.lock().clone())
    }

    pub fn presentable(&self, handle: WindowHandle) -> bool {
        self.published(handle).is_some_and(|p| p.presentable())
    }

    /// Windows owned by or positioned against `parent`
    pub fn children_of(&self, parent: WindowHandle) -> Vec<(WindowRef, Option<QueueId>)> {
        let slots: Vec<(WindowHandle, Arc<Slot>)> = self
            .slots
            .lock()
            .iter()
            .map(|(handle, slot)| (*handle, Arc::clone(slot)))
            .collect();
        slots
            .into_iter()
            .filter_map(|(handle, slot)| {
                let published = slot.published.lock();
                (published.effective_parent == Some(parent) || published.parent == Some(parent))
                    .then(|| (slot.window_ref(handle), published.owner_queue))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
