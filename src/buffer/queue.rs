//! Buffer queue
//!
//! A small pool of equally sized buffers. Buffers are allocated lazily up to
//! the configured depth and recycled once the server releases them; when all
//! of them are in flight, acquiring fails instead of waiting.

use super::shm::ShmBuffer;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::geometry::Region;
use crate::protocol::PixelFormat;
use log::debug;
use std::sync::Arc;

/// Damage rectangles kept per buffer before merging into the bounding box
pub const MAX_DAMAGE_RECTS: usize = 16;

/// Buffer queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub allocations: u64,
    pub reuses: u64,
    pub acquire_failures: u64,
    pub fast_copies: u64,
    pub presents: u64,
}

pub struct BufferQueue {
    connection: Arc<Connection>,
    width: u32,
    height: u32,
    format: PixelFormat,
    max_buffers: usize,
    buffers: Vec<ShmBuffer>,
    stats: BufferStats,
}

impl BufferQueue {
    pub fn new(
        connection: &Arc<Connection>,
        width: u32,
        height: u32,
        format: PixelFormat,
        max_buffers: usize,
    ) -> Self {
        debug!(
            "🧱 New buffer queue {}x{} {:?} (up to {} buffers)",
            width, height, format, max_buffers
        );
        Self {
            connection: Arc::clone(connection),
            width,
            height,
            format,
            max_buffers: max_buffers.max(1),
            buffers: Vec::with_capacity(max_buffers),
            stats: BufferStats::default(),
        }
    }

    pub fn matches(&self, width: u32, height: u32, format: PixelFormat) -> bool {
        self.width == width && self.height == height && self.format == format
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_busy()).count()
    }

    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut BufferStats {
        &mut self.stats
    }

    /// Adds `damage` to every buffer, so each repaints it before its next use.
    pub fn add_damage(&mut self, damage: &Region) {
        for buffer in &mut self.buffers {
            let region = buffer.damage_mut();
            region.union(damage);
            region.coalesce_if_over(MAX_DAMAGE_RECTS);
        }
    }

    /// Index of a free buffer, allocating one if the pool is not full yet.
    /// A new buffer starts fully damaged.
    pub fn acquire(&mut self) -> Result<usize> {
        if let Some(index) = self.buffers.iter().position(|b| !b.is_busy()) {
            self.stats.reuses += 1;
            return Ok(index);
        }

        if self.buffers.len() < self.max_buffers {
            let buffer = ShmBuffer::new(&self.connection, self.width, self.height, self.format)?;
            self.buffers.push(buffer);
            self.stats.allocations += 1;
            return Ok(self.buffers.len() - 1);
        }

        self.stats.acquire_failures += 1;
        Err(Error::BufferUnavailable {
            in_flight: self.buffers.len(),
        })
    }

    pub fn buffer_mut(&mut self, index: usize) -> Option<&mut ShmBuffer> {
        self.buffers.get_mut(index)
    }
}

impl std::fmt::Debug for BufferQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferQueue")
            .field("size", &(self.width, self.height))
            .field("format", &self.format)
            .field("buffers", &self.buffers)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::geometry::Rect;
    use crate::protocol::loopback::LoopbackBackend;
    use crate::protocol::ProtocolEvent;

    fn setup() -> (Arc<LoopbackBackend>, Arc<Connection>) {
        let backend = Arc::new(LoopbackBackend::new());
        let connection = Connection::connect(backend.clone(), &ConnectionConfig::default()).unwrap();
        (backend, connection)
    }

    #[test]
    fn test_acquire_allocates_up_to_max_then_fails() {
        let (_backend, connection) = setup();
        let mut queue = BufferQueue::new(&connection, 8, 8, PixelFormat::Argb8888, 2);

        for expected in 0..2 {
            let index = queue.acquire().unwrap();
            assert_eq!(index, expected);
            queue.buffer_mut(index).unwrap().mark_busy();
        }
        assert!(matches!(
            queue.acquire(),
            Err(Error::BufferUnavailable { in_flight: 2 })
        ));

        let stats = queue.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.acquire_failures, 1);
    }

    #[test]
    fn test_released_buffer_is_reused() {
        let (backend, connection) = setup();
        let mut queue = BufferQueue::new(&connection, 8, 8, PixelFormat::Argb8888, 2);
        let first = queue.acquire().unwrap();
        let buffer = queue.buffer_mut(first).unwrap();
        let id = buffer.id();
        buffer.mark_busy();

        backend.inject(ProtocolEvent::BufferRelease { buffer: id });
        connection.pump_once().unwrap();

        assert_eq!(queue.acquire().unwrap(), first);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.stats().reuses, 1);
    }

    #[test]
    fn test_damage_reaches_every_buffer_and_coalesces() {
        let (_backend, connection) = setup();
        let mut queue = BufferQueue::new(&connection, 64, 64, PixelFormat::Xrgb8888, 3);
        for _ in 0..2 {
            let index = queue.acquire().unwrap();
            let buffer = queue.buffer_mut(index).unwrap();
            buffer.damage_mut().clear();
            buffer.mark_busy();
        }

        for i in 0..(MAX_DAMAGE_RECTS as i32 + 4) {
            queue.add_damage(&Region::from_rect(Rect::new(i * 3, i * 3, 1, 1)));
        }
        for index in 0..2 {
            let damage = queue.buffer_mut(index).unwrap().damage_mut();
            assert!(damage.rects().len() <= MAX_DAMAGE_RECTS);
            assert!(damage.contains_point(0, 0));
            assert!(damage.contains_point(57, 57));
        }
    }

    #[test]
    fn test_matches() {
        let (_backend, connection) = setup();
        let queue = BufferQueue::new(&connection, 10, 20, PixelFormat::Argb8888, 3);
        assert!(queue.matches(10, 20, PixelFormat::Argb8888));
        assert!(!queue.matches(10, 20, PixelFormat::Xrgb8888));
        assert!(!queue.matches(20, 10, PixelFormat::Argb8888));
        assert!(queue.is_empty());
    }
}
