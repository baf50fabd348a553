//! Window surfaces and the damage flusher
//!
//! A [`WindowSurface`] turns the host's software-rendered bitmap into
//! committed shm buffers. Damage accumulates as a bounding rectangle between
//! flushes; a flush copies the damaged pixels into a free buffer (with alpha
//! and color-key processing when needed) and commits it with its damage.
//!
//! A failed flush keeps the accumulated damage, so the next flush retries the
//! same area:
//!
//! ```text
//!   add_damage ──► bounds ──► flush ──┬── Presented ──► bounds reset
//!                    ▲                ├── Empty ──────► bounds reset
//!                    └────────────────┴── Failed (bounds kept)
//! ```

pub mod pixels;
pub mod queue;
pub mod shm;

pub use pixels::{copy_rect, premultiply, PixelOps};
pub use queue::{BufferQueue, BufferStats, MAX_DAMAGE_RECTS};
pub use shm::ShmBuffer;

use crate::config::BufferConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::geometry::{Rect, Region};
use crate::protocol::PixelFormat;
use crate::surface::Surface;
use log::{debug, trace, warn};
use std::sync::Arc;

/// Borrowed view of a host bitmap, 32-bit pixels, rows `stride` pixels apart
#[derive(Debug, Clone, Copy)]
pub struct HostBitmap<'a> {
    pub pixels: &'a [u32],
    pub stride: usize,
    pub width: u32,
    pub height: u32,
    /// Pixels carry meaningful alpha
    pub per_pixel_alpha: bool,
}

impl<'a> HostBitmap<'a> {
    pub fn new(pixels: &'a [u32], stride: usize, width: u32, height: u32, per_pixel_alpha: bool) -> Result<Self> {
        let needed = if height == 0 {
            0
        } else {
            stride * (height as usize - 1) + width as usize
        };
        if stride < width as usize || pixels.len() < needed {
            return Err(Error::Allocation(format!(
                "bitmap of {} pixels too small for {}x{} stride {}",
                pixels.len(),
                width,
                height,
                stride
            )));
        }
        Ok(Self {
            pixels,
            stride,
            width,
            height,
            per_pixel_alpha,
        })
    }

    /// Views raw bitmap bytes. `stride_bytes` must be a multiple of four.
    pub fn from_bytes(bytes: &'a [u8], stride_bytes: usize, width: u32, height: u32, per_pixel_alpha: bool) -> Result<Self> {
        if stride_bytes % 4 != 0 {
            return Err(Error::Allocation(format!("stride {} is not pixel aligned", stride_bytes)));
        }
        let pixels: &[u32] = bytemuck::try_cast_slice(bytes)
            .map_err(|e| Error::Allocation(format!("bitmap is not pixel aligned: {:?}", e)))?;
        Self::new(pixels, stride_bytes / 4, width, height, per_pixel_alpha)
    }
}

/// Result of a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// A buffer was committed.
    Presented,
    /// Nothing to present; damage was reset.
    Empty,
    /// Nothing was committed; damage is kept for the next flush.
    Failed,
}

pub struct WindowSurface {
    connection: Arc<Connection>,
    config: BufferConfig,
    rect: Rect,
    /// Damage accumulated since the last successful flush, surface-local
    bounds: Rect,
    clip: Option<Region>,
    color_key: Option<u32>,
    alpha: u8,
    queue: Option<BufferQueue>,
    surface: Option<Arc<Surface>>,
    /// Statistics of queues already replaced
    retired: BufferStats,
}

impl WindowSurface {
    pub fn new(connection: &Arc<Connection>, rect: Rect, config: &BufferConfig) -> Self {
        Self {
            connection: Arc::clone(connection),
            config: config.clone(),
            rect,
            bounds: Rect::from_size(rect.width, rect.height),
            clip: None,
            color_key: None,
            alpha: 255,
            queue: None,
            surface: None,
            retired: BufferStats::default(),
        }
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// Moves or resizes the surface. A size change damages everything.
    pub fn set_rect(&mut self, rect: Rect) {
        if rect.size() != self.rect.size() {
            self.rect = rect;
            self.damage_all();
        } else {
            self.rect = rect;
        }
    }

    /// Presents into `surface` from now on; the whole surface is repainted.
    pub fn set_surface(&mut self, surface: Option<Arc<Surface>>) {
        self.surface = surface;
        self.damage_all();
    }

    pub fn surface(&self) -> Option<&Arc<Surface>> {
        self.surface.as_ref()
    }

    pub fn add_damage(&mut self, rect: Rect) {
        self.bounds = self.bounds.union(&rect);
    }

    pub fn damage_all(&mut self) {
        self.bounds = Rect::from_size(self.rect.width, self.rect.height);
    }

    pub fn damage_bounds(&self) -> Rect {
        self.bounds
    }

    /// Non-rectangular window shape, surface-local. `None` is the full rect.
    pub fn set_clip(&mut self, clip: Option<Region>) {
        if self.clip != clip {
            self.clip = clip;
            self.damage_all();
        }
    }

    pub fn set_color_key(&mut self, key: Option<u32>) {
        let key = key.map(|k| k & 0x00ff_ffff);
        if self.color_key != key {
            self.color_key = key;
            self.damage_all();
        }
    }

    pub fn set_alpha(&mut self, alpha: u8) {
        if self.alpha != alpha {
            self.alpha = alpha;
            self.damage_all();
        }
    }

    pub fn format(&self) -> Option<PixelFormat> {
        self.queue.as_ref().map(BufferQueue::format)
    }

    /// Lifetime statistics across every queue this surface used
    pub fn stats(&self) -> BufferStats {
        let current = self.queue.as_ref().map(BufferQueue::stats).unwrap_or_default();
        BufferStats {
            allocations: self.retired.allocations + current.allocations,
            reuses: self.retired.reuses + current.reuses,
            acquire_failures: self.retired.acquire_failures + current.acquire_failures,
            fast_copies: self.retired.fast_copies + current.fast_copies,
            presents: self.retired.presents + current.presents,
        }
    }

    /// A clip covering the whole surface is no shape at all.
    fn is_shaped(&self) -> bool {
        let full = Rect::from_size(self.rect.width, self.rect.height);
        self.clip
            .as_ref()
            .is_some_and(|clip| clip.intersect_rect(&full).area() != full.area())
    }

    fn wants_alpha(&self) -> bool {
        self.is_shaped() || self.alpha < 255 || self.color_key.is_some() || self.config.prefer_alpha
    }

    fn choose_format(&self) -> PixelFormat {
        if !self.wants_alpha() {
            return PixelFormat::Xrgb8888;
        }
        if self.connection.supports_format(PixelFormat::Argb8888) {
            PixelFormat::Argb8888
        } else {
            debug!("🎨 Server lacks ARGB8888, presenting transparency as opaque");
            PixelFormat::Xrgb8888
        }
    }

    /// Copies the accumulated damage from `bitmap` into a buffer and commits
    /// it.
    pub fn flush(&mut self, bitmap: &HostBitmap<'_>) -> FlushOutcome {
        let full = Rect::from_size(self.rect.width, self.rect.height);
        let Some(damage_rect) = self.bounds.intersection(&full) else {
            self.bounds = Rect::default();
            return FlushOutcome::Empty;
        };

        let Some(surface) = self.surface.clone() else {
            trace!("🖌️ Flush without a surface, keeping damage");
            return FlushOutcome::Failed;
        };
        if !surface.drawing_allowed() {
            trace!("🖌️ Surface {:?} not drawable yet, keeping damage", surface.id());
            return FlushOutcome::Failed;
        }

        let mut damage = Region::from_rect(damage_rect);
        if let Some(clip) = &self.clip {
            damage = damage.intersect(clip);
            if damage.is_empty() {
                if clip.is_empty() {
                    self.bounds = Rect::default();
                    return FlushOutcome::Empty;
                }
                // Fully clipped damage still has to reach the server as
                // transparency
                damage = Region::from_rect(damage_rect);
            }
        }

        match self.present(&surface, bitmap, &damage) {
            Ok(()) => {
                self.bounds = Rect::default();
                FlushOutcome::Presented
            }
            Err(err) => {
                warn!("🖌️ Flush of surface {:?} failed: {}", surface.id(), err);
                FlushOutcome::Failed
            }
        }
    }

    fn present(&mut self, surface: &Surface, bitmap: &HostBitmap<'_>, damage: &Region) -> Result<()> {
        let (width, height) = self.rect.size();
        let format = self.choose_format();

        if !self
            .queue
            .as_ref()
            .is_some_and(|q| q.matches(width, height, format))
        {
            if let Some(old) = self.queue.take() {
                let stats = old.stats();
                self.retired.allocations += stats.allocations;
                self.retired.reuses += stats.reuses;
                self.retired.acquire_failures += stats.acquire_failures;
                self.retired.fast_copies += stats.fast_copies;
                self.retired.presents += stats.presents;
            }
            self.queue = Some(BufferQueue::new(
                &self.connection,
                width,
                height,
                format,
                self.config.max_buffers,
            ));
        }
        let Some(queue) = self.queue.as_mut() else {
            return Err(Error::Allocation("buffer queue unavailable".into()));
        };

        queue.add_damage(damage);
        let index = queue.acquire()?;

        let ops = PixelOps {
            premultiply: format.has_alpha(),
            window_alpha: self.alpha,
            color_key: self.color_key,
            clip: self.clip.as_ref(),
        };

        let mut fast_copies = 0;
        let buffer = queue
            .buffer_mut(index)
            .ok_or_else(|| Error::Allocation(format!("buffer {} vanished", index)))?;
        let to_paint = std::mem::take(buffer.damage_mut());
        let pixels = buffer.pixels_mut()?;
        for rect in to_paint.rects() {
            if copy_rect(bitmap, pixels, width, rect, &ops) {
                fast_copies += 1;
            }
        }

        buffer.mark_busy();
        if let Err(err) = surface.present(buffer.id(), damage) {
            buffer.mark_free();
            // The buffer may hold a partial frame; repaint it next time
            buffer.damage_mut().union(&to_paint);
            return Err(err);
        }

        let stats = queue.stats_mut();
        stats.fast_copies += fast_copies;
        stats.presents += 1;
        Ok(())
    }
}

impl std::fmt::Debug for WindowSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowSurface")
            .field("rect", &self.rect)
            .field("bounds", &self.bounds)
            .field("alpha", &self.alpha)
            .field("color_key", &self.color_key)
            .field("queue", &self.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::connection::{QueueId, Route};
    use crate::protocol::loopback::LoopbackBackend;
    use crate::protocol::Request;
    use crate::window::{WindowHandle, WindowRef};

    struct Fixture {
        backend: Arc<LoopbackBackend>,
        connection: Arc<Connection>,
        surface: Arc<Surface>,
    }

    fn fixture(backend: LoopbackBackend) -> Fixture {
        let backend = Arc::new(backend);
        let connection = Connection::connect(backend.clone(), &ConnectionConfig::default()).unwrap();
        let route = Route {
            queue: QueueId(1),
            window: WindowRef {
                handle: WindowHandle(1),
                generation: 1,
            },
        };
        let surface = Surface::create(&connection, route, 1).unwrap();
        surface.make_toplevel().unwrap();
        surface.set_drawing_allowed(true);
        Fixture {
            backend,
            connection,
            surface,
        }
    }

    fn window_surface(f: &Fixture, width: u32, height: u32) -> WindowSurface {
        let mut ws = WindowSurface::new(&f.connection, Rect::from_size(width, height), &BufferConfig::default());
        ws.set_surface(Some(Arc::clone(&f.surface)));
        ws
    }

    fn commits(backend: &LoopbackBackend) -> usize {
        backend
            .requests()
            .iter()
            .filter(|r| matches!(r, Request::Commit { .. }))
            .count()
    }

    #[test]
    fn test_flush_presents_then_is_idempotent() {
        let f = fixture(LoopbackBackend::new());
        let mut ws = window_surface(&f, 8, 8);
        let pixels = vec![0xff20_4060u32; 64];
        let bitmap = HostBitmap::new(&pixels, 8, 8, 8, false).unwrap();

        assert_eq!(ws.flush(&bitmap), FlushOutcome::Presented);
        assert!(ws.damage_bounds().is_empty());
        assert_eq!(ws.flush(&bitmap), FlushOutcome::Empty);
        assert_eq!(commits(&f.backend), 1);
        assert_eq!(ws.format(), Some(PixelFormat::Xrgb8888));
        assert_eq!(ws.stats().fast_copies, 1);
    }

    #[test]
    fn test_flush_without_drawing_permission_keeps_damage() {
        let f = fixture(LoopbackBackend::new());
        f.surface.set_drawing_allowed(false);
        let mut ws = window_surface(&f, 4, 4);
        let pixels = vec![0u32; 16];
        let bitmap = HostBitmap::new(&pixels, 4, 4, 4, false).unwrap();

        let before = ws.damage_bounds();
        assert_eq!(ws.flush(&bitmap), FlushOutcome::Failed);
        assert_eq!(ws.damage_bounds(), before);
    }

    #[test]
    fn test_buffer_exhaustion_keeps_damage() {
        let f = fixture(LoopbackBackend::new());
        let mut ws = window_surface(&f, 4, 4);
        let pixels = vec![0u32; 16];
        let bitmap = HostBitmap::new(&pixels, 4, 4, 4, false).unwrap();

        // Default depth is three and the loopback never releases
        for _ in 0..3 {
            ws.add_damage(Rect::new(0, 0, 1, 1));
            assert_eq!(ws.flush(&bitmap), FlushOutcome::Presented);
        }
        ws.add_damage(Rect::new(1, 1, 2, 2));
        let before = ws.damage_bounds();
        assert_eq!(ws.flush(&bitmap), FlushOutcome::Failed);
        assert_eq!(ws.damage_bounds(), before);
        assert_eq!(ws.stats().acquire_failures, 1);
    }

    #[test]
    fn test_commit_failure_keeps_damage_and_frees_buffer() {
        let f = fixture(LoopbackBackend::new());
        let mut ws = window_surface(&f, 4, 4);
        let pixels = vec![0u32; 16];
        let bitmap = HostBitmap::new(&pixels, 4, 4, 4, false).unwrap();

        f.backend.fail_when(|r| matches!(r, Request::Commit { .. }));
        assert_eq!(ws.flush(&bitmap), FlushOutcome::Failed);
        assert_eq!(ws.damage_bounds(), Rect::from_size(4, 4));

        f.backend.clear_failures();
        assert_eq!(ws.flush(&bitmap), FlushOutcome::Presented);
        // The failed attempt's buffer was reused rather than a second allocated
        assert_eq!(ws.stats().allocations, 1);
    }

    #[test]
    fn test_clip_selects_alpha_and_forces_present_when_fully_clipped() {
        let f = fixture(LoopbackBackend::new());
        let mut ws = window_surface(&f, 8, 8);
        let pixels = vec![0xffff_ffffu32; 64];
        let bitmap = HostBitmap::new(&pixels, 8, 8, 8, false).unwrap();

        ws.set_clip(Some(Region::from_rect(Rect::new(0, 0, 2, 2))));
        assert_eq!(ws.flush(&bitmap), FlushOutcome::Presented);
        assert_eq!(ws.format(), Some(PixelFormat::Argb8888));

        // Damage entirely outside the shape still commits
        ws.add_damage(Rect::new(5, 5, 2, 2));
        assert_eq!(ws.flush(&bitmap), FlushOutcome::Presented);
        assert!(f
            .backend
            .requests()
            .contains(&Request::Damage { surface: f.surface.id(), rect: Rect::new(5, 5, 2, 2) }));
    }

    #[test]
    fn test_full_size_clip_stays_opaque() {
        let f = fixture(LoopbackBackend::new());
        let mut ws = window_surface(&f, 8, 8);
        let pixels = vec![0xff10_2030u32; 64];
        let bitmap = HostBitmap::new(&pixels, 8, 8, 8, false).unwrap();

        ws.set_clip(Some(Region::from_rect(Rect::from_size(8, 8))));
        assert_eq!(ws.flush(&bitmap), FlushOutcome::Presented);
        assert_eq!(ws.format(), Some(PixelFormat::Xrgb8888));

        // Two halves tile the surface just the same
        ws.set_clip(Some(Region::from_rects([Rect::new(0, 0, 8, 4), Rect::new(0, 4, 8, 4)])));
        assert_eq!(ws.flush(&bitmap), FlushOutcome::Presented);
        assert_eq!(ws.format(), Some(PixelFormat::Xrgb8888));
        assert!(!f.backend.requests().iter().any(|r| matches!(
            r,
            Request::CreateShmBuffer { format: PixelFormat::Argb8888, .. }
        )));

        ws.set_clip(Some(Region::from_rect(Rect::new(0, 0, 8, 7))));
        assert_eq!(ws.flush(&bitmap), FlushOutcome::Presented);
        assert_eq!(ws.format(), Some(PixelFormat::Argb8888));
    }

    #[test]
    fn test_empty_clip_is_a_no_op() {
        let f = fixture(LoopbackBackend::new());
        let mut ws = window_surface(&f, 8, 8);
        let pixels = vec![0u32; 64];
        let bitmap = HostBitmap::new(&pixels, 8, 8, 8, false).unwrap();

        ws.set_clip(Some(Region::new()));
        assert_eq!(ws.flush(&bitmap), FlushOutcome::Empty);
        assert!(ws.damage_bounds().is_empty());
        assert_eq!(commits(&f.backend), 0);
    }

    #[test]
    fn test_format_change_recreates_queue() {
        let f = fixture(LoopbackBackend::new());
        let mut ws = window_surface(&f, 4, 4);
        let pixels = vec![0u32; 16];
        let bitmap = HostBitmap::new(&pixels, 4, 4, 4, false).unwrap();

        assert_eq!(ws.flush(&bitmap), FlushOutcome::Presented);
        assert_eq!(ws.format(), Some(PixelFormat::Xrgb8888));
        ws.set_alpha(128);
        assert_eq!(ws.flush(&bitmap), FlushOutcome::Presented);
        assert_eq!(ws.format(), Some(PixelFormat::Argb8888));
        assert_eq!(ws.stats().allocations, 2);
        assert_eq!(ws.stats().presents, 2);
    }

    #[test]
    fn test_missing_alpha_format_falls_back_to_opaque() {
        let f = fixture(LoopbackBackend::new().without_format(PixelFormat::Argb8888));
        let mut ws = window_surface(&f, 4, 4);
        let pixels = vec![0u32; 16];
        let bitmap = HostBitmap::new(&pixels, 4, 4, 4, false).unwrap();

        ws.set_color_key(Some(0x123456));
        assert_eq!(ws.flush(&bitmap), FlushOutcome::Presented);
        assert_eq!(ws.format(), Some(PixelFormat::Xrgb8888));
    }

    #[test]
    fn test_bitmap_validation() {
        let pixels = vec![0u32; 10];
        assert!(HostBitmap::new(&pixels, 4, 4, 3, false).is_err());
        assert!(HostBitmap::new(&pixels, 2, 4, 2, false).is_err());
        assert!(HostBitmap::new(&pixels, 4, 2, 3, false).is_ok());

        let bytes = vec![0u8; 64];
        let bitmap = HostBitmap::from_bytes(&bytes, 16, 4, 4, true).unwrap();
        assert_eq!(bitmap.stride, 4);
        assert!(HostBitmap::from_bytes(&bytes, 15, 3, 4, true).is_err());
    }
}
