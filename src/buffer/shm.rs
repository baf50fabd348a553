//! Shared-memory buffers
//!
//! Each buffer is backed by an anonymous temporary file mapped into our
//! address space; the file descriptor is handed to the server when the buffer
//! object is created.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::geometry::{Rect, Region};
use crate::protocol::{ObjectId, PixelFormat, Request};
use log::{debug, warn};
use memmap2::MmapMut;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct ShmBuffer {
    id: ObjectId,
    connection: Arc<Connection>,
    width: u32,
    height: u32,
    format: PixelFormat,
    _file: File,
    map: MmapMut,
    /// Set while the server holds the buffer
    busy: Arc<AtomicBool>,
    /// Area not yet repainted since this buffer was last presented
    damage: Region,
}

impl ShmBuffer {
    pub fn new(connection: &Arc<Connection>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::Allocation(format!("empty {}x{} buffer", width, height)));
        }
        let stride = width
            .checked_mul(format.bytes_per_pixel())
            .ok_or_else(|| Error::Allocation(format!("buffer width {} overflows", width)))?;
        let size = stride as u64 * height as u64;

        let file = tempfile::tempfile().map_err(|e| Error::Allocation(format!("shm file: {}", e)))?;
        file.set_len(size)
            .map_err(|e| Error::Allocation(format!("shm file size {}: {}", size, e)))?;
        // SAFETY: the file is private to this buffer and never truncated
        // while the mapping lives.
        let map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| Error::Allocation(format!("shm mmap: {}", e)))?;

        let id = connection.new_object();
        connection
            .send(Request::CreateShmBuffer {
                buffer: id,
                fd: file.as_raw_fd(),
                width,
                height,
                stride,
                format,
            })
            .map_err(|e| {
                if e.is_fatal() {
                    e
                } else {
                    Error::Allocation(format!("shm buffer object: {}", e))
                }
            })?;

        let busy = Arc::new(AtomicBool::new(false));
        connection.track_buffer(id, Arc::clone(&busy));
        debug!("🧱 Allocated {}x{} {:?} buffer {:?}", width, height, format, id);

        Ok(Self {
            id,
            connection: Arc::clone(connection),
            width,
            height,
            format,
            _file: file,
            map,
            busy,
            damage: Region::from_rect(Rect::from_size(width, height)),
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixels_mut(&mut self) -> Result<&mut [u32]> {
        bytemuck::try_cast_slice_mut(&mut self.map[..])
            .map_err(|e| Error::Allocation(format!("shm mapping is not pixel aligned: {:?}", e)))
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn mark_busy(&self) {
        self.busy.store(true, Ordering::Release);
    }

    /// Returns the buffer to the free pool without a server release.
    pub fn mark_free(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn damage_mut(&mut self) -> &mut Region {
        &mut self.damage
    }
}

impl Drop for ShmBuffer {
    fn drop(&mut self) {
        self.connection.untrack_buffer(self.id);
        if let Err(err) = self
            .connection
            .send(Request::DestroyBuffer { buffer: self.id })
        {
            warn!("🧱 Failed to destroy buffer {:?}: {}", self.id, err);
        }
    }
}

impl std::fmt::Debug for ShmBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmBuffer")
            .field("id", &self.id)
            .field("size", &(self.width, self.height))
            .field("format", &self.format)
            .field("busy", &self.is_busy())
            .finish()
    }
}
