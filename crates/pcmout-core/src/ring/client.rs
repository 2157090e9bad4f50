//! Ring-buffer client and render buffers

use std::thread;
use std::time::{Duration, Instant};

use bytemuck::Pod;

use crate::backend::{Backend, RingDevice};
use crate::config::{EngineConfig, RingConfig};
use crate::error::{EngineError, EngineResult};
use crate::format::StreamFormat;
use crate::platform;

/// Poll interval of [`RingClient::wait_for_drain`]
const DRAIN_POLL: Duration = Duration::from_millis(1);

/// Owns one device-managed ring buffer
///
/// All methods take `&mut self`: a client is driven by a single writer
/// thread. Move it to another thread, don't share it.
pub struct RingClient {
    format: StreamFormat,
    device: Box<dyn RingDevice>,
    buffer_frames: u32,
    running: bool,
    closed: bool,
    backend: &'static str,
}

impl RingClient {
    /// Create a ring device on `backend`; the device decides the final capacity
    pub fn new(format: StreamFormat, config: &RingConfig, backend: &dyn Backend) -> EngineResult<Self> {
        platform::init();

        let device = backend.open_ring_device(&format, config)?;
        let buffer_frames = device.buffer_frames();
        if buffer_frames == 0 {
            return Err(EngineError::DeviceCreate(
                "device granted an empty ring buffer".to_string(),
            ));
        }

        log::info!(
            "RingClient opened on {} backend: {}, {} frames ({:.1}ms)",
            backend.name(),
            format,
            buffer_frames,
            format.duration_of(buffer_frames as u64).as_secs_f32() * 1000.0
        );

        Ok(Self {
            format,
            device,
            buffer_frames,
            running: false,
            closed: false,
            backend: backend.name(),
        })
    }

    /// Create a client using the backend and ring settings of `config`
    pub fn open(format: StreamFormat, config: &EngineConfig) -> EngineResult<Self> {
        Self::new(format, &config.ring, &config.backend)
    }

    pub fn start(&mut self) -> EngineResult<()> {
        self.device.start()?;
        self.running = true;
        log::info!("RingClient started ({})", self.backend);
        Ok(())
    }

    pub fn stop(&mut self) -> EngineResult<()> {
        self.device.stop()?;
        self.running = false;
        log::info!("RingClient stopped ({})", self.backend);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    /// Total ring capacity in frames, fixed when the device was created
    pub fn buffer_frames(&self) -> u32 {
        self.buffer_frames
    }

    /// Frames queued on the device and not yet played
    ///
    /// Never more than [`buffer_frames`](Self::buffer_frames), so
    /// `buffer_frames - padding` cannot underflow.
    pub fn padding_frames(&mut self) -> EngineResult<u32> {
        let padding = self.device.padding_frames()?;
        if padding > self.buffer_frames {
            log::warn!(
                "Device reported {} frames of padding in a {} frame ring",
                padding,
                self.buffer_frames
            );
            return Ok(self.buffer_frames);
        }
        Ok(padding)
    }

    /// Writable frames right now; a hint, the device may consume concurrently
    pub fn available_frames(&mut self) -> EngineResult<u32> {
        Ok(self.buffer_frames - self.padding_frames()?)
    }

    /// Playback time of a full ring in milliseconds
    pub fn buffer_latency_ms(&self) -> f32 {
        self.format.duration_of(self.buffer_frames as u64).as_secs_f32() * 1000.0
    }

    /// Reserve exactly `frames` frames of writable space
    ///
    /// Returns `Ok(None)` when the device cannot grant that much right now
    /// (back off and retry). A smaller buffer is never returned in its place.
    pub fn get_buffer(&mut self, frames: u32) -> EngineResult<Option<RenderBuffer<'_>>> {
        if frames == 0 || frames > self.buffer_frames {
            return Ok(None);
        }
        if !self.device.get_buffer(frames)? {
            return Ok(None);
        }

        Ok(Some(RenderBuffer {
            device: &mut self.device,
            requested: frames,
            frame_size: self.format.frame_size(),
            released: false,
        }))
    }

    /// Poll until the device has played everything queued
    ///
    /// Returns `false` if frames are still queued when `timeout` elapses.
    pub fn wait_for_drain(&mut self, timeout: Duration) -> EngineResult<bool> {
        let start = Instant::now();
        loop {
            if self.padding_frames()? == 0 {
                return Ok(true);
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Ok(false);
            }
            thread::sleep(DRAIN_POLL.min(timeout - elapsed));
        }
    }

    /// Stop if running and destroy the device
    pub fn close(mut self) -> EngineResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> EngineResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let stopped = if self.running {
            self.running = false;
            self.device.stop()
        } else {
            Ok(())
        };
        let closed = self.device.close();
        log::info!("RingClient closed ({})", self.backend);
        stopped.and(closed)
    }
}

impl Drop for RingClient {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("RingClient: close failed: {}", e);
        }
    }
}

/// Writable region of the device ring, from `get_buffer` until release
///
/// Holds the client mutably borrowed, so at most one buffer exists at a
/// time. Dropping it without [`release`](Self::release) commits zero frames.
pub struct RenderBuffer<'a> {
    device: &'a mut Box<dyn RingDevice>,
    requested: u32,
    frame_size: usize,
    released: bool,
}

impl RenderBuffer<'_> {
    /// Frames requested from `get_buffer`
    pub fn frames(&self) -> u32 {
        self.requested
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Interleaved sample bytes (`frames × frame_size`)
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.requested as usize * self.frame_size;
        let buffer = self.device.buffer_mut();
        let len = len.min(buffer.len());
        &mut buffer[..len]
    }

    /// The buffer as samples of type `T` (e.g. `f32` or `i16`)
    ///
    /// `None` if the byte length or alignment does not fit `T`.
    pub fn as_samples_mut<T: Pod>(&mut self) -> Option<&mut [T]> {
        bytemuck::try_cast_slice_mut(self.bytes_mut()).ok()
    }

    /// Bytes of a single frame
    pub fn frame_mut(&mut self, index: u32) -> Option<&mut [u8]> {
        let frame_size = self.frame_size;
        self.bytes_mut().chunks_exact_mut(frame_size).nth(index as usize)
    }

    /// Commit the first `written` frames for playback
    ///
    /// # Errors
    /// `InvalidRelease` if `written` exceeds the requested frames; the buffer
    /// is then released with zero frames.
    pub fn release(mut self, written: u32) -> EngineResult<()> {
        if written > self.requested {
            return Err(EngineError::InvalidRelease {
                requested: self.requested,
                written,
            });
        }
        self.released = true;
        self.device.release_buffer(written)
    }
}

impl Drop for RenderBuffer<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        log::debug!("RenderBuffer dropped unreleased, committing 0 frames");
        if let Err(e) = self.device.release_buffer(0) {
            log::warn!("RenderBuffer: release failed: {}", e);
        }
    }
}
