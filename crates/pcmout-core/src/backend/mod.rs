//! Output device backends
//!
//! The engine drives two device models through the traits here:
//!
//! - [`BlockDevice`]: accepts whole blocks and hands each one back through a
//!   [`CompletionHandler`] once it has been played.
//! - [`RingDevice`]: exposes a fixed-capacity ring the caller writes into
//!   through a get-buffer / release-buffer pair, and reports how much of the
//!   ring is still queued (the padding).
//!
//! Implementations:
//!
//! - [`NullBackend`]: timer-driven device that discards audio. Always built.
//! - `CpalBackend`: the system's default output through CPAL
//!   (`cpal-backend` feature).

#[cfg(feature = "cpal-backend")]
mod cpal_backend;
#[cfg(test)]
pub(crate) mod manual;
mod null;
mod staged;

use std::sync::Arc;

use crate::block::Block;
use crate::config::{BackendKind, RingConfig};
use crate::error::EngineResult;
use crate::format::StreamFormat;

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::CpalBackend;
pub use null::NullBackend;
pub(crate) use staged::StagedRing;

/// Called by a block device, on a device-owned thread, for every finished block
///
/// The handler receives the block back by value. Devices never invoke it from
/// inside [`BlockDevice::submit`].
///
/// Every accepted block must come back exactly once. A device that loses a
/// block is faulty: the player's in-flight count never reaches zero and
/// `BlockPlayer::stop` keeps waiting for it.
pub type CompletionHandler = Arc<dyn Fn(Block) + Send + Sync>;

/// A block the device refused to take, handed back to the caller
#[derive(Debug)]
pub struct Rejected {
    pub block: Block,
    pub reason: String,
}

/// Device that plays a rotation of fixed-size blocks
pub trait BlockDevice: Send {
    /// Queue a filled block for playback
    ///
    /// On success the device owns the block until it passes it to the
    /// completion handler. On failure the block is returned untouched.
    fn submit(&mut self, block: Block) -> Result<(), Rejected>;

    /// Release the device; called once, after every block has completed
    fn close(&mut self) -> EngineResult<()>;
}

/// Device exposing a shared ring buffer
///
/// Capacity and padding are in frames. At most one buffer may be outstanding
/// between [`get_buffer`](RingDevice::get_buffer) and
/// [`release_buffer`](RingDevice::release_buffer).
pub trait RingDevice: Send {
    fn start(&mut self) -> EngineResult<()>;

    fn stop(&mut self) -> EngineResult<()>;

    /// Total ring capacity as granted by the device
    fn buffer_frames(&self) -> u32;

    /// Frames written but not yet played
    fn padding_frames(&mut self) -> EngineResult<u32>;

    /// Reserve `frames` frames of writable space
    ///
    /// Returns `Ok(false)` when the space is not available right now; that is
    /// not an error.
    fn get_buffer(&mut self, frames: u32) -> EngineResult<bool>;

    /// Bytes of the currently reserved buffer (empty when none is reserved)
    fn buffer_mut(&mut self) -> &mut [u8];

    /// Commit the first `written` frames of the reserved buffer
    fn release_buffer(&mut self, written: u32) -> EngineResult<()>;

    fn close(&mut self) -> EngineResult<()>;
}

/// Factory for block and ring devices
pub trait Backend {
    fn name(&self) -> &'static str;

    fn open_block_device(
        &self,
        format: &StreamFormat,
        block_count: usize,
        on_complete: CompletionHandler,
    ) -> EngineResult<Box<dyn BlockDevice>>;

    fn open_ring_device(
        &self,
        format: &StreamFormat,
        config: &RingConfig,
    ) -> EngineResult<Box<dyn RingDevice>>;
}

impl Backend for BackendKind {
    fn name(&self) -> &'static str {
        match self {
            BackendKind::Null => NullBackend.name(),
            BackendKind::Cpal => "cpal",
        }
    }

    fn open_block_device(
        &self,
        format: &StreamFormat,
        block_count: usize,
        on_complete: CompletionHandler,
    ) -> EngineResult<Box<dyn BlockDevice>> {
        match self {
            BackendKind::Null => NullBackend.open_block_device(format, block_count, on_complete),
            #[cfg(feature = "cpal-backend")]
            BackendKind::Cpal => CpalBackend.open_block_device(format, block_count, on_complete),
            #[cfg(not(feature = "cpal-backend"))]
            BackendKind::Cpal => Err(cpal_disabled()),
        }
    }

    fn open_ring_device(
        &self,
        format: &StreamFormat,
        config: &RingConfig,
    ) -> EngineResult<Box<dyn RingDevice>> {
        match self {
            BackendKind::Null => NullBackend.open_ring_device(format, config),
            #[cfg(feature = "cpal-backend")]
            BackendKind::Cpal => CpalBackend.open_ring_device(format, config),
            #[cfg(not(feature = "cpal-backend"))]
            BackendKind::Cpal => Err(cpal_disabled()),
        }
    }
}

#[cfg(not(feature = "cpal-backend"))]
fn cpal_disabled() -> crate::error::EngineError {
    crate::error::EngineError::UnsupportedPlatform("built without the cpal-backend feature".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_backend_names() {
        assert_eq!(BackendKind::Null.name(), "null");
        assert_eq!(BackendKind::Cpal.name(), "cpal");
    }

    #[cfg(not(feature = "cpal-backend"))]
    #[test]
    fn test_cpal_unavailable_without_feature() {
        let format = StreamFormat::float32_stereo(48000);
        let result = BackendKind::Cpal.open_ring_device(&format, &RingConfig::default());
        assert!(matches!(result, Err(EngineError::UnsupportedPlatform(_))));
    }
}
