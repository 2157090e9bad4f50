//! pcmout-core: low-latency PCM output engine
//!
//! Two device models for pushing raw interleaved samples to an output device:
//!
//! - [`BlockPlayer`]: rotates 2 or 3 fixed-size blocks through a block device.
//!   Completion notifications from the device drive refills, so playback is
//!   self-sustaining once primed.
//! - [`RingClient`]: wraps a device-managed ring buffer that the caller fills
//!   through `get_buffer` / `release`, paced by [`RingPump`] under a latency
//!   ceiling, or by [`RingPlayer`] from a typed sample callback on its own
//!   thread.
//!
//! Devices come from a [`Backend`]: the always-available null backend, or the
//! system output through CPAL with the `cpal-backend` feature.
//!
//! ```ignore
//! use pcmout_core::{BlockPlayer, EngineConfig, StreamFormat};
//!
//! let format = StreamFormat::float32_stereo(44100);
//! let player = BlockPlayer::open(format, |buf: &mut [u8]| {
//!     buf.fill(0);
//!     buf.len() as isize
//! }, &EngineConfig::default())?;
//! player.play()?;
//! // ...
//! player.stop();
//! player.close()?;
//! ```

pub mod backend;
pub mod block;
pub mod buffer;
pub mod config;
pub mod error;
pub mod format;
pub mod platform;
pub mod producer;
pub mod ring;

pub use backend::{Backend, BlockDevice, CompletionHandler, NullBackend, Rejected, RingDevice};
pub use block::{Block, BlockPlayer};
pub use config::{BackendKind, BlockConfig, EngineConfig, RingConfig};
pub use error::{EngineError, EngineResult};
pub use format::{SampleEncoding, StreamFormat, WaveFormat};
pub use producer::DataProducer;
pub use ring::{
    FrameSource, ProducerSource, PumpConfig, PumpStats, PumpStep, ReaderSource, RenderBuffer,
    RingClient, RingPlayer, RingPump, SkipReason,
};

#[cfg(feature = "cpal-backend")]
pub use backend::CpalBackend;
