//! Engine configuration
//!
//! Settings for backend selection, the block-rotation player and the
//! ring-buffer client, plus generic YAML loading/saving.
//!
//! # Usage
//!
//! ```ignore
//! use pcmout_core::config::{default_config_path, load_engine_config};
//!
//! let config = load_engine_config(&default_config_path());
//! let player = BlockPlayer::open(format, producer, &config)?;
//! ```

mod io;
mod paths;

use serde::{Deserialize, Serialize};

use crate::format::StreamFormat;

pub use io::{load_config, load_engine_config, save_config};
pub use paths::{default_config_dir, default_config_path};

/// Block count used when none is configured (triple buffering)
pub const DEFAULT_BLOCK_COUNT: usize = 3;

/// Blocks filled and submitted by `play()` before the rotation runs on its own
pub const PRIMED_BLOCKS: usize = 2;

/// Default block length when no explicit frame count is given: 1/20 s = 50 ms
pub const DEFAULT_BLOCKS_PER_SECOND: u32 = 20;

/// Which device implementation to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Timer-driven device that discards audio (always available)
    #[serde(rename = "null_sink")]
    Null,
    /// Default system output through CPAL (`cpal-backend` feature)
    Cpal,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(feature = "cpal-backend") {
            BackendKind::Cpal
        } else {
            BackendKind::Null
        }
    }
}

/// Block-rotation player settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    /// Number of blocks in the rotation (2 or 3)
    pub block_count: usize,
    /// Frames per block (None = 50 ms of audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_frames: Option<u32>,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            block_count: DEFAULT_BLOCK_COUNT,
            block_frames: None,
        }
    }
}

impl BlockConfig {
    pub fn with_block_count(mut self, count: usize) -> Self {
        self.block_count = count;
        self
    }

    pub fn with_block_frames(mut self, frames: u32) -> Self {
        self.block_frames = Some(frames);
        self
    }

    /// Block size in bytes for the given format
    pub fn block_size(&self, format: &StreamFormat) -> usize {
        match self.block_frames {
            Some(frames) => frames as usize * format.frame_size(),
            None => {
                format.frame_size() * format.frames_per_second() as usize
                    / DEFAULT_BLOCKS_PER_SECOND as usize
            }
        }
    }
}

/// Ring-buffer client and write-loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Requested device buffer duration; the device may round it
    pub buffer_ms: u32,
    /// Latency ceiling: the write loop skips while more than this is queued
    pub max_padding_ms: u32,
    /// Largest number of frames written per loop iteration
    pub max_write_frames: u32,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            buffer_ms: 20,
            max_padding_ms: 10,
            // Write as little at once as possible: keeps queued latency at the ceiling
            max_write_frames: 2,
        }
    }
}

impl RingConfig {
    pub fn with_buffer_ms(mut self, ms: u32) -> Self {
        self.buffer_ms = ms;
        self
    }

    pub fn with_max_padding_ms(mut self, ms: u32) -> Self {
        self.max_padding_ms = ms;
        self
    }

    pub fn with_max_write_frames(mut self, frames: u32) -> Self {
        self.max_write_frames = frames;
        self
    }

    /// Requested device capacity in frames (at least one)
    pub fn buffer_frames(&self, format: &StreamFormat) -> u32 {
        format.frames_for_ms(self.buffer_ms).max(1)
    }

    /// Latency ceiling in frames
    pub fn max_padding_frames(&self, format: &StreamFormat) -> u32 {
        format.frames_for_ms(self.max_padding_ms)
    }
}

/// Top-level engine configuration (stored as YAML)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: BackendKind,
    pub block: BlockConfig,
    pub ring: RingConfig,
}

impl EngineConfig {
    /// Config that never touches real hardware
    pub fn null() -> Self {
        Self {
            backend: BackendKind::Null,
            ..Default::default()
        }
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_block(mut self, block: BlockConfig) -> Self {
        self.block = block;
        self
    }

    pub fn with_ring(mut self, ring: RingConfig) -> Self {
        self.ring = ring;
        self
    }

    /// Reset settings no engine accepts to their defaults
    ///
    /// Returns one description per reset.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut resets = Vec::new();

        if !(2..=3).contains(&self.block.block_count) {
            resets.push(format!(
                "block_count {} is not 2 or 3, using {}",
                self.block.block_count, DEFAULT_BLOCK_COUNT
            ));
            self.block.block_count = DEFAULT_BLOCK_COUNT;
        }
        if self.block.block_frames == Some(0) {
            resets.push("block_frames is 0, using 50 ms blocks".to_string());
            self.block.block_frames = None;
        }

        let ring_defaults = RingConfig::default();
        if self.ring.buffer_ms == 0 {
            resets.push(format!("buffer_ms is 0, using {}", ring_defaults.buffer_ms));
            self.ring.buffer_ms = ring_defaults.buffer_ms;
        }
        if self.ring.max_write_frames == 0 {
            resets.push(format!(
                "max_write_frames is 0, using {}",
                ring_defaults.max_write_frames
            ));
            self.ring.max_write_frames = ring_defaults.max_write_frames;
        }

        resets
    }
}
