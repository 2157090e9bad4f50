//! Stream format description
//!
//! A [`StreamFormat`] is the only "file format" the engine knows about: raw
//! interleaved linear samples, described by encoding, rate, width and channel
//! count. [`WaveFormat`] is the same information laid out the way native
//! wave APIs expect it (format tag, block align, average byte rate).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Sample encoding of the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleEncoding {
    /// Linear PCM integers
    Pcm,
    /// IEEE 754 floating point
    IeeeFloat,
}

impl SampleEncoding {
    /// Native wave format tag (1 = PCM, 3 = IEEE float)
    pub fn format_tag(self) -> u16 {
        match self {
            SampleEncoding::Pcm => 1,
            SampleEncoding::IeeeFloat => 3,
        }
    }

    /// Inverse of [`SampleEncoding::format_tag`]
    pub fn from_format_tag(tag: u16) -> Option<Self> {
        match tag {
            1 => Some(SampleEncoding::Pcm),
            3 => Some(SampleEncoding::IeeeFloat),
            _ => None,
        }
    }
}

/// Immutable description of the sample stream fed to a device
///
/// Deserialized values go through [`StreamFormat::new`] and are rejected on
/// the same grounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStreamFormat")]
pub struct StreamFormat {
    encoding: SampleEncoding,
    frames_per_second: u32,
    bits_per_sample: u16,
    channels: u16,
}

impl StreamFormat {
    /// Create a format, rejecting combinations whose frame would be empty or
    /// would not fit a wave format header (16-bit block align, 32-bit byte rate)
    ///
    /// Bit depth and channel count are otherwise passed through untouched;
    /// the device is the authority on what it accepts.
    pub fn new(
        encoding: SampleEncoding,
        frames_per_second: u32,
        bits_per_sample: u16,
        channels: u16,
    ) -> EngineResult<Self> {
        let format = Self {
            encoding,
            frames_per_second,
            bits_per_sample,
            channels,
        };

        if format.frame_size() == 0 {
            return Err(EngineError::InvalidFormat(format!(
                "{} channel(s) of {} bits give a zero-byte frame",
                channels, bits_per_sample
            )));
        }
        if frames_per_second == 0 {
            return Err(EngineError::InvalidFormat(
                "frames per second must be non-zero".to_string(),
            ));
        }
        if format.frame_size() > u16::MAX as usize {
            return Err(EngineError::InvalidFormat(format!(
                "{}-byte frame exceeds the 16-bit block align",
                format.frame_size()
            )));
        }
        if format.frame_size() as u64 * frames_per_second as u64 > u32::MAX as u64 {
            return Err(EngineError::InvalidFormat(format!(
                "{} x {} bytes per second overflows the average byte rate",
                frames_per_second,
                format.frame_size()
            )));
        }

        Ok(format)
    }

    /// 16-bit interleaved stereo PCM
    pub fn pcm16_stereo(frames_per_second: u32) -> Self {
        Self {
            encoding: SampleEncoding::Pcm,
            frames_per_second: frames_per_second.max(1),
            bits_per_sample: 16,
            channels: 2,
        }
    }

    /// 32-bit float interleaved stereo
    pub fn float32_stereo(frames_per_second: u32) -> Self {
        Self {
            encoding: SampleEncoding::IeeeFloat,
            frames_per_second: frames_per_second.max(1),
            bits_per_sample: 32,
            channels: 2,
        }
    }

    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    pub fn frames_per_second(&self) -> u32 {
        self.frames_per_second
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Bytes per frame (one sample for every channel), a.k.a. block align
    #[inline]
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.bits_per_sample as usize / 8
    }

    /// Bytes consumed per second of playback (saturates at `u32::MAX`)
    #[inline]
    pub fn avg_bytes_per_sec(&self) -> u32 {
        u32::try_from(self.frame_size() as u64 * self.frames_per_second as u64)
            .unwrap_or(u32::MAX)
    }

    /// Number of whole frames in `ms` milliseconds
    pub fn frames_for_ms(&self, ms: u32) -> u32 {
        (self.frames_per_second as u64 * ms as u64 / 1000) as u32
    }

    /// Playback time of `frames` frames
    pub fn duration_of(&self, frames: u64) -> Duration {
        Duration::from_nanos(frames.saturating_mul(1_000_000_000) / self.frames_per_second as u64)
    }

    /// Playback time of `bytes` bytes (partial frames are ignored)
    pub fn duration_of_bytes(&self, bytes: usize) -> Duration {
        self.duration_of((bytes / self.frame_size()) as u64)
    }

    /// Byte value that decodes to silence
    ///
    /// 8-bit PCM is unsigned with its midpoint at 0x80; every other supported
    /// encoding is silent at zero.
    pub fn silence_byte(&self) -> u8 {
        match (self.encoding, self.bits_per_sample) {
            (SampleEncoding::Pcm, 8) => 0x80,
            _ => 0,
        }
    }

    /// Native wave format descriptor for this stream
    pub fn wave_format(&self) -> WaveFormat {
        WaveFormat {
            format_tag: self.encoding.format_tag(),
            channels: self.channels,
            samples_per_sec: self.frames_per_second,
            avg_bytes_per_sec: self.avg_bytes_per_sec(),
            block_align: u16::try_from(self.frame_size()).unwrap_or(u16::MAX),
            bits_per_sample: self.bits_per_sample,
        }
    }
}

/// Unchecked wire shape of [`StreamFormat`]
#[derive(Deserialize)]
struct RawStreamFormat {
    encoding: SampleEncoding,
    frames_per_second: u32,
    bits_per_sample: u16,
    channels: u16,
}

impl TryFrom<RawStreamFormat> for StreamFormat {
    type Error = EngineError;

    fn try_from(raw: RawStreamFormat) -> EngineResult<Self> {
        StreamFormat::new(
            raw.encoding,
            raw.frames_per_second,
            raw.bits_per_sample,
            raw.channels,
        )
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.encoding {
            SampleEncoding::Pcm => "pcm",
            SampleEncoding::IeeeFloat => "float",
        };
        write!(
            f,
            "{}{} {}ch @ {}Hz",
            kind, self.bits_per_sample, self.channels, self.frames_per_second
        )
    }
}

/// Wave format header as native wave APIs lay it out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub samples_per_sec: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    /// Size of the serialized header (including the trailing extra-size field)
    pub const SIZE: usize = 18;

    /// Little-endian header bytes with a zero extra-size field
    pub fn to_le_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..2].copy_from_slice(&self.format_tag.to_le_bytes());
        out[2..4].copy_from_slice(&self.channels.to_le_bytes());
        out[4..8].copy_from_slice(&self.samples_per_sec.to_le_bytes());
        out[8..12].copy_from_slice(&self.avg_bytes_per_sec.to_le_bytes());
        out[12..14].copy_from_slice(&self.block_align.to_le_bytes());
        out[14..16].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        out
    }

    /// Convert back into a [`StreamFormat`]
    pub fn to_stream_format(&self) -> EngineResult<StreamFormat> {
        let encoding = SampleEncoding::from_format_tag(self.format_tag).ok_or_else(|| {
            EngineError::InvalidFormat(format!("unsupported format tag {}", self.format_tag))
        })?;
        StreamFormat::new(
            encoding,
            self.samples_per_sec,
            self.bits_per_sample,
            self.channels,
        )
    }
}
