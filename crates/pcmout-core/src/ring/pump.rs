//! Latency-capped write loop over a [`RingClient`]

use std::thread;
use std::time::Duration;

use crossbeam::utils::Backoff;

use super::{FrameSource, RingClient};
use crate::config::RingConfig;
use crate::error::EngineResult;
use crate::format::StreamFormat;

/// Sleep between skipped iterations once spinning and yielding are exhausted
const SKIP_PARK: Duration = Duration::from_micros(250);

/// Pacing limits of the write loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpConfig {
    /// Skip the iteration while more than this many frames are queued
    pub max_padding_frames: u32,
    /// Largest chunk written per iteration (at least 1)
    pub max_write_frames: u32,
}

impl PumpConfig {
    pub fn new(max_padding_frames: u32, max_write_frames: u32) -> Self {
        Self {
            max_padding_frames,
            max_write_frames: max_write_frames.max(1),
        }
    }

    pub fn with_max_padding_frames(mut self, frames: u32) -> Self {
        self.max_padding_frames = frames;
        self
    }

    pub fn with_max_write_frames(mut self, frames: u32) -> Self {
        self.max_write_frames = frames.max(1);
        self
    }

    /// Frame limits from a ring config (ceiling in ms converted for `format`)
    pub fn from_ring_config(config: &RingConfig, format: &StreamFormat) -> Self {
        Self::new(config.max_padding_frames(format), config.max_write_frames)
    }
}

/// Why an iteration wrote nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The ring is full
    BufferFull,
    /// Queued frames exceed the latency ceiling
    AboveCeiling,
    /// The device refused the requested buffer
    Unavailable,
}

/// Outcome of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStep {
    Wrote(u32),
    Skipped(SkipReason),
    /// The source has ended; nothing more will be written
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub frames_written: u64,
    pub iterations: u64,
    pub skipped: u64,
}

/// Pulls frames from a source into a ring client, a few frames at a time
///
/// Writing small chunks keeps the queued latency close to the ceiling at the
/// cost of more iterations.
pub struct RingPump<S: FrameSource> {
    source: S,
    config: PumpConfig,
    stats: PumpStats,
    exhausted: bool,
}

impl<S: FrameSource> RingPump<S> {
    pub fn new(source: S, config: PumpConfig) -> Self {
        Self {
            source,
            config,
            stats: PumpStats::default(),
            exhausted: false,
        }
    }

    pub fn config(&self) -> &PumpConfig {
        &self.config
    }

    pub fn stats(&self) -> PumpStats {
        self.stats
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Run one iteration of the write loop
    pub fn step(&mut self, client: &mut RingClient) -> EngineResult<PumpStep> {
        if self.exhausted {
            return Ok(PumpStep::Exhausted);
        }
        self.stats.iterations += 1;

        let padding = client.padding_frames()?;
        let available = client.buffer_frames() - padding;
        if available == 0 {
            return Ok(self.skip(SkipReason::BufferFull));
        }
        if padding > self.config.max_padding_frames {
            return Ok(self.skip(SkipReason::AboveCeiling));
        }

        let request = available.min(self.config.max_write_frames);
        let Some(mut buffer) = client.get_buffer(request)? else {
            return Ok(self.skip(SkipReason::Unavailable));
        };

        let frame_size = buffer.frame_size();
        let mut written = 0u32;
        for frame in buffer.bytes_mut().chunks_exact_mut(frame_size) {
            if !self.source.read_frame(frame) {
                self.exhausted = true;
                break;
            }
            written += 1;
        }
        buffer.release(written)?;

        self.stats.frames_written += written as u64;
        log::trace!("RingPump: wrote {} frames (padding {})", written, padding);

        if written == 0 && self.exhausted {
            log::debug!("RingPump: source exhausted after {} frames", self.stats.frames_written);
            return Ok(PumpStep::Exhausted);
        }
        Ok(PumpStep::Wrote(written))
    }

    /// Iterate until the source is exhausted
    ///
    /// Skipped iterations back off (spin, yield, then short sleeps) and reset
    /// as soon as a write succeeds.
    pub fn run(&mut self, client: &mut RingClient) -> EngineResult<PumpStats> {
        let backoff = Backoff::new();
        loop {
            match self.step(client)? {
                PumpStep::Wrote(_) => backoff.reset(),
                PumpStep::Skipped(_) => {
                    if backoff.is_completed() {
                        thread::sleep(SKIP_PARK);
                    } else {
                        backoff.snooze();
                    }
                }
                PumpStep::Exhausted => {
                    log::info!(
                        "RingPump finished: {} frames in {} iterations ({} skipped)",
                        self.stats.frames_written,
                        self.stats.iterations,
                        self.stats.skipped
                    );
                    return Ok(self.stats);
                }
            }
        }
    }

    fn skip(&mut self, reason: SkipReason) -> PumpStep {
        self.stats.skipped += 1;
        PumpStep::Skipped(reason)
    }
}
