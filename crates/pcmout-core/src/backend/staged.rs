//! Staged writer over a lock-free byte ring
//!
//! Ring devices that are backed by an `rtrb` queue hand the caller a private
//! staging buffer on `get_buffer` and copy the written frames into the queue
//! on `release_buffer`. The consumer half is driven by whatever plays the
//! audio (a CPAL callback, or the null device's clock).

use rtrb::{Consumer, Producer, RingBuffer};

use crate::buffer::AlignedBuf;
use crate::error::{EngineError, EngineResult};
use crate::format::StreamFormat;

pub(crate) struct StagedRing {
    producer: Producer<u8>,
    staging: AlignedBuf,
    pending: Option<u32>,
    frame_size: usize,
    capacity_frames: u32,
}

impl StagedRing {
    /// Create a ring holding exactly `capacity_frames` frames
    pub(crate) fn new(format: &StreamFormat, capacity_frames: u32) -> (Self, Consumer<u8>) {
        let frame_size = format.frame_size();
        let (producer, consumer) = RingBuffer::<u8>::new(capacity_frames as usize * frame_size);
        let ring = Self {
            producer,
            staging: AlignedBuf::new(0, 0),
            pending: None,
            frame_size,
            capacity_frames,
        };
        (ring, consumer)
    }

    pub(crate) fn capacity_frames(&self) -> u32 {
        self.capacity_frames
    }

    /// Frames committed to the ring and not yet consumed
    pub(crate) fn queued_frames(&self) -> u32 {
        self.capacity_frames - self.free_frames()
    }

    pub(crate) fn free_frames(&self) -> u32 {
        (self.producer.slots() / self.frame_size) as u32
    }

    pub(crate) fn get_buffer(&mut self, frames: u32) -> EngineResult<bool> {
        if let Some(pending) = self.pending {
            return Err(EngineError::Device(format!(
                "buffer of {} frames is still outstanding",
                pending
            )));
        }
        if frames > self.free_frames() {
            return Ok(false);
        }

        self.staging.resize(frames as usize * self.frame_size, 0);
        self.pending = Some(frames);
        Ok(true)
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut [u8] {
        if self.pending.is_some() {
            self.staging.as_mut_slice()
        } else {
            &mut []
        }
    }

    pub(crate) fn release(&mut self, written: u32) -> EngineResult<()> {
        let requested = self
            .pending
            .take()
            .ok_or_else(|| EngineError::Device("release without a buffer".to_string()))?;
        if written > requested {
            return Err(EngineError::InvalidRelease { requested, written });
        }
        if written == 0 {
            return Ok(());
        }

        let bytes = written as usize * self.frame_size;
        let mut chunk = self
            .producer
            .write_chunk(bytes)
            .map_err(|e| EngineError::Device(format!("ring write failed: {}", e)))?;
        let source = &self.staging.as_slice()[..bytes];
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        first.copy_from_slice(&source[..split]);
        second.copy_from_slice(&source[split..]);
        chunk.commit_all();
        Ok(())
    }
}

/// Pop up to `max_frames` whole frames from the consumer; returns frames popped
pub(crate) fn discard_frames(consumer: &mut Consumer<u8>, frame_size: usize, max_frames: u64) -> u64 {
    let available = (consumer.slots() / frame_size) as u64;
    let frames = available.min(max_frames);
    if frames == 0 {
        return 0;
    }
    match consumer.read_chunk(frames as usize * frame_size) {
        Ok(chunk) => {
            chunk.commit_all();
            frames
        }
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_and_release() {
        let format = StreamFormat::pcm16_stereo(48000);
        let (mut ring, mut consumer) = StagedRing::new(&format, 8);
        assert_eq!(ring.free_frames(), 8);

        assert!(ring.get_buffer(4).unwrap());
        ring.buffer_mut().fill(0xAB);
        ring.release(3).unwrap();
        assert_eq!(ring.queued_frames(), 3);

        let chunk = consumer.read_chunk(12).unwrap();
        let (a, b) = chunk.as_slices();
        assert!(a.iter().chain(b).all(|&x| x == 0xAB));
        chunk.commit_all();
        assert_eq!(ring.queued_frames(), 0);
    }

    #[test]
    fn test_no_space_is_not_an_error() {
        let format = StreamFormat::pcm16_stereo(48000);
        let (mut ring, _consumer) = StagedRing::new(&format, 4);
        assert!(!ring.get_buffer(5).unwrap());
        assert!(ring.buffer_mut().is_empty());
    }

    #[test]
    fn test_double_get_and_over_release() {
        let format = StreamFormat::pcm16_stereo(48000);
        let (mut ring, _consumer) = StagedRing::new(&format, 4);
        assert!(ring.get_buffer(2).unwrap());
        assert!(ring.get_buffer(1).is_err());
        assert_eq!(
            ring.release(3),
            Err(EngineError::InvalidRelease { requested: 2, written: 3 })
        );
        assert!(ring.release(0).is_err());
    }

    #[test]
    fn test_wraparound_copy() {
        let format = StreamFormat::new(crate::format::SampleEncoding::Pcm, 8000, 8, 1).unwrap();
        let (mut ring, mut consumer) = StagedRing::new(&format, 4);

        assert!(ring.get_buffer(3).unwrap());
        ring.release(3).unwrap();
        assert_eq!(discard_frames(&mut consumer, 1, 3), 3);

        assert!(ring.get_buffer(4).unwrap());
        ring.buffer_mut().copy_from_slice(&[1, 2, 3, 4]);
        ring.release(4).unwrap();

        let chunk = consumer.read_chunk(4).unwrap();
        let (a, b) = chunk.as_slices();
        let bytes: Vec<u8> = a.iter().chain(b).copied().collect();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
    }
}
