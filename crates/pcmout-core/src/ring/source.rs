//! Frame sources for the ring pump

use std::io::{ErrorKind, Read};

use crate::producer::{clamp_produced, DataProducer};

/// Supplies audio one frame at a time
pub trait FrameSource {
    /// Fill `frame` (exactly one frame of bytes)
    ///
    /// Returns `false` once the stream has ended; the frame's contents are
    /// then ignored.
    fn read_frame(&mut self, frame: &mut [u8]) -> bool;
}

impl<F> FrameSource for F
where
    F: FnMut(&mut [u8]) -> bool,
{
    #[inline]
    fn read_frame(&mut self, frame: &mut [u8]) -> bool {
        self(frame)
    }
}

/// Raw interleaved samples from any reader (file, pipe, in-memory cursor)
///
/// A clean end of input or a trailing partial frame ends the stream. Other
/// read errors also end it, with a warning.
pub struct ReaderSource<R: Read> {
    reader: R,
    frames_read: u64,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            frames_read: 0,
        }
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> FrameSource for ReaderSource<R> {
    fn read_frame(&mut self, frame: &mut [u8]) -> bool {
        match self.reader.read_exact(frame) {
            Ok(()) => {
                self.frames_read += 1;
                true
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                log::debug!("ReaderSource: end of input after {} frames", self.frames_read);
                false
            }
            Err(e) => {
                log::warn!("ReaderSource: read failed after {} frames: {}", self.frames_read, e);
                false
            }
        }
    }
}

/// Adapts a byte [`DataProducer`] to frame-by-frame pulls
///
/// The producer's return value is clamped exactly as the block player does.
/// Anything short of a whole frame ends the stream.
pub struct ProducerSource<P: DataProducer> {
    producer: P,
}

impl<P: DataProducer> ProducerSource<P> {
    pub fn new(producer: P) -> Self {
        Self { producer }
    }

    pub fn into_inner(self) -> P {
        self.producer
    }
}

impl<P: DataProducer> FrameSource for ProducerSource<P> {
    fn read_frame(&mut self, frame: &mut [u8]) -> bool {
        let produced = self.producer.produce(frame);
        let len = clamp_produced(produced, frame.len());
        if len < frame.len() {
            log::debug!(
                "ProducerSource: producer returned {} of {} bytes, ending stream",
                produced,
                frame.len()
            );
            return false;
        }
        true
    }
}
