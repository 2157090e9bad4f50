//! Application data producer
//!
//! The engine pulls audio: whenever a device has room, it hands the producer a
//! writable byte buffer and asks how much of it was filled.

/// Fills output buffers with sample data on demand
///
/// `produce` returns the number of valid bytes written to the front of
/// `buffer`. Returning fewer bytes than requested is normal (end of stream,
/// nothing ready yet). Values outside `0..=buffer.len()` are tolerated: the
/// engine clamps them rather than treating them as a fault.
///
/// For the block player the producer runs on the device's completion thread,
/// so it must not block for longer than a block's playback time.
pub trait DataProducer: Send {
    fn produce(&mut self, buffer: &mut [u8]) -> isize;
}

impl<F> DataProducer for F
where
    F: FnMut(&mut [u8]) -> isize + Send,
{
    #[inline]
    fn produce(&mut self, buffer: &mut [u8]) -> isize {
        self(buffer)
    }
}

/// Clamp a producer's reported length to `[0, capacity]`
#[inline]
pub(crate) fn clamp_produced(produced: isize, capacity: usize) -> usize {
    if produced <= 0 {
        0
    } else {
        (produced as usize).min(capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_produced() {
        assert_eq!(clamp_produced(-12, 100), 0);
        assert_eq!(clamp_produced(0, 100), 0);
        assert_eq!(clamp_produced(64, 100), 64);
        assert_eq!(clamp_produced(100, 100), 100);
        assert_eq!(clamp_produced(isize::MAX, 100), 100);
    }

    #[test]
    fn test_closure_producer() {
        let mut calls = 0;
        let mut producer = |buf: &mut [u8]| {
            calls += 1;
            buf.fill(1);
            buf.len() as isize
        };
        let mut out = [0u8; 8];
        assert_eq!(DataProducer::produce(&mut producer, &mut out), 8);
        assert_eq!(out, [1; 8]);
        assert_eq!(calls, 1);
    }
}
