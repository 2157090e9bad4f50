//! Null output backend
//!
//! Discards audio at the real-time rate of the stream format. Useful for
//! headless machines and tests: timing, completion order and padding behave
//! like a real device, but nothing reaches the speakers.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Sender, TrySendError};
use rtrb::Consumer;

use super::staged::discard_frames;
use super::{Backend, BlockDevice, CompletionHandler, Rejected, RingDevice, StagedRing};
use crate::block::Block;
use crate::config::RingConfig;
use crate::error::{EngineError, EngineResult};
use crate::format::StreamFormat;

/// Shortest time a block is held, so empty blocks do not spin the device thread
const MIN_BLOCK_TIME: Duration = Duration::from_millis(1);

/// Backend whose devices play silence into the void
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

impl Backend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn open_block_device(
        &self,
        format: &StreamFormat,
        block_count: usize,
        on_complete: CompletionHandler,
    ) -> EngineResult<Box<dyn BlockDevice>> {
        Ok(Box::new(NullBlockDevice::open(*format, block_count, on_complete)?))
    }

    fn open_ring_device(
        &self,
        format: &StreamFormat,
        config: &RingConfig,
    ) -> EngineResult<Box<dyn RingDevice>> {
        Ok(Box::new(NullRingDevice::open(*format, config.buffer_frames(format))))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Block device
// ────────────────────────────────────────────────────────────────────────────

/// Plays queued blocks one after another on a dedicated thread
struct NullBlockDevice {
    queue: Option<Sender<Block>>,
    worker: Option<JoinHandle<()>>,
}

impl NullBlockDevice {
    fn open(
        format: StreamFormat,
        block_count: usize,
        on_complete: CompletionHandler,
    ) -> EngineResult<Self> {
        let (tx, rx) = bounded::<Block>(block_count.max(1));

        let worker = thread::Builder::new()
            .name("pcmout-null-block".to_string())
            .spawn(move || {
                for block in rx.iter() {
                    thread::sleep(format.duration_of_bytes(block.len()).max(MIN_BLOCK_TIME));
                    on_complete(block);
                }
                log::debug!("Null block device thread exiting");
            })
            .map_err(|e| EngineError::DeviceOpen(format!("failed to spawn device thread: {}", e)))?;

        log::info!("Null block device opened ({}, {} blocks)", format, block_count);

        Ok(Self {
            queue: Some(tx),
            worker: Some(worker),
        })
    }
}

impl BlockDevice for NullBlockDevice {
    fn submit(&mut self, block: Block) -> Result<(), Rejected> {
        let Some(queue) = &self.queue else {
            return Err(Rejected {
                block,
                reason: "device is closed".to_string(),
            });
        };

        queue.try_send(block).map_err(|e| {
            let reason = match &e {
                TrySendError::Full(_) => "device queue is full",
                TrySendError::Disconnected(_) => "device thread has exited",
            };
            Rejected {
                block: e.into_inner(),
                reason: reason.to_string(),
            }
        })
    }

    fn close(&mut self) -> EngineResult<()> {
        // Dropping the sender ends the worker loop once the queue is empty
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                return Err(EngineError::DeviceClose(
                    "cannot close from the device thread".to_string(),
                ));
            }
            worker
                .join()
                .map_err(|_| EngineError::DeviceClose("device thread panicked".to_string()))?;
            log::debug!("Null block device closed");
        }
        Ok(())
    }
}

impl Drop for NullBlockDevice {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Null block device: {}", e);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Ring device
// ────────────────────────────────────────────────────────────────────────────

/// Ring whose queued frames drain at the stream's frame rate while running
///
/// Consumption is computed lazily from elapsed time whenever the ring is
/// queried, so no thread is needed.
struct NullRingDevice {
    format: StreamFormat,
    ring: StagedRing,
    consumer: Consumer<u8>,
    running: bool,
    last_tick: Instant,
    /// Sub-frame remainder in units of nanoseconds × frames-per-second
    carry: u128,
}

impl NullRingDevice {
    fn open(format: StreamFormat, buffer_frames: u32) -> Self {
        let (ring, consumer) = StagedRing::new(&format, buffer_frames);
        log::info!(
            "Null ring device opened ({}, {} frames)",
            format,
            buffer_frames
        );
        Self {
            format,
            ring,
            consumer,
            running: false,
            last_tick: Instant::now(),
            carry: 0,
        }
    }

    /// Play out the frames that elapsed since the last query
    fn advance_clock(&mut self) {
        let now = Instant::now();
        if !self.running {
            self.last_tick = now;
            return;
        }

        let elapsed = now.duration_since(self.last_tick).as_nanos();
        self.last_tick = now;

        let total = self.carry + elapsed * self.format.frames_per_second() as u128;
        let frames = total / 1_000_000_000;
        self.carry = total % 1_000_000_000;

        let played = discard_frames(
            &mut self.consumer,
            self.format.frame_size(),
            frames.min(u64::MAX as u128) as u64,
        );
        if (played as u128) < frames {
            // Underrun: the device plays silence and the clock carries on
            self.carry = 0;
        }
    }
}

impl RingDevice for NullRingDevice {
    fn start(&mut self) -> EngineResult<()> {
        self.advance_clock();
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.advance_clock();
        self.running = false;
        Ok(())
    }

    fn buffer_frames(&self) -> u32 {
        self.ring.capacity_frames()
    }

    fn padding_frames(&mut self) -> EngineResult<u32> {
        self.advance_clock();
        Ok(self.ring.queued_frames())
    }

    fn get_buffer(&mut self, frames: u32) -> EngineResult<bool> {
        self.advance_clock();
        self.ring.get_buffer(frames)
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        self.ring.buffer_mut()
    }

    fn release_buffer(&mut self, written: u32) -> EngineResult<()> {
        self.ring.release(written)
    }

    fn close(&mut self) -> EngineResult<()> {
        self.running = false;
        log::debug!("Null ring device closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_block_device_completes_in_order() {
        let format = StreamFormat::pcm16_stereo(48000);
        let done = Arc::new(Mutex::new(Vec::new()));
        let done_clone = done.clone();
        let handler: CompletionHandler = Arc::new(move |block: Block| {
            done_clone.lock().unwrap().push(block.index());
        });

        let mut device = NullBlockDevice::open(format, 3, handler).unwrap();
        for i in 0..3 {
            let mut block = Block::new(i, 192, 0);
            block.fill(&mut |buf: &mut [u8]| buf.len() as isize);
            device.submit(block).unwrap();
        }
        device.close().unwrap();

        assert_eq!(*done.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_block_device_rejects_when_full() {
        let format = StreamFormat::pcm16_stereo(48000);
        let completed = Arc::new(AtomicUsize::new(0));
        let completed_clone = completed.clone();
        let handler: CompletionHandler = Arc::new(move |_| {
            completed_clone.fetch_add(1, Ordering::SeqCst);
        });

        let mut device = NullBlockDevice::open(format, 1, handler).unwrap();
        // 100 ms blocks keep the worker busy while the queue fills
        let mut accepted = 0;
        let mut rejected = None;
        for i in 0..4 {
            let mut block = Block::new(i, 19_200, 0);
            block.fill(&mut |buf: &mut [u8]| buf.len() as isize);
            match device.submit(block) {
                Ok(()) => accepted += 1,
                Err(r) => {
                    rejected = Some(r);
                    break;
                }
            }
        }

        let rejected = rejected.expect("queue never filled");
        assert!(rejected.block.len() == 19_200);
        assert!(accepted >= 1);
        drop(rejected);
        device.close().unwrap();
        assert_eq!(completed.load(Ordering::SeqCst), accepted);
    }

    #[test]
    fn test_ring_device_drains_while_running() {
        let format = StreamFormat::pcm16_stereo(48000);
        let mut device = NullRingDevice::open(format, 960);
        assert_eq!(device.buffer_frames(), 960);

        assert!(device.get_buffer(480).unwrap());
        device.release_buffer(480).unwrap();

        // Stopped: nothing drains
        thread::sleep(Duration::from_millis(5));
        assert_eq!(device.padding_frames().unwrap(), 480);

        device.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(device.padding_frames().unwrap(), 0);

        // Full ring refuses further requests without failing
        device.stop().unwrap();
        assert!(device.get_buffer(960).unwrap());
        device.release_buffer(960).unwrap();
        assert!(!device.get_buffer(1).unwrap());
        device.close().unwrap();
    }
}
