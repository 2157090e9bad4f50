//! Block-rotation player
//!
//! # Threading
//!
//! ```text
//! ┌──────────────────┐  play()/stop()   ┌─────────────────────────┐
//! │   Caller thread  │─────────────────►│ Rotation                │
//! └──────────────────┘                  │  playing   (AtomicBool) │
//!                                       │  in_flight (AtomicUsize)│
//! ┌──────────────────┐  on_block_done() │  state     (Mutex)      │
//! │  Device context  │─────────────────►│   producer, device,     │
//! │ (device thread)  │                  │   ring, fault           │
//! └──────────────────┘                  └─────────────────────────┘
//! ```
//!
//! Every flag change and every refill happens under the rotation mutex, so a
//! completion can never observe `playing == true` after `stop()` has cleared
//! it. `stop()` itself does not hold the mutex while it waits for the
//! in-flight counter to drain.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam::utils::Backoff;

use super::{Block, BlockRing};
use crate::backend::{Backend, BlockDevice, CompletionHandler, Rejected};
use crate::config::{BlockConfig, EngineConfig, PRIMED_BLOCKS};
use crate::error::{EngineError, EngineResult};
use crate::format::StreamFormat;
use crate::platform;
use crate::producer::DataProducer;

/// Sleep between drain checks once spinning and yielding have been exhausted
const DRAIN_PARK: Duration = Duration::from_micros(500);

struct RotationState {
    producer: Box<dyn DataProducer>,
    device: Option<Box<dyn BlockDevice>>,
    ring: BlockRing,
    /// Submission error raised in device context; fatal for this player
    fault: Option<EngineError>,
    blocks_completed: u64,
    bytes_submitted: u64,
}

/// State shared between the caller and the device's completion context
struct Rotation {
    playing: AtomicBool,
    in_flight: AtomicUsize,
    state: Mutex<RotationState>,
}

impl Rotation {
    fn lock(&self) -> MutexGuard<'_, RotationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fill the block at the cursor and hand it to the device
    fn submit_next(&self, state: &mut RotationState) -> EngineResult<()> {
        let RotationState {
            producer,
            device,
            ring,
            bytes_submitted,
            ..
        } = state;

        let Some(device) = device.as_mut() else {
            return Err(EngineError::Submission("device is closed".to_string()));
        };
        let Some(mut block) = ring.checkout() else {
            return Err(EngineError::Submission(format!(
                "block {} is still lent to the device",
                ring.cursor()
            )));
        };

        let len = block.fill(&mut **producer);
        let index = block.index();

        match device.submit(block) {
            Ok(()) => {
                ring.advance();
                let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                *bytes_submitted += len as u64;
                log::debug!("Submitted block {} ({} bytes, {} in flight)", index, len, in_flight);
                Ok(())
            }
            Err(Rejected { block, reason }) => {
                ring.give_back(block);
                Err(EngineError::Submission(reason))
            }
        }
    }

    /// Completion notification from the device
    fn on_block_done(&self, block: Block) {
        let mut state = self.lock();

        let index = block.index();
        state.ring.give_back(block);
        state.blocks_completed += 1;
        let counted = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if counted.is_err() {
            log::error!("Block {} completed with nothing in flight", index);
        }

        if !self.playing.load(Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.submit_next(&mut state) {
            log::error!("Block refill failed, stopping playback: {}", e);
            self.playing.store(false, Ordering::SeqCst);
            state.fault = Some(e);
        }
    }

    /// Spin, then yield, then park until every lent block is back
    fn wait_idle(&self) {
        let backoff = Backoff::new();
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            if backoff.is_completed() {
                thread::sleep(DRAIN_PARK);
            } else {
                backoff.snooze();
            }
        }
    }
}

/// Plays audio by rotating 2 or 3 fixed-size blocks through a block device
///
/// The producer is called on the device's completion context each time a
/// block needs refilling. `play()` primes two blocks; from then on every
/// completion refills the next block until `stop()`.
///
/// `play()` and `stop()` take `&self` and may be called from any thread, but
/// are not meant to race each other.
pub struct BlockPlayer {
    format: StreamFormat,
    rotation: Arc<Rotation>,
    block_size: usize,
    block_count: usize,
    backend: &'static str,
    closed: bool,
}

impl BlockPlayer {
    /// Open a block device on `backend` and allocate the rotation
    ///
    /// # Errors
    /// * `InvalidConfig` when the block count is not 2 or 3, or a block would
    ///   be empty
    /// * `DeviceOpen` when the device rejects the format
    pub fn new<P>(
        format: StreamFormat,
        producer: P,
        config: &BlockConfig,
        backend: &dyn Backend,
    ) -> EngineResult<Self>
    where
        P: DataProducer + 'static,
    {
        platform::init();

        let block_count = config.block_count;
        if !(2..=3).contains(&block_count) {
            return Err(EngineError::InvalidConfig(format!(
                "block count must be 2 or 3, got {}",
                block_count
            )));
        }
        let block_size = config.block_size(&format);
        if block_size == 0 {
            return Err(EngineError::InvalidConfig(
                "block size is zero bytes".to_string(),
            ));
        }

        let rotation = Arc::new(Rotation {
            playing: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            state: Mutex::new(RotationState {
                producer: Box::new(producer),
                device: None,
                ring: BlockRing::new(block_count, block_size, format.silence_byte()),
                fault: None,
                blocks_completed: 0,
                bytes_submitted: 0,
            }),
        });

        // The device keeps only a weak reference, so dropping the player frees the rotation
        let weak = Arc::downgrade(&rotation);
        let on_complete: CompletionHandler = Arc::new(move |block: Block| match weak.upgrade() {
            Some(rotation) => rotation.on_block_done(block),
            None => log::debug!("Block {} completed after its player was dropped", block.index()),
        });

        let device = backend.open_block_device(&format, block_count, on_complete)?;
        rotation.lock().device = Some(device);

        log::info!(
            "BlockPlayer opened on {} backend: {}, {} x {} bytes ({:.1}ms latency)",
            backend.name(),
            format,
            block_count,
            block_size,
            format.duration_of_bytes(block_size * PRIMED_BLOCKS).as_secs_f32() * 1000.0
        );

        Ok(Self {
            format,
            rotation,
            block_size,
            block_count,
            backend: backend.name(),
            closed: false,
        })
    }

    /// Open a player using the backend and block settings of `config`
    pub fn open<P>(format: StreamFormat, producer: P, config: &EngineConfig) -> EngineResult<Self>
    where
        P: DataProducer + 'static,
    {
        Self::new(format, producer, &config.block, &config.backend)
    }

    /// Start playback by priming the rotation with two blocks
    ///
    /// A no-op when already playing. Fails with `Submission` if the device
    /// refuses a block, or with the stored error if a refill failed earlier.
    pub fn play(&self) -> EngineResult<()> {
        let mut state = self.rotation.lock();

        if let Some(fault) = &state.fault {
            return Err(fault.clone());
        }
        if self.rotation.playing.load(Ordering::SeqCst) {
            log::debug!("BlockPlayer::play: already playing");
            return Ok(());
        }

        self.rotation.playing.store(true, Ordering::SeqCst);
        for _ in 0..PRIMED_BLOCKS {
            if let Err(e) = self.rotation.submit_next(&mut state) {
                log::error!("BlockPlayer::play: priming failed: {}", e);
                self.rotation.playing.store(false, Ordering::SeqCst);
                state.fault = Some(e.clone());
                drop(state);
                self.rotation.wait_idle();
                return Err(e);
            }
        }

        log::info!("BlockPlayer started ({})", self.backend);
        Ok(())
    }

    /// Stop playback and wait until the device has returned every block
    ///
    /// Blocks already submitted still play out. Never returns while a block
    /// is lent to the device.
    pub fn stop(&self) {
        let was_playing = {
            let _state = self.rotation.lock();
            self.rotation.playing.swap(false, Ordering::SeqCst)
        };

        self.rotation.wait_idle();

        if was_playing {
            log::info!("BlockPlayer stopped ({})", self.backend);
        }
    }

    pub fn is_playing(&self) -> bool {
        self.rotation.playing.load(Ordering::SeqCst)
    }

    /// Blocks currently lent to the device
    pub fn in_flight(&self) -> usize {
        self.rotation.in_flight.load(Ordering::SeqCst)
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    /// Block capacity in bytes
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Queued audio while playing (two primed blocks) in milliseconds
    pub fn latency_ms(&self) -> f32 {
        self.format
            .duration_of_bytes(self.block_size * PRIMED_BLOCKS)
            .as_secs_f32()
            * 1000.0
    }

    pub fn blocks_completed(&self) -> u64 {
        self.rotation.lock().blocks_completed
    }

    /// Valid bytes handed to the device so far
    pub fn bytes_submitted(&self) -> u64 {
        self.rotation.lock().bytes_submitted
    }

    /// Stop, then close the device and release the blocks
    pub fn close(mut self) -> EngineResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> EngineResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.stop();

        // Close outside the lock: the device may join a thread that is waiting on it
        let device = self.rotation.lock().device.take();
        let result = match device {
            Some(mut device) => device.close(),
            None => Ok(()),
        };
        log::info!("BlockPlayer closed ({})", self.backend);
        result
    }
}

impl Drop for BlockPlayer {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if self.is_playing() {
            log::warn!("BlockPlayer dropped while playing, stopping");
        }
        if let Err(e) = self.shutdown() {
            log::error!("BlockPlayer: close failed: {}", e);
        }
    }
}
