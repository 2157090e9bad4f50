//! CPAL output backend
//!
//! Both device models run on top of a raw CPAL output stream on the system's
//! default output device. The stream's data callback pulls bytes from the
//! engine and pads any shortfall with silence.
//!
//! ```text
//! Block device
//! ┌──────────────┐  submit   ┌──────────────────┐  done   ┌────────────────┐
//! │ BlockPlayer  │──────────►│  CPAL callback   │────────►│ notify thread  │
//! │ (any thread) │  channel  │ (copies blocks)  │ channel │ (runs handler) │
//! └──────────────┘           └──────────────────┘         └────────────────┘
//!
//! Ring device
//! ┌──────────────┐  release  ┌──────────────────┐
//! │  RingClient  │──────────►│  CPAL callback   │
//! │              │ rtrb ring │ (drains frames)  │
//! └──────────────┘           └──────────────────┘
//! ```
//!
//! CPAL streams are not `Send`, so each stream lives on its own thread and is
//! driven through a small command channel.

use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, Stream, StreamConfig};
use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use rtrb::Consumer;

use super::{Backend, BlockDevice, CompletionHandler, Rejected, RingDevice, StagedRing};
use crate::block::Block;
use crate::config::RingConfig;
use crate::error::{EngineError, EngineResult};
use crate::format::{SampleEncoding, StreamFormat};
use crate::platform;

/// Backend for the system's default output device
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl Backend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open_block_device(
        &self,
        format: &StreamFormat,
        block_count: usize,
        on_complete: CompletionHandler,
    ) -> EngineResult<Box<dyn BlockDevice>> {
        platform::runtime_identifier()?;
        let device = CpalBlockDevice::open(*format, block_count, on_complete)
            .map_err(EngineError::DeviceOpen)?;
        Ok(Box::new(device))
    }

    fn open_ring_device(
        &self,
        format: &StreamFormat,
        config: &RingConfig,
    ) -> EngineResult<Box<dyn RingDevice>> {
        platform::runtime_identifier()?;
        let device = CpalRingDevice::open(*format, config.buffer_frames(format))
            .map_err(EngineError::DeviceCreate)?;
        Ok(Box::new(device))
    }
}

/// Map a stream format onto the CPAL sample type carrying the same bytes
fn sample_format(format: &StreamFormat) -> Result<SampleFormat, String> {
    match (format.encoding(), format.bits_per_sample()) {
        (SampleEncoding::Pcm, 8) => Ok(SampleFormat::U8),
        (SampleEncoding::Pcm, 16) => Ok(SampleFormat::I16),
        (SampleEncoding::Pcm, 32) => Ok(SampleFormat::I32),
        (SampleEncoding::Pcm, 64) => Ok(SampleFormat::I64),
        (SampleEncoding::IeeeFloat, 32) => Ok(SampleFormat::F32),
        (SampleEncoding::IeeeFloat, 64) => Ok(SampleFormat::F64),
        _ => Err(format!("{} has no CPAL sample format", format)),
    }
}

/// Build a raw output stream on the default device
///
/// `fill` is handed the interleaved output bytes of every callback.
fn build_stream<F>(format: StreamFormat, mut fill: F) -> Result<Stream, String>
where
    F: FnMut(&mut [u8]) + Send + 'static,
{
    let sample_format = sample_format(&format)?;

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "no default output device".to_string())?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let config = StreamConfig {
        channels: format.channels(),
        sample_rate: cpal::SampleRate(format.frames_per_second()),
        buffer_size: BufferSize::Default,
    };

    let stream = device
        .build_output_stream_raw(
            &config,
            sample_format,
            move |data: &mut cpal::Data, _info: &cpal::OutputCallbackInfo| {
                fill(data.bytes_mut());
            },
            move |err| {
                log::error!("Output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| format!("{} on '{}'", e, device_name))?;

    log::info!("CPAL output stream on '{}' ({})", device_name, format);
    Ok(stream)
}

// ────────────────────────────────────────────────────────────────────────────
// Stream thread
// ────────────────────────────────────────────────────────────────────────────

enum StreamCommand {
    Play(Sender<Result<(), String>>),
    Pause(Sender<Result<(), String>>),
    Shutdown,
}

/// Owns a CPAL stream on a dedicated thread
struct StreamThread {
    commands: Sender<StreamCommand>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn spawn<B>(name: &str, build: B) -> Result<Self, String>
    where
        B: FnOnce() -> Result<Stream, String> + Send + 'static,
    {
        let (commands, command_rx) = bounded::<StreamCommand>(4);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                for command in command_rx.iter() {
                    match command {
                        StreamCommand::Play(reply) => {
                            let _ = reply.send(stream.play().map_err(|e| e.to_string()));
                        }
                        StreamCommand::Pause(reply) => {
                            let _ = reply.send(stream.pause().map_err(|e| e.to_string()));
                        }
                        StreamCommand::Shutdown => break,
                    }
                }
                drop(stream);
                log::debug!("Output stream thread exiting");
            })
            .map_err(|e| format!("failed to spawn stream thread: {}", e))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| "stream thread exited during setup".to_string())
            .and_then(|result| result);

        match ready {
            Ok(()) => Ok(Self {
                commands,
                handle: Some(handle),
            }),
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }

    fn request(&self, make: fn(Sender<Result<(), String>>) -> StreamCommand) -> Result<(), String> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(make(reply_tx))
            .map_err(|_| "stream thread is gone".to_string())?;
        reply_rx
            .recv()
            .map_err(|_| "stream thread is gone".to_string())?
    }

    fn play(&self) -> Result<(), String> {
        self.request(StreamCommand::Play)
    }

    fn pause(&self) -> Result<(), String> {
        self.request(StreamCommand::Pause)
    }

    /// Drop the stream and join its thread
    fn shutdown(&mut self) -> Result<(), String> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let _ = self.commands.send(StreamCommand::Shutdown);
        handle
            .join()
            .map_err(|_| "stream thread panicked".to_string())
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Output stream: {}", e);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Block device
// ────────────────────────────────────────────────────────────────────────────

/// Callback-side state: the block being played and where it is up to
struct BlockFeed {
    incoming: Receiver<Block>,
    finished: Sender<Block>,
    current: Option<(Block, usize)>,
    silence: u8,
    /// Upper bound on block handoffs per callback (empty blocks finish instantly)
    max_handoffs: usize,
}

impl BlockFeed {
    fn fill(&mut self, out: &mut [u8]) {
        let mut pos = 0;
        let mut handoffs = 0;

        while pos < out.len() {
            if self.current.is_none() {
                if handoffs == self.max_handoffs {
                    break;
                }
                match self.incoming.try_recv() {
                    Ok(block) => {
                        self.current = Some((block, 0));
                        handoffs += 1;
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }

            let Some((block, offset)) = self.current.as_mut() else {
                break;
            };
            let bytes = block.bytes();
            let n = (bytes.len() - *offset).min(out.len() - pos);
            out[pos..pos + n].copy_from_slice(&bytes[*offset..*offset + n]);
            pos += n;
            *offset += n;

            if *offset >= bytes.len() {
                if let Some((block, _)) = self.current.take() {
                    // Disconnected only once the device is closing
                    if let Err(TrySendError::Full(block) | TrySendError::Disconnected(block)) =
                        self.finished.try_send(block)
                    {
                        log::error!("Block {} finished but could not be returned", block.index());
                    }
                }
            }
        }

        out[pos..].fill(self.silence);
    }
}

type BlockQueue = (Sender<Block>, Receiver<Block>);

/// Submit and completion queues for a rotation of `block_count` blocks
///
/// Both hold every block of the rotation at once. Blocks only exist inside a
/// player's rotation, so the audio callback never finds the completion queue
/// full and never has to drop a finished block.
fn block_queues(block_count: usize) -> (BlockQueue, BlockQueue) {
    (bounded(block_count), bounded(block_count))
}

struct CpalBlockDevice {
    submit: Option<Sender<Block>>,
    stream: StreamThread,
    notifier: Option<JoinHandle<()>>,
}

impl CpalBlockDevice {
    fn open(
        format: StreamFormat,
        block_count: usize,
        on_complete: CompletionHandler,
    ) -> Result<Self, String> {
        let capacity = block_count.max(1);
        let ((submit_tx, submit_rx), (done_tx, done_rx)) = block_queues(capacity);

        let mut feed = BlockFeed {
            incoming: submit_rx,
            finished: done_tx,
            current: None,
            silence: format.silence_byte(),
            max_handoffs: capacity,
        };

        let stream = StreamThread::spawn("pcmout-cpal-block", move || {
            build_stream(format, move |out| feed.fill(out))
        })?;

        // Completion handlers must not run on the audio callback
        let notifier = thread::Builder::new()
            .name("pcmout-cpal-notify".to_string())
            .spawn(move || {
                for block in done_rx.iter() {
                    on_complete(block);
                }
                log::debug!("Completion thread exiting");
            })
            .map_err(|e| format!("failed to spawn completion thread: {}", e))?;

        stream.play()?;
        log::info!("CPAL block device opened ({} blocks)", block_count);

        Ok(Self {
            submit: Some(submit_tx),
            stream,
            notifier: Some(notifier),
        })
    }
}

impl BlockDevice for CpalBlockDevice {
    fn submit(&mut self, block: Block) -> Result<(), Rejected> {
        let Some(submit) = &self.submit else {
            return Err(Rejected {
                block,
                reason: "device is closed".to_string(),
            });
        };
        submit.try_send(block).map_err(|e| {
            let reason = match &e {
                TrySendError::Full(_) => "device queue is full",
                TrySendError::Disconnected(_) => "output stream has stopped",
            };
            Rejected {
                block: e.into_inner(),
                reason: reason.to_string(),
            }
        })
    }

    fn close(&mut self) -> EngineResult<()> {
        self.submit.take();
        // Dropping the stream drops the callback and with it the completion sender
        self.stream.shutdown().map_err(EngineError::DeviceClose)?;
        if let Some(notifier) = self.notifier.take() {
            if notifier.thread().id() == thread::current().id() {
                return Err(EngineError::DeviceClose(
                    "cannot close from the completion thread".to_string(),
                ));
            }
            notifier
                .join()
                .map_err(|_| EngineError::DeviceClose("completion thread panicked".to_string()))?;
        }
        log::debug!("CPAL block device closed");
        Ok(())
    }
}

impl Drop for CpalBlockDevice {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("CPAL block device: {}", e);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Ring device
// ────────────────────────────────────────────────────────────────────────────

/// Copy whole frames from the ring into `out`, padding the rest with silence
fn drain_ring(consumer: &mut Consumer<u8>, out: &mut [u8], frame_size: usize, silence: u8) {
    let wanted = out.len() - out.len() % frame_size;
    let available = consumer.slots() - consumer.slots() % frame_size;
    let n = wanted.min(available);

    if n > 0 {
        if let Ok(chunk) = consumer.read_chunk(n) {
            let (first, second) = chunk.as_slices();
            out[..first.len()].copy_from_slice(first);
            out[first.len()..n].copy_from_slice(second);
            chunk.commit_all();
        }
    }

    out[n..].fill(silence);
}

struct CpalRingDevice {
    ring: StagedRing,
    stream: StreamThread,
}

impl CpalRingDevice {
    fn open(format: StreamFormat, buffer_frames: u32) -> Result<Self, String> {
        let (ring, mut consumer) = StagedRing::new(&format, buffer_frames);
        let frame_size = format.frame_size();
        let silence = format.silence_byte();

        let stream = StreamThread::spawn("pcmout-cpal-ring", move || {
            build_stream(format, move |out| {
                drain_ring(&mut consumer, out, frame_size, silence)
            })
        })?;

        // Some hosts start streams on creation; the client decides when to play
        if let Err(e) = stream.pause() {
            log::warn!("CPAL ring device: could not pause new stream: {}", e);
        }

        log::info!("CPAL ring device opened ({} frames)", buffer_frames);
        Ok(Self { ring, stream })
    }
}

impl RingDevice for CpalRingDevice {
    fn start(&mut self) -> EngineResult<()> {
        self.stream.play().map_err(EngineError::Device)
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.stream.pause().map_err(EngineError::Device)
    }

    fn buffer_frames(&self) -> u32 {
        self.ring.capacity_frames()
    }

    fn padding_frames(&mut self) -> EngineResult<u32> {
        Ok(self.ring.queued_frames())
    }

    fn get_buffer(&mut self, frames: u32) -> EngineResult<bool> {
        self.ring.get_buffer(frames)
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        self.ring.buffer_mut()
    }

    fn release_buffer(&mut self, written: u32) -> EngineResult<()> {
        self.ring.release(written)
    }

    fn close(&mut self) -> EngineResult<()> {
        self.stream.shutdown().map_err(EngineError::DeviceClose)?;
        log::debug!("CPAL ring device closed");
        Ok(())
    }
}
