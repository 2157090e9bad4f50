//! Callback-driven ring player
//!
//! ```text
//!  play() ──► start device ──► spawn "pcmout-ring-player"
//!                                   │
//!              ┌────────────────────┘
//!              ▼
//!      available = buffer - padding
//!      get_buffer(available) ─► callback(&mut [T]) ─► release(available)
//!      park for 3/4 of the ring ◄── stop() unparks and joins
//! ```
//!
//! The worker owns the [`RingClient`] while playing and hands it back when
//! it exits, so stop/play cycles reuse the same device.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytemuck::Pod;

use super::RingClient;
use crate::backend::Backend;
use crate::config::{EngineConfig, RingConfig};
use crate::error::{EngineError, EngineResult};
use crate::format::StreamFormat;

/// Shortest park between passes, for very small rings
const MIN_PASS: Duration = Duration::from_millis(1);

type SampleCallback<T> = Box<dyn FnMut(&mut [T]) + Send>;

/// What the worker borrows for the duration of one play session
struct Session<T> {
    client: RingClient,
    callback: SampleCallback<T>,
}

type Worker<T> = JoinHandle<(Session<T>, EngineResult<()>)>;

/// Plays a ring-buffer device from a typed sample callback on its own thread
///
/// Each pass fills every writable frame of the ring through the callback,
/// then sleeps for three quarters of the ring's duration. `T` must match the
/// sample width of the format (`f32` for 32-bit float, `i16` for 16-bit PCM).
pub struct RingPlayer<T: Pod + Send + 'static> {
    format: StreamFormat,
    buffer_frames: u32,
    pass: Duration,
    playing: Arc<AtomicBool>,
    frames_rendered: Arc<AtomicU64>,
    idle: Option<Session<T>>,
    worker: Option<Worker<T>>,
}

impl<T: Pod + Send + 'static> RingPlayer<T> {
    /// Create the ring device on `backend`
    ///
    /// # Errors
    /// * `InvalidFormat` when `T` is not one sample of `format`
    /// * `DeviceCreate` when the device cannot be created
    pub fn new<F>(
        format: StreamFormat,
        callback: F,
        config: &RingConfig,
        backend: &dyn Backend,
    ) -> EngineResult<Self>
    where
        F: FnMut(&mut [T]) + Send + 'static,
    {
        let sample_bytes = format.bits_per_sample() as usize / 8;
        if mem::size_of::<T>() != sample_bytes || format.bits_per_sample() % 8 != 0 {
            return Err(EngineError::InvalidFormat(format!(
                "{}-byte samples cannot carry {}",
                mem::size_of::<T>(),
                format
            )));
        }

        let client = RingClient::new(format, config, backend)?;
        let buffer_frames = client.buffer_frames();
        let pass = (format.duration_of(buffer_frames as u64) * 3 / 4).max(MIN_PASS);

        log::debug!(
            "RingPlayer: {} frame ring, refilling every {:.2}ms",
            buffer_frames,
            pass.as_secs_f32() * 1000.0
        );

        Ok(Self {
            format,
            buffer_frames,
            pass,
            playing: Arc::new(AtomicBool::new(false)),
            frames_rendered: Arc::new(AtomicU64::new(0)),
            idle: Some(Session {
                client,
                callback: Box::new(callback),
            }),
            worker: None,
        })
    }

    /// Create a player using the backend and ring settings of `config`
    pub fn open<F>(format: StreamFormat, callback: F, config: &EngineConfig) -> EngineResult<Self>
    where
        F: FnMut(&mut [T]) + Send + 'static,
    {
        Self::new(format, callback, &config.ring, &config.backend)
    }

    /// Start the device and the render thread
    ///
    /// A no-op while playing. If the render thread stopped on an error, that
    /// error is returned once and the next call starts over.
    pub fn play(&mut self) -> EngineResult<()> {
        if self.worker.is_some() {
            if self.playing.load(Ordering::Acquire) {
                log::debug!("RingPlayer::play: already playing");
                return Ok(());
            }
            self.stop()?;
        }

        let Some(mut session) = self.idle.take() else {
            return Err(EngineError::Device("ring player has no device".to_string()));
        };
        if let Err(e) = session.client.start() {
            self.idle = Some(session);
            return Err(e);
        }

        self.playing.store(true, Ordering::Release);
        let playing = Arc::clone(&self.playing);
        let frames_rendered = Arc::clone(&self.frames_rendered);
        let pass = self.pass;

        let worker = thread::Builder::new()
            .name("pcmout-ring-player".to_string())
            .spawn(move || {
                let result = render(&mut session, &playing, &frames_rendered, pass);
                playing.store(false, Ordering::Release);
                if let Err(e) = &result {
                    log::error!("RingPlayer: render thread stopped: {}", e);
                }
                let stopped = session.client.stop();
                (session, result.and(stopped))
            })
            .map_err(|e| {
                self.playing.store(false, Ordering::Release);
                EngineError::Device(format!("failed to spawn render thread: {}", e))
            })?;

        self.worker = Some(worker);
        log::info!("RingPlayer started: {}", self.format);
        Ok(())
    }

    /// Stop rendering and wait for the render thread to hand the device back
    ///
    /// Frames already released keep playing until the device drains them.
    /// Returns the error that ended the render thread, if any.
    pub fn stop(&mut self) -> EngineResult<()> {
        self.playing.store(false, Ordering::Release);
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        worker.thread().unpark();

        let (session, result) = worker
            .join()
            .map_err(|_| EngineError::Device("render thread panicked".to_string()))?;
        self.idle = Some(session);

        log::info!(
            "RingPlayer stopped after {} frames",
            self.frames_rendered.load(Ordering::Relaxed)
        );
        result
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    pub fn buffer_frames(&self) -> u32 {
        self.buffer_frames
    }

    /// Sleep between render passes
    pub fn pass_interval(&self) -> Duration {
        self.pass
    }

    /// Frames handed to the device since creation
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    /// Stop and destroy the device
    pub fn close(mut self) -> EngineResult<()> {
        let stopped = self.stop();
        let closed = match self.idle.take() {
            Some(session) => session.client.close(),
            None => Ok(()),
        };
        stopped.and(closed)
    }
}

impl<T: Pod + Send + 'static> Drop for RingPlayer<T> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            log::warn!("RingPlayer dropped while playing, stopping");
            if let Err(e) = self.stop() {
                log::error!("RingPlayer: stop on drop failed: {}", e);
            }
        }
    }
}

/// Render passes until `playing` is cleared
fn render<T: Pod>(
    session: &mut Session<T>,
    playing: &AtomicBool,
    frames_rendered: &AtomicU64,
    pass: Duration,
) -> EngineResult<()> {
    let Session { client, callback } = session;

    while playing.load(Ordering::Acquire) {
        let available = client.available_frames()?;
        if let Some(mut buffer) = client.get_buffer(available)? {
            let Some(samples) = buffer.as_samples_mut::<T>() else {
                return Err(EngineError::InvalidFormat(
                    "device buffer is not aligned for the sample type".to_string(),
                ));
            };
            callback(samples);
            buffer.release(available)?;
            frames_rendered.fetch_add(available as u64, Ordering::Relaxed);
            log::trace!("RingPlayer: rendered {} frames", available);
        }
        thread::park_timeout(pass);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::manual::{ManualBackend, RingControl};
    use crate::backend::NullBackend;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    fn manual_player(buffer_frames: u32) -> (RingPlayer<f32>, RingControl) {
        let backend = ManualBackend::new(buffer_frames);
        let control = backend.ring_control();
        let player = RingPlayer::new(
            StreamFormat::float32_stereo(48000),
            |samples: &mut [f32]| samples.fill(0.25),
            &RingConfig::default(),
            &backend,
        )
        .unwrap();
        (player, control)
    }

    #[test]
    fn test_fills_whole_available_region() {
        let (mut player, control) = manual_player(64);
        player.play().unwrap();
        assert!(player.is_playing());

        assert!(wait_until(|| control.releases().len() == 1));
        assert_eq!(control.releases(), vec![64]);
        assert!(control.running());

        // A full ring gets no buffer requests
        thread::sleep(player.pass_interval() * 4);
        assert_eq!(control.releases(), vec![64]);

        control.consume(16);
        assert!(wait_until(|| control.releases().len() == 2));
        assert_eq!(control.releases(), vec![64, 16]);

        player.stop().unwrap();
        assert!(!player.is_playing());
        assert!(!control.running());
        assert_eq!(player.frames_rendered(), 80);

        let written = control.written();
        assert_eq!(written.len(), 80 * 8);
        assert!(written
            .chunks_exact(4)
            .all(|s| f32::from_ne_bytes([s[0], s[1], s[2], s[3]]) == 0.25));
    }

    #[test]
    fn test_pass_is_three_quarters_of_ring() {
        let backend = ManualBackend::new(4800);
        let player = RingPlayer::new(
            StreamFormat::float32_stereo(48000),
            |_: &mut [f32]| {},
            &RingConfig::default(),
            &backend,
        )
        .unwrap();
        assert_eq!(player.buffer_frames(), 4800);
        assert_eq!(player.pass_interval(), Duration::from_millis(75));
    }

    #[test]
    fn test_play_twice_is_noop() {
        let (mut player, control) = manual_player(64);
        player.play().unwrap();
        player.play().unwrap();
        assert!(wait_until(|| !control.releases().is_empty()));
        player.stop().unwrap();
        assert_eq!(control.releases(), vec![64]);
    }

    #[test]
    fn test_restart_reuses_device() {
        let (mut player, control) = manual_player(32);
        player.play().unwrap();
        assert!(wait_until(|| control.releases().len() == 1));
        player.stop().unwrap();

        control.consume(32);
        player.play().unwrap();
        assert!(wait_until(|| control.releases().len() == 2));
        player.stop().unwrap();
        assert_eq!(control.releases(), vec![32, 32]);
        assert!(!control.closed());

        player.close().unwrap();
        assert!(control.closed());
    }

    #[test]
    fn test_sample_width_must_match_format() {
        let backend = ManualBackend::new(64);
        let result = RingPlayer::new(
            StreamFormat::float32_stereo(48000),
            |_: &mut [i16]| {},
            &RingConfig::default(),
            &backend,
        );
        assert!(matches!(result, Err(EngineError::InvalidFormat(_))));

        let pcm16 = RingPlayer::new(
            StreamFormat::pcm16_stereo(48000),
            |_: &mut [i16]| {},
            &RingConfig::default(),
            &backend,
        );
        assert!(pcm16.is_ok());
    }

    #[test]
    fn test_device_failure_stops_rendering() {
        let (mut player, control) = manual_player(64);
        player.play().unwrap();
        assert!(wait_until(|| control.releases().len() == 1));

        control.fail_padding(true);
        assert!(wait_until(|| !player.is_playing()));
        assert!(!control.running());

        // The error is reported once, then the player can start again
        assert!(matches!(player.play(), Err(EngineError::Device(_))));
        control.fail_padding(false);
        control.consume(64);
        player.play().unwrap();
        assert!(wait_until(|| control.releases().len() == 2));
        player.stop().unwrap();
    }

    #[test]
    fn test_drop_while_playing_stops_and_closes() {
        let (mut player, control) = manual_player(64);
        player.play().unwrap();
        assert!(wait_until(|| control.releases().len() == 1));

        drop(player);
        assert!(!control.running());
        assert!(control.closed());
    }

    #[test]
    fn test_null_backend_renders_in_real_time() {
        let _ = env_logger::builder().is_test(true).try_init();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let config = RingConfig::default().with_buffer_ms(10);
        let mut player = RingPlayer::new(
            StreamFormat::pcm16_stereo(48000),
            move |samples: &mut [i16]| {
                counter.fetch_add(1, Ordering::Relaxed);
                samples.fill(0);
            },
            &config,
            &NullBackend,
        )
        .unwrap();
        assert_eq!(player.buffer_frames(), 480);

        player.play().unwrap();
        thread::sleep(Duration::from_millis(60));
        player.stop().unwrap();

        // The first pass fills the whole ring, later passes top it up
        assert!(player.frames_rendered() >= 480);
        assert!(calls.load(Ordering::Relaxed) >= 2);
        player.close().unwrap();
    }
}
