//! Hand-cranked backend for unit tests
//!
//! Block completions and ring consumption only happen when the test asks for
//! them, so rotation and pacing logic can be checked step by step.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{Backend, BlockDevice, CompletionHandler, Rejected, RingDevice};
use crate::block::Block;
use crate::buffer::AlignedBuf;
use crate::config::RingConfig;
use crate::error::{EngineError, EngineResult};
use crate::format::StreamFormat;

#[derive(Default)]
struct BlockShared {
    handler: Option<CompletionHandler>,
    queue: VecDeque<Block>,
    submitted_lens: Vec<usize>,
    reject: bool,
    closed: bool,
}

/// Test-side view of the block device
#[derive(Clone, Default)]
pub(crate) struct BlockControl(Arc<Mutex<BlockShared>>);

impl BlockControl {
    /// Complete the oldest queued block; false when nothing is queued
    pub(crate) fn complete_next(&self) -> bool {
        let next = {
            let mut shared = self.0.lock().unwrap();
            let handler = shared.handler.clone();
            shared.queue.pop_front().zip(handler)
        };
        match next {
            Some((block, handler)) => {
                handler(block);
                true
            }
            None => false,
        }
    }

    pub(crate) fn queued(&self) -> usize {
        self.0.lock().unwrap().queue.len()
    }

    /// Valid byte counts of every accepted submission, in order
    pub(crate) fn submitted_lens(&self) -> Vec<usize> {
        self.0.lock().unwrap().submitted_lens.clone()
    }

    pub(crate) fn reject_submissions(&self, reject: bool) {
        self.0.lock().unwrap().reject = reject;
    }

    pub(crate) fn closed(&self) -> bool {
        self.0.lock().unwrap().closed
    }
}

struct RingShared {
    buffer_frames: u32,
    padding: u32,
    written: Vec<u8>,
    releases: Vec<u32>,
    fail_padding: bool,
    running: bool,
    closed: bool,
}

/// Test-side view of the ring device
#[derive(Clone)]
pub(crate) struct RingControl(Arc<Mutex<RingShared>>);

impl RingControl {
    fn new(buffer_frames: u32) -> Self {
        Self(Arc::new(Mutex::new(RingShared {
            buffer_frames,
            padding: 0,
            written: Vec::new(),
            releases: Vec::new(),
            fail_padding: false,
            running: false,
            closed: false,
        })))
    }

    /// Force the reported padding (may exceed the capacity)
    pub(crate) fn set_padding(&self, frames: u32) {
        self.0.lock().unwrap().padding = frames;
    }

    pub(crate) fn padding(&self) -> u32 {
        self.0.lock().unwrap().padding
    }

    /// Make padding queries fail, as a removed device would
    pub(crate) fn fail_padding(&self, fail: bool) {
        self.0.lock().unwrap().fail_padding = fail;
    }

    /// Pretend the device played `frames` frames
    pub(crate) fn consume(&self, frames: u32) {
        let mut shared = self.0.lock().unwrap();
        shared.padding = shared.padding.saturating_sub(frames);
    }

    /// Frame counts passed to every release, in order
    pub(crate) fn releases(&self) -> Vec<u32> {
        self.0.lock().unwrap().releases.clone()
    }

    /// All committed bytes, in order
    pub(crate) fn written(&self) -> Vec<u8> {
        self.0.lock().unwrap().written.clone()
    }

    pub(crate) fn running(&self) -> bool {
        self.0.lock().unwrap().running
    }

    pub(crate) fn closed(&self) -> bool {
        self.0.lock().unwrap().closed
    }
}

/// Backend handing out manually driven devices
pub(crate) struct ManualBackend {
    block: BlockControl,
    ring: RingControl,
    fail_open: bool,
}

impl ManualBackend {
    /// Ring devices get `buffer_frames` of capacity regardless of config
    pub(crate) fn new(buffer_frames: u32) -> Self {
        Self {
            block: BlockControl::default(),
            ring: RingControl::new(buffer_frames),
            fail_open: false,
        }
    }

    /// Every open call fails
    pub(crate) fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new(0)
        }
    }

    pub(crate) fn block_control(&self) -> BlockControl {
        self.block.clone()
    }

    pub(crate) fn ring_control(&self) -> RingControl {
        self.ring.clone()
    }
}

impl Backend for ManualBackend {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn open_block_device(
        &self,
        _format: &StreamFormat,
        _block_count: usize,
        on_complete: CompletionHandler,
    ) -> EngineResult<Box<dyn BlockDevice>> {
        if self.fail_open {
            return Err(EngineError::DeviceOpen("manual backend set to fail".to_string()));
        }
        self.block.0.lock().unwrap().handler = Some(on_complete);
        Ok(Box::new(ManualBlockDevice {
            shared: self.block.0.clone(),
        }))
    }

    fn open_ring_device(
        &self,
        format: &StreamFormat,
        _config: &RingConfig,
    ) -> EngineResult<Box<dyn RingDevice>> {
        if self.fail_open {
            return Err(EngineError::DeviceCreate("manual backend set to fail".to_string()));
        }
        Ok(Box::new(ManualRingDevice {
            shared: self.ring.0.clone(),
            frame_size: format.frame_size(),
            staging: AlignedBuf::new(0, 0),
            pending: None,
        }))
    }
}

struct ManualBlockDevice {
    shared: Arc<Mutex<BlockShared>>,
}

impl BlockDevice for ManualBlockDevice {
    fn submit(&mut self, block: Block) -> Result<(), Rejected> {
        let mut shared = self.shared.lock().unwrap();
        if shared.reject {
            return Err(Rejected {
                block,
                reason: "manual rejection".to_string(),
            });
        }
        shared.submitted_lens.push(block.len());
        shared.queue.push_back(block);
        Ok(())
    }

    fn close(&mut self) -> EngineResult<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.closed = true;
        // Drop the handler so the rotation is not kept reachable
        shared.handler = None;
        Ok(())
    }
}

struct ManualRingDevice {
    shared: Arc<Mutex<RingShared>>,
    frame_size: usize,
    staging: AlignedBuf,
    pending: Option<u32>,
}

impl RingDevice for ManualRingDevice {
    fn start(&mut self) -> EngineResult<()> {
        self.shared.lock().unwrap().running = true;
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.shared.lock().unwrap().running = false;
        Ok(())
    }

    fn buffer_frames(&self) -> u32 {
        self.shared.lock().unwrap().buffer_frames
    }

    fn padding_frames(&mut self) -> EngineResult<u32> {
        let shared = self.shared.lock().unwrap();
        if shared.fail_padding {
            return Err(EngineError::Device("manual padding failure".to_string()));
        }
        Ok(shared.padding)
    }

    fn get_buffer(&mut self, frames: u32) -> EngineResult<bool> {
        if self.pending.is_some() {
            return Err(EngineError::Device("buffer already outstanding".to_string()));
        }
        let shared = self.shared.lock().unwrap();
        if frames > shared.buffer_frames.saturating_sub(shared.padding) {
            return Ok(false);
        }
        self.staging.resize(frames as usize * self.frame_size, 0);
        self.pending = Some(frames);
        Ok(true)
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        if self.pending.is_some() {
            self.staging.as_mut_slice()
        } else {
            &mut []
        }
    }

    fn release_buffer(&mut self, written: u32) -> EngineResult<()> {
        let requested = self
            .pending
            .take()
            .ok_or_else(|| EngineError::Device("release without a buffer".to_string()))?;
        if written > requested {
            return Err(EngineError::InvalidRelease { requested, written });
        }
        let mut shared = self.shared.lock().unwrap();
        let bytes = written as usize * self.frame_size;
        shared.written.extend_from_slice(&self.staging.as_slice()[..bytes]);
        shared.releases.push(written);
        shared.padding += written;
        Ok(())
    }

    fn close(&mut self) -> EngineResult<()> {
        self.shared.lock().unwrap().closed = true;
        Ok(())
    }
}
