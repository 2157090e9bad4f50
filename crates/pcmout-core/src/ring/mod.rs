//! Ring-buffer output
//!
//! [`RingClient`] wraps a device-managed ring buffer. The caller drives it:
//! query padding, reserve space with [`RingClient::get_buffer`], fill the
//! returned [`RenderBuffer`], and release the frames actually written.
//! [`RingPump`] is the standard loop over that contract, pulling frames from a
//! [`FrameSource`] under a latency ceiling:
//!
//! ```text
//!  padding > ceiling ──► skip          ┌────────────────────────────┐
//!  available == 0    ──► skip          │ device ring (buffer_frames)│
//!  otherwise:                          │ ▓▓▓▓▓▓▓▓▓▓▓░░░░░░░░░░░░░░ │
//!    get_buffer(min(available, max)) ─►│  padding    available      │
//!    fill frame by frame               └────────────────────────────┘
//!    release(written)
//! ```
//!
//! [`RingPlayer`] is the callback-driven alternative: it owns a client on its own
//! thread and asks a typed sample callback to fill whatever space is free,
//! topping the ring up every three quarters of its duration.

mod client;
mod player;
mod pump;
mod source;

pub use client::{RenderBuffer, RingClient};
pub use player::RingPlayer;
pub use pump::{PumpConfig, PumpStats, PumpStep, RingPump, SkipReason};
pub use source::{FrameSource, ProducerSource, ReaderSource};
