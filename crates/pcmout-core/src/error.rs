//! Engine error types
//!
//! Every device-call failure is surfaced immediately; nothing in the engine
//! retries. Producers returning out-of-range lengths and ring buffers that
//! cannot grant space right now are *not* errors and never show up here.

use thiserror::Error;

/// Errors that can occur while opening, driving or closing an output device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The block device could not be opened with the requested format
    #[error("Failed to open output device: {0}")]
    DeviceOpen(String),

    /// The ring-buffer device could not be created
    #[error("Failed to create audio client: {0}")]
    DeviceCreate(String),

    /// Preparing or writing a block to an open device failed
    #[error("Failed to submit audio data: {0}")]
    Submission(String),

    /// No native backend exists for this platform/architecture
    #[error("Platform not supported: {0}")]
    UnsupportedPlatform(String),

    /// The stream format describes an empty frame
    #[error("Invalid stream format: {0}")]
    InvalidFormat(String),

    /// Block count, block size or similar settings are out of range
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// More frames were released than the paired `get_buffer` call requested
    #[error("Released {written} frames but only {requested} were requested")]
    InvalidRelease { requested: u32, written: u32 },

    /// A query or control call on an open device failed
    #[error("Audio device error: {0}")]
    Device(String),

    /// Closing the device failed
    #[error("Failed to close output device: {0}")]
    DeviceClose(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
