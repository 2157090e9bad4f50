//! Process-wide platform resolution
//!
//! Every engine constructor calls [`init`] first. It is idempotent and guarded
//! by a single mutex-protected flag; there is no other global state.

use std::sync::{Mutex, PoisonError};

use crate::error::{EngineError, EngineResult};

static INITIALIZED: Mutex<bool> = Mutex::new(false);

/// Initialise the platform layer (safe to call any number of times)
pub fn init() {
    let mut initialized = INITIALIZED.lock().unwrap_or_else(PoisonError::into_inner);
    if *initialized {
        return;
    }

    match runtime_identifier() {
        Ok(rid) => log::info!("pcmout platform initialised ({})", rid),
        Err(e) => log::info!("pcmout platform initialised without native backend: {}", e),
    }

    *initialized = true;
}

/// Undo [`init`]; the next engine constructor initialises again
pub fn shutdown() {
    let mut initialized = INITIALIZED.lock().unwrap_or_else(PoisonError::into_inner);
    if !*initialized {
        return;
    }
    log::debug!("pcmout platform shut down");
    *initialized = false;
}

pub fn is_initialized() -> bool {
    *INITIALIZED.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runtime identifier of the native backend for this process (`"<os>-<arch>"`)
///
/// Fails with [`EngineError::UnsupportedPlatform`] when no native backend
/// exists for the current operating system or architecture.
pub fn runtime_identifier() -> EngineResult<String> {
    rid_for(std::env::consts::OS, std::env::consts::ARCH)
}

fn rid_for(os: &str, arch: &str) -> EngineResult<String> {
    let rid_os = match os {
        "windows" => "win",
        "linux" => "linux",
        "macos" => "osx",
        other => {
            return Err(EngineError::UnsupportedPlatform(format!(
                "operating system '{}'",
                other
            )))
        }
    };

    let rid_arch = match arch {
        "x86_64" => "x64",
        "x86" => "x86",
        "aarch64" => "arm64",
        other => {
            return Err(EngineError::UnsupportedPlatform(format!(
                "architecture '{}'",
                other
            )))
        }
    };

    Ok(format!("{}-{}", rid_os, rid_arch))
}
