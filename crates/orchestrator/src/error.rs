#![forbid(unsafe_code)]

use crate::interceptor::HookId;
use kernel::ReadError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("module not found: {name} ({reason})")]
    ModuleNotFound { name: String, reason: ResolveFailure },

    #[error("base address of {module} is not known yet")]
    TargetUnresolved { module: String },

    #[error("offset {offset:#x} in {module} does not point at executable code")]
    InvalidOffset { module: String, offset: u64 },

    #[error("invalid argument signature: {0}")]
    InvalidSignature(#[from] config::SignatureError),

    #[error("config error: {0}")]
    Config(#[from] config::Error),

    #[error("kernel error: {0}")]
    Kernel(#[from] kernel::Error),

    #[error("failed to attach at {address:#x}: {reason}")]
    AttachFailed { address: usize, reason: String },

    #[error("unknown hook: {0:?}")]
    UnknownHook(HookId),

    #[error("session cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResolveFailure {
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Failure to capture the arguments of one call. The probe stays installed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("argument buffer {address:#x}+{length} is unreadable: {source}")]
    OutOfBoundsRead {
        address: usize,
        length: usize,
        #[source]
        source: ReadError,
    },

    #[error("argument buffer length {length} exceeds the {max} byte limit")]
    LengthExceeded { length: usize, max: usize },

    #[error("signature needs slot {slot}, but the call supplied {provided} arguments")]
    MissingArgument { slot: usize, provided: usize },
}
