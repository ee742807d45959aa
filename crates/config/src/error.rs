#![forbid(unsafe_code)]

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config: {0}")]
    Figment(#[from] figment::Error),

    #[error("failed to serialize TOML: {0}")]
    TomlSer(#[from] toml_edit::ser::Error),

    #[error("invalid path: {0}")]
    InvalidPath(PathBuf),

    #[error("invalid argument signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("target module name is empty")]
    EmptyModuleName,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("slot {slot} refers to length slot {length_slot}, but only {len} slots exist")]
    LengthSlotOutOfRange {
        slot: usize,
        length_slot: usize,
        len: usize,
    },

    #[error("slot {slot} uses itself as its length slot")]
    SelfReferentialLength { slot: usize },

    #[error("length slot {length_slot} of slot {slot} is itself a buffer pointer")]
    LengthSlotIsBuffer { slot: usize, length_slot: usize },

    #[error("only one pointer+length pair is supported, found another at slot {slot}")]
    MultipleBuffers { slot: usize },
}
