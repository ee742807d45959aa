#![forbid(unsafe_code)]

use crate::error::CaptureError;
use serde::{Deserialize, Serialize};

/// A raw, pointer-sized argument or return value.
pub type Word = usize;

/// Snapshot of the arguments of one intercepted call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRecord {
    arguments: Vec<Word>,
    bytes: Option<Vec<u8>>,
    hex_digest: String,
}

impl CaptureRecord {
    /// Build a record; the digest is the lowercase hex rendering of `bytes`
    /// (empty when there are none).
    pub fn new(arguments: Vec<Word>, bytes: Option<Vec<u8>>) -> Self {
        let hex_digest = bytes.as_deref().map(hex::encode).unwrap_or_default();
        Self {
            arguments,
            bytes,
            hex_digest,
        }
    }

    pub fn arguments(&self) -> &[Word] {
        &self.arguments
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    pub fn hex_digest(&self) -> &str {
        &self.hex_digest
    }
}

/// What a probe reports for every completed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    Captured {
        record: CaptureRecord,
        return_value: Word,
    },
    CaptureFailed {
        arguments: Vec<Word>,
        error: CaptureError,
        return_value: Word,
    },
}

impl ProbeEvent {
    pub fn return_value(&self) -> Word {
        match self {
            Self::Captured { return_value, .. } | Self::CaptureFailed { return_value, .. } => {
                *return_value
            }
        }
    }

    pub fn record(&self) -> Option<&CaptureRecord> {
        match self {
            Self::Captured { record, .. } => Some(record),
            Self::CaptureFailed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&CaptureError> {
        match self {
            Self::Captured { .. } => None,
            Self::CaptureFailed { error, .. } => Some(error),
        }
    }
}
