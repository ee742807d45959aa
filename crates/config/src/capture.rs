#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Capture {
    /// Upper bound on the bytes read for a single pointer+length argument.
    pub max_bytes: usize,
}

impl Default for Capture {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024,
        }
    }
}
