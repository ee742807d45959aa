#![forbid(unsafe_code)]

use crate::match_strategy::MatchStrategy;
use crate::signature::ArgumentSignature;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Target {
    /// Name of the module containing the function.
    pub module: String,

    /// Name used when logging captures. Purely cosmetic.
    pub function: String,

    /// Module-relative offset of the function entry.
    pub offset: u64,

    pub match_strategy: MatchStrategy,

    pub signature: ArgumentSignature,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            module: "libwarp_mobile.so".into(),
            function: "CRYPTO_BUFFER_new".into(),
            offset: 0x50c508,
            match_strategy: MatchStrategy::default(),
            signature: ArgumentSignature::crypto_buffer_new(),
        }
    }
}
