#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::num::NonZeroU32;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Watch {
    /// Delay between two resolution attempts, in milliseconds.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub poll_interval: Duration,

    /// Give up after this many failed attempts. Zero means no limit.
    pub max_attempts: u32,

    /// Wait this long after the module appears before installing the probe.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub settle_delay: Duration,

    /// Module exporting the loader entry point.
    pub loader_module: String,

    /// Loader entry point observed for load events.
    pub loader_symbol: String,
}

impl Default for Watch {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_attempts: 0,
            settle_delay: Duration::ZERO,
            loader_module: "libdl.so".into(),
            loader_symbol: "dlopen".into(),
        }
    }
}

impl Watch {
    pub fn attempt_limit(&self) -> Option<NonZeroU32> {
        NonZeroU32::new(self.max_attempts)
    }
}
