#![forbid(unsafe_code)]

mod capture;
mod error;
mod match_strategy;
mod signature;
mod target;
mod watch;

pub use capture::Capture;
pub use error::{Error, SignatureError};
pub use match_strategy::MatchStrategy;
pub use signature::{ArgumentSignature, BufferPair, SlotKind};
pub use target::Target;
pub use watch::Watch;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of environment variables overriding file values. Nested keys
/// are separated by `__`, eg. `HOOKPROBE_WATCH__POLL_INTERVAL=250`.
pub const ENV_PREFIX: &str = "HOOKPROBE_";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub target: Target,
    pub watch: Watch,
    pub capture: Capture,
}

impl Config {
    /// Built-in defaults, without consulting files or the environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load defaults, then `path`, then `HOOKPROBE_*` variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::InvalidPath(path.into()));
        }
        Self::extract(Self::defaults().merge(Toml::file(path)).merge(Self::env()))
    }

    /// Load defaults overridden by `HOOKPROBE_*` variables only.
    pub fn from_env() -> Result<Self, Error> {
        Self::extract(Self::defaults().merge(Self::env()))
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(document: &str) -> Result<Self, Error> {
        Self::extract(Self::defaults().merge(Toml::string(document)))
    }

    /// Render the effective configuration.
    pub fn to_toml(&self) -> Result<String, Error> {
        Ok(toml_edit::ser::to_string_pretty(self)?)
    }

    /// Check cross-field rules that serde cannot express.
    pub fn validate(&self) -> Result<(), Error> {
        if self.target.module.is_empty() {
            return Err(Error::EmptyModuleName);
        }
        if self.watch.poll_interval.is_zero() {
            return Err(Error::ZeroPollInterval);
        }
        self.target.signature.validate()?;
        Ok(())
    }

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
    }

    /// Merged last, so variables win over any file.
    fn env() -> Env {
        Env::prefixed(ENV_PREFIX).split("__")
    }

    fn extract(figment: Figment) -> Result<Self, Error> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }
}
