#![forbid(unsafe_code)]

use super::ModuleDescriptor;
use crate::error::Error;

/// A function entry expressed as an offset into a module.
///
/// The offset is taken on trust: nothing checks it against the module's
/// size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    module: ModuleDescriptor,
    offset: u64,
}

impl ProbeTarget {
    pub fn new(module: ModuleDescriptor, offset: u64) -> Self {
        Self { module, offset }
    }

    pub fn module(&self) -> &ModuleDescriptor {
        &self.module
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// `base + offset`, once the base is known.
    pub fn address(&self) -> Result<usize, Error> {
        let base = self
            .module
            .base_address()
            .ok_or_else(|| Error::TargetUnresolved {
                module: self.module.name().to_owned(),
            })?;
        usize::try_from(self.offset)
            .ok()
            .and_then(|offset| base.checked_add(offset))
            .ok_or_else(|| Error::InvalidOffset {
                module: self.module.name().to_owned(),
                offset: self.offset,
            })
    }
}
