#![forbid(unsafe_code)]

use std::fmt;
use tracing::warn;

/// A module requested by name, and where it was found once it was.
#[derive(Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    name: String,
    base_address: Option<usize>,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_address: None,
        }
    }

    pub fn resolved(name: impl Into<String>, base_address: usize) -> Self {
        Self {
            name: name.into(),
            base_address: Some(base_address),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_address(&self) -> Option<usize> {
        self.base_address
    }

    /// Record the base address. The first value wins: unloading and
    /// reloading a module is not tracked, so a later different base is
    /// ignored.
    pub fn set_base_address(&mut self, base_address: usize) {
        match self.base_address {
            None => self.base_address = Some(base_address),
            Some(current) if current != base_address => {
                warn!(
                    module = %self.name,
                    current = format_args!("{current:#x}"),
                    ignored = format_args!("{base_address:#x}"),
                    "module base already known, ignoring new base"
                );
            }
            Some(_) => {}
        }
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ModuleDescriptor");
        debug.field("name", &self.name);
        match self.base_address {
            Some(base) => debug.field("base_address", &format_args!("{base:#x}")),
            None => debug.field("base_address", &"unresolved"),
        };
        debug.finish()
    }
}
