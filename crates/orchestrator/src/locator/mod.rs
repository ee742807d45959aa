#![forbid(unsafe_code)]

mod wait;

pub use wait::{WaitOptions, wait_until_resolvable};

use config::MatchStrategy;
use kernel::ProcessMaps;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Finds where modules live in the target address space.
pub trait ModuleLocator: Send + Sync {
    /// Base address of `name`, or `None` if it is not loaded (yet).
    fn resolve(&self, name: &str) -> Option<usize>;

    /// Address of `symbol` exported by `module`, if the platform loader
    /// can tell.
    fn find_export(&self, _module: &str, _symbol: &str) -> Option<usize> {
        None
    }
}

impl<T: ModuleLocator + ?Sized> ModuleLocator for std::sync::Arc<T> {
    fn resolve(&self, name: &str) -> Option<usize> {
        (**self).resolve(name)
    }

    fn find_export(&self, module: &str, symbol: &str) -> Option<usize> {
        (**self).find_export(module, symbol)
    }
}

/// Locates modules by reading `/proc/<pid>/maps`.
#[derive(Debug, Clone, Copy)]
pub struct ProcMapsLocator {
    /// `None` for the calling process.
    pid: Option<i32>,
    strategy: MatchStrategy,
}

impl ProcMapsLocator {
    pub fn new(pid: i32, strategy: MatchStrategy) -> Self {
        Self {
            pid: Some(pid),
            strategy,
        }
    }

    pub fn current(strategy: MatchStrategy) -> Self {
        Self {
            pid: None,
            strategy,
        }
    }

    fn snapshot(&self) -> Result<ProcessMaps, kernel::Error> {
        match self.pid {
            Some(pid) => ProcessMaps::of(pid),
            None => ProcessMaps::current(),
        }
    }
}

impl ModuleLocator for ProcMapsLocator {
    fn resolve(&self, name: &str) -> Option<usize> {
        let maps = match self.snapshot() {
            Ok(maps) => maps,
            Err(err) => {
                debug!(pid = ?self.pid, %err, "failed to read memory map");
                return None;
            }
        };
        let image = maps.find_module(name, self.strategy)?;
        debug!(
            module = name,
            path = %image.path.display(),
            base = format_args!("{:#x}", image.base),
            "module located"
        );
        Some(image.base)
    }

    fn find_export(&self, module: &str, symbol: &str) -> Option<usize> {
        // Only the calling process's loader can be queried.
        let own_pid = self.pid.is_none_or(|pid| pid == std::process::id() as i32);
        if own_pid {
            kernel::loader::find_export(module, symbol)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct TableInner {
    /// Loaded module paths and their bases, in load order.
    modules: Vec<(String, usize)>,
    exports: HashMap<(String, String), usize>,
}

/// An explicitly maintained module list.
///
/// Pairs with [`crate::interceptor::SoftwareInterceptor`] and
/// [`kernel::SyntheticMemory`] to model a process whose loads are driven
/// by the caller.
#[derive(Debug, Default)]
pub struct ModuleTable {
    strategy: MatchStrategy,
    inner: RwLock<TableInner>,
}

impl ModuleTable {
    pub fn new(strategy: MatchStrategy) -> Self {
        Self {
            strategy,
            inner: Default::default(),
        }
    }

    /// Record that the module at `path` is now mapped at `base`.
    pub fn load(&self, path: impl Into<String>, base: usize) {
        self.inner.write().modules.push((path.into(), base));
    }

    pub fn define_export(&self, module: impl Into<String>, symbol: impl Into<String>, address: usize) {
        self.inner
            .write()
            .exports
            .insert((module.into(), symbol.into()), address);
    }
}

impl ModuleLocator for ModuleTable {
    fn resolve(&self, name: &str) -> Option<usize> {
        self.inner
            .read()
            .modules
            .iter()
            .find(|(path, _)| self.strategy.matches(path, name))
            .map(|(_, base)| *base)
    }

    fn find_export(&self, module: &str, symbol: &str) -> Option<usize> {
        self.inner
            .read()
            .exports
            .get(&(module.to_owned(), symbol.to_owned()))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_resolves_by_strategy() {
        let table = ModuleTable::new(MatchStrategy::Basename);
        assert_eq!(table.resolve("target.so"), None);

        table.load("/data/app/lib/target.so", 0x7000_0000);
        assert_eq!(table.resolve("target.so"), Some(0x7000_0000));
        assert_eq!(table.resolve("arget.so"), None);

        let loose = ModuleTable::new(MatchStrategy::Substring);
        loose.load("/data/app/lib/target.so", 0x7000_0000);
        assert_eq!(loose.resolve("arget.so"), Some(0x7000_0000));
    }

    #[test]
    fn table_exports() {
        let table = ModuleTable::default();
        table.define_export("libdl.so", "dlopen", 0x5000);
        assert_eq!(table.find_export("libdl.so", "dlopen"), Some(0x5000));
        assert_eq!(table.find_export("libdl.so", "dlclose"), None);
    }

    #[test]
    fn proc_maps_finds_libc_in_own_process() {
        let locator = ProcMapsLocator::current(MatchStrategy::Substring);
        assert!(locator.resolve("libc").is_some());
        assert_eq!(locator.resolve("no-such-module-hookprobe.so"), None);
    }

    #[test]
    fn proc_maps_for_missing_process() {
        let locator = ProcMapsLocator::new(i32::MAX, MatchStrategy::Basename);
        assert_eq!(locator.resolve("libc.so.6"), None);
        assert_eq!(locator.find_export("libc.so.6", "getpid"), None);
    }
}
