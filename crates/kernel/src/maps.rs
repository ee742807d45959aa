use crate::{Error, utils::sanitize_mapping_path};
use bitflags::bitflags;
use config::MatchStrategy;
use procfs::process::{MMPermissions, MMapPath, Process};
use std::path::PathBuf;
use tracing::trace;

bitflags! {
    /// Access rights of a mapped region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Protection: u8 {
        const READ = 1;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        const SHARED = 1 << 3;
    }
}

impl From<MMPermissions> for Protection {
    fn from(perms: MMPermissions) -> Self {
        let mut protection = Protection::empty();
        protection.set(Protection::READ, perms.contains(MMPermissions::READ));
        protection.set(Protection::WRITE, perms.contains(MMPermissions::WRITE));
        protection.set(Protection::EXECUTE, perms.contains(MMPermissions::EXECUTE));
        protection.set(Protection::SHARED, perms.contains(MMPermissions::SHARED));
        protection
    }
}

/// One line of `/proc/<pid>/maps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub start: usize,
    pub end: usize,
    pub protection: Protection,
    /// Offset into the backing file.
    pub offset: u64,
    /// Backing file, if the region is file-backed and the file still exists.
    pub path: Option<PathBuf>,
}

impl Region {
    pub fn contains(&self, address: usize) -> bool {
        (self.start..self.end).contains(&address)
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Where a module ended up in the address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleImage {
    pub path: PathBuf,
    /// Lowest address of any region backed by the module.
    pub base: usize,
    /// Highest end address of any region backed by the module.
    pub end: usize,
}

/// Point-in-time copy of a process's memory map, sorted by address.
#[derive(Debug, Clone, Default)]
pub struct ProcessMaps {
    regions: Vec<Region>,
}

impl ProcessMaps {
    /// Read the memory map of `pid`.
    pub fn of(pid: i32) -> Result<Self, Error> {
        let process = Process::new(pid).map_err(|err| match err {
            procfs::ProcError::NotFound(_) => Error::NoSuchProcess(pid),
            err => Error::ProcfsReadFailed(err),
        })?;
        Self::from_process(&process)
    }

    /// Read the memory map of the calling process.
    pub fn current() -> Result<Self, Error> {
        Self::from_process(&Process::myself()?)
    }

    fn from_process(process: &Process) -> Result<Self, Error> {
        let regions = process
            .maps()?
            .into_iter()
            .map(|map| {
                let path = match map.pathname {
                    MMapPath::Path(path) => sanitize_mapping_path(&path).map(PathBuf::from),
                    _ => None,
                };
                Region {
                    start: map.address.0 as usize,
                    end: map.address.1 as usize,
                    protection: map.perms.into(),
                    offset: map.offset,
                    path,
                }
            })
            .collect();
        trace!(pid = process.pid, "memory map snapshot taken");
        Ok(Self::from_regions(regions))
    }

    pub fn from_regions(mut regions: Vec<Region>) -> Self {
        regions.sort_by_key(|region| region.start);
        Self { regions }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region_containing(&self, address: usize) -> Option<&Region> {
        let idx = self
            .regions
            .partition_point(|region| region.start <= address)
            .checked_sub(1)?;
        self.regions.get(idx).filter(|region| region.contains(address))
    }

    /// Find the first module (in address order) whose path matches `name`.
    pub fn find_module(&self, name: &str, strategy: MatchStrategy) -> Option<ModuleImage> {
        let path = self.regions.iter().find_map(|region| {
            let path = region.path.as_ref()?;
            strategy
                .matches(path.to_str()?, name)
                .then(|| path.clone())
        })?;

        let mut image = ModuleImage {
            base: usize::MAX,
            end: 0,
            path,
        };
        for region in &self.regions {
            if region.path.as_ref() == Some(&image.path) {
                image.base = image.base.min(region.start);
                image.end = image.end.max(region.end);
            }
        }
        Some(image)
    }
}
