use crate::error::ReadError;
use crate::maps::{ProcessMaps, Protection};
use crate::utils::page_end;
use nix::errno::Errno;
use nix::sys::uio::{RemoteIoVec, process_vm_readv};
use nix::unistd::Pid;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::IoSliceMut;
use tracing::debug;

/// Granularity used when scanning for string terminators.
const SCAN_PAGE: usize = 4096;

/// Fallible access to the bytes of an address space.
///
/// Reading an unmapped or protected region is an error value, never a fault.
pub trait MemoryReader: Send + Sync {
    /// Read exactly `length` bytes starting at `address`.
    fn read(&self, address: usize, length: usize) -> Result<Vec<u8>, ReadError>;

    /// Protection of the region containing `address`, or `None` if unmapped.
    fn protection_at(&self, address: usize) -> Option<Protection>;
}

/// Read a NUL-terminated string of at most `max` bytes.
///
/// The scan never crosses into the next page unless the current one held no
/// terminator, so a string ending just before an unmapped page is still read.
/// A reader reporting a partially readable chunk is asked for the readable
/// prefix only.
pub fn read_c_string(
    reader: &dyn MemoryReader,
    address: usize,
    max: usize,
) -> Result<String, ReadError> {
    let mut bytes = Vec::new();
    let mut cursor = address;
    while bytes.len() < max {
        let chunk = (page_end(cursor, SCAN_PAGE) - cursor).min(max - bytes.len());
        if chunk == 0 {
            return Err(ReadError::Overflow {
                address: cursor,
                length: 1,
            });
        }
        let data = match reader.read(cursor, chunk) {
            Ok(data) => data,
            Err(ReadError::Unmapped { readable, .. }) if readable > 0 => {
                reader.read(cursor, readable)?
            }
            Err(err) => return Err(err),
        };
        if let Some(nul) = data.iter().position(|&byte| byte == 0) {
            bytes.extend_from_slice(&data[..nul]);
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }
        bytes.extend_from_slice(&data);
        cursor += data.len();
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Memory of a live process, read with `process_vm_readv(2)`.
///
/// Works on the calling process too, which turns what would be a segfault
/// into `EFAULT`.
#[derive(Debug, Clone, Copy)]
pub struct ProcessMemory {
    pid: Pid,
}

impl ProcessMemory {
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    pub fn current() -> Self {
        Self {
            pid: Pid::this(),
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }
}

impl MemoryReader for ProcessMemory {
    fn read(&self, address: usize, length: usize) -> Result<Vec<u8>, ReadError> {
        if length == 0 {
            return Ok(Vec::new());
        }
        address
            .checked_add(length)
            .ok_or(ReadError::Overflow { address, length })?;

        let mut buf = vec![0u8; length];
        let remote = [RemoteIoVec {
            base: address,
            len: length,
        }];
        let copied = {
            let mut local = [IoSliceMut::new(&mut buf)];
            process_vm_readv(self.pid, &mut local, &remote)
        };

        match copied {
            Ok(n) if n == length => Ok(buf),
            Ok(readable) => Err(ReadError::Unmapped {
                address,
                length,
                readable,
            }),
            Err(Errno::EFAULT) => Err(ReadError::Unmapped {
                address,
                length,
                readable: 0,
            }),
            Err(errno) => {
                debug!(pid = self.pid.as_raw(), %errno, "process_vm_readv failed");
                Err(ReadError::Os {
                    address,
                    length,
                    errno,
                })
            }
        }
    }

    fn protection_at(&self, address: usize) -> Option<Protection> {
        let maps = ProcessMaps::of(self.pid.as_raw()).ok()?;
        maps.region_containing(address)
            .map(|region| region.protection)
    }
}

#[derive(Debug, Clone)]
struct SyntheticRegion {
    bytes: Vec<u8>,
    protection: Protection,
}

/// An address space made of explicitly mapped byte regions.
///
/// Addresses are plain numbers chosen by the caller; nothing is backed by
/// real memory. Used to drive interception without a live target.
#[derive(Debug, Default)]
pub struct SyntheticMemory {
    regions: RwLock<BTreeMap<usize, SyntheticRegion>>,
}

impl SyntheticMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `bytes` at `start`, replacing any region starting there.
    pub fn map(&self, start: usize, bytes: impl Into<Vec<u8>>, protection: Protection) {
        self.regions.write().insert(
            start,
            SyntheticRegion {
                bytes: bytes.into(),
                protection,
            },
        );
    }

    /// Map `length` zero bytes at `start`.
    pub fn map_zeroed(&self, start: usize, length: usize, protection: Protection) {
        self.map(start, vec![0u8; length], protection);
    }

    /// Unmap the region starting at `start`. Returns whether one existed.
    pub fn unmap(&self, start: usize) -> bool {
        self.regions.write().remove(&start).is_some()
    }
}

impl MemoryReader for SyntheticMemory {
    fn read(&self, address: usize, length: usize) -> Result<Vec<u8>, ReadError> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let end = address
            .checked_add(length)
            .ok_or(ReadError::Overflow { address, length })?;

        let regions = self.regions.read();
        let unmapped = |readable| ReadError::Unmapped {
            address,
            length,
            readable,
        };
        let (start, region) = regions.range(..=address).next_back().ok_or(unmapped(0))?;
        let region_end = start + region.bytes.len();
        if address >= region_end || !region.protection.contains(Protection::READ) {
            return Err(unmapped(0));
        }
        if end > region_end {
            return Err(unmapped(region_end - address));
        }
        let from = address - start;
        Ok(region.bytes[from..from + length].to_vec())
    }

    fn protection_at(&self, address: usize) -> Option<Protection> {
        let regions = self.regions.read();
        let (start, region) = regions.range(..=address).next_back()?;
        (address < start + region.bytes.len()).then_some(region.protection)
    }
}
