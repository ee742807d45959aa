/// Represents all possible errors that can occur in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error occurred while reading data from procfs.
    #[error("Failed to read procfs info: {0}")]
    ProcfsReadFailed(#[from] procfs::ProcError),

    /// The process does not exist (anymore).
    #[error("Process {0} does not exist")]
    NoSuchProcess(i32),
}

/// Failure to copy bytes out of an address space.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// Part of `address..address + length` is not mapped readable.
    #[error("region {address:#x}+{length} is not readable ({readable} bytes available)")]
    Unmapped {
        address: usize,
        length: usize,
        readable: usize,
    },

    /// `address + length` does not fit in the address space.
    #[error("region {address:#x}+{length} overflows the address space")]
    Overflow { address: usize, length: usize },

    /// The kernel refused the read for another reason.
    #[error("read of {address:#x}+{length} failed: {errno}")]
    Os {
        address: usize,
        length: usize,
        errno: nix::errno::Errno,
    },
}
