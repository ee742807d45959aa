mod error;
pub mod loader;
pub mod maps;
pub mod memory;
pub mod utils;

pub use error::{Error, ReadError};
pub use maps::{ModuleImage, ProcessMaps, Protection, Region};
pub use memory::{MemoryReader, ProcessMemory, SyntheticMemory, read_c_string};
