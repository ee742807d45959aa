#![forbid(unsafe_code)]

mod capture;
mod module;
mod target;

pub use capture::{CaptureRecord, ProbeEvent, Word};
pub use module::ModuleDescriptor;
pub use target::ProbeTarget;
