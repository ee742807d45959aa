pub mod clock;
pub mod domain;
mod error;
pub mod interceptor;
pub mod locator;
pub mod probe;
pub mod session;
pub mod watcher;

pub use error::{CaptureError, Error, ResolveFailure};
