#![forbid(unsafe_code)]

//! The seam between observers and whatever redirects control flow.
//!
//! An [`Interceptor`] owns the mechanics of hooking an address (detours,
//! breakpoints, a dispatch table, ...). Observers implement
//! [`InvocationListener`] and never see those mechanics. Listeners are called
//! on the thread that made the intercepted call and must not assume any
//! particular thread.

mod software;

pub use software::SoftwareInterceptor;

use crate::domain::Word;
use crate::error::Error;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

/// Per-call state handed from `on_enter` to the matching `on_leave`.
pub type CallState = Option<Box<dyn Any + Send>>;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(u64);

impl HookId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hook#{}", self.0)
    }
}

/// One intercepted call, as seen on entry and on exit.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub address: usize,
    pub args: &'a [Word],
    pub thread: ThreadId,
}

impl Invocation<'_> {
    pub fn arg(&self, slot: usize) -> Option<Word> {
        self.args.get(slot).copied()
    }
}

pub trait InvocationListener: Send + Sync {
    /// Called before the original function runs. The returned state is
    /// passed back to `on_leave` of the same call.
    fn on_enter(&self, invocation: &Invocation<'_>) -> CallState;

    /// Called after the original function returned `return_value`.
    fn on_leave(&self, invocation: &Invocation<'_>, return_value: Word, state: CallState);
}

pub trait Interceptor: Send + Sync {
    /// Start routing calls of the function at `address` through `listener`.
    fn attach(&self, address: usize, listener: Arc<dyn InvocationListener>)
    -> Result<HookId, Error>;

    /// Stop routing calls through the listener attached as `hook`.
    fn detach(&self, hook: HookId) -> Result<(), Error>;
}
