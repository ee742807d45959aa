#![forbid(unsafe_code)]

use super::{CallState, HookId, Interceptor, Invocation, InvocationListener};
use crate::domain::Word;
use crate::error::Error;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

type Attached = Vec<(HookId, Arc<dyn InvocationListener>)>;

/// An interceptor for calls that are dispatched through it explicitly.
///
/// Callers route a call with [`SoftwareInterceptor::invoke`], giving the
/// address being called and the unhooked function body. Listeners run in
/// attach order on entry and in reverse order on exit, outside the registry
/// lock, so a listener may attach or detach hooks itself.
#[derive(Default)]
pub struct SoftwareInterceptor {
    hooks: RwLock<BTreeMap<usize, Attached>>,
    next_id: AtomicU64,
}

impl SoftwareInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self, address: usize) -> bool {
        self.hooks
            .read()
            .get(&address)
            .is_some_and(|listeners| !listeners.is_empty())
    }

    /// Call `original` as the function at `address`, running any attached
    /// listeners around it. Returns what `original` returned.
    pub fn invoke<F>(&self, address: usize, args: &[Word], original: F) -> Word
    where
        F: FnOnce(&[Word]) -> Word,
    {
        let listeners: Vec<Arc<dyn InvocationListener>> = match self.hooks.read().get(&address) {
            Some(attached) => attached.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => Vec::new(),
        };
        if listeners.is_empty() {
            return original(args);
        }

        let invocation = Invocation {
            address,
            args,
            thread: std::thread::current().id(),
        };
        trace!(
            address = format_args!("{address:#x}"),
            listeners = listeners.len(),
            "dispatching intercepted call"
        );

        let states: Vec<CallState> = listeners
            .iter()
            .map(|listener| listener.on_enter(&invocation))
            .collect();
        let return_value = original(args);
        for (listener, state) in listeners.iter().zip(states).rev() {
            listener.on_leave(&invocation, return_value, state);
        }
        return_value
    }
}

impl Interceptor for SoftwareInterceptor {
    fn attach(
        &self,
        address: usize,
        listener: Arc<dyn InvocationListener>,
    ) -> Result<HookId, Error> {
        let hook = HookId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.hooks
            .write()
            .entry(address)
            .or_default()
            .push((hook, listener));
        debug!(?hook, address = format_args!("{address:#x}"), "listener attached");
        Ok(hook)
    }

    fn detach(&self, hook: HookId) -> Result<(), Error> {
        let mut hooks = self.hooks.write();
        let address = hooks
            .iter()
            .find(|(_, attached)| attached.iter().any(|(id, _)| *id == hook))
            .map(|(address, _)| *address)
            .ok_or(Error::UnknownHook(hook))?;
        if let Some(attached) = hooks.get_mut(&address) {
            attached.retain(|(id, _)| *id != hook);
            if attached.is_empty() {
                hooks.remove(&address);
            }
        }
        debug!(?hook, address = format_args!("{address:#x}"), "listener detached");
        Ok(())
    }
}
