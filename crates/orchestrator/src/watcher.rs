#![forbid(unsafe_code)]

//! Detection of a module load through the loader entry point.
//!
//! The watcher hooks the function that loads shared objects (`dlopen` and
//! friends) and looks at every call: argument 0 is the requested path, the
//! return value tells whether the load succeeded. A matching path followed
//! by a non-zero result counts as "the target was loaded". How the path is
//! compared is a [`MatchStrategy`]; with `Substring` this is a heuristic that
//! also fires for unrelated modules sharing the name.

use crate::domain::Word;
use crate::error::Error;
use crate::interceptor::{CallState, HookId, Interceptor, Invocation, InvocationListener};
use config::MatchStrategy;
use kernel::{MemoryReader, read_c_string};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, info, warn};

/// Longest loader path argument that is read.
const PATH_MAX: usize = 4096;

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle = 0,
    Armed = 1,
    Detected = 2,
}

impl WatchState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WatchState::Armed,
            2 => WatchState::Detected,
            _ => WatchState::Idle,
        }
    }
}

impl fmt::Debug for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatchState::Idle => "Idle",
            WatchState::Armed => "Armed",
            WatchState::Detected => "Detected",
        };
        f.write_str(name)
    }
}

/// A successful load of a path matching the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadEvent {
    pub path: String,
    /// What the loader returned (the module handle).
    pub handle: Word,
}

/// Path seen on entry that matched the target, waiting for the result.
struct PendingLoad(String);

pub struct LoadEventWatcher {
    target: String,
    strategy: MatchStrategy,
    memory: Arc<dyn MemoryReader>,
    state: AtomicU8,
    events_tx: flume::Sender<LoadEvent>,
    events_rx: flume::Receiver<LoadEvent>,
}

impl LoadEventWatcher {
    pub fn new(
        target: impl Into<String>,
        strategy: MatchStrategy,
        memory: Arc<dyn MemoryReader>,
    ) -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        Self {
            target: target.into(),
            strategy,
            memory,
            state: AtomicU8::new(WatchState::Idle as u8),
            events_tx,
            events_rx,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> WatchState {
        WatchState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Receives one event per `Armed -> Detected` transition.
    pub fn events(&self) -> flume::Receiver<LoadEvent> {
        self.events_rx.clone()
    }

    /// `Idle -> Armed`. Returns whether the state changed.
    pub fn arm(&self) -> bool {
        self.transition(WatchState::Idle, WatchState::Armed)
    }

    /// `Detected -> Armed`, to detect the next load. Returns whether the
    /// state changed.
    pub fn rearm(&self) -> bool {
        self.transition(WatchState::Detected, WatchState::Armed)
    }

    /// Entry half of a loader call. Returns whether `path` is the target.
    pub fn observe_enter(&self, path: Option<&str>) -> bool {
        if self.state() != WatchState::Armed {
            return false;
        }
        let Some(path) = path else {
            return false;
        };
        let matched = self.strategy.matches(path, &self.target);
        if matched {
            info!(module = %self.target, path, "target module is being loaded");
        }
        matched
    }

    /// Exit half of a loader call whose entry saw `pending` (a matching
    /// path, if any). Returns whether this call completed the detection.
    pub fn observe_exit(&self, pending: Option<String>, result: Word) -> bool {
        let Some(path) = pending else {
            return false;
        };
        if result == 0 {
            debug!(module = %self.target, %path, "target load failed");
            return false;
        }
        if !self.transition(WatchState::Armed, WatchState::Detected) {
            return false;
        }
        info!(module = %self.target, %path, handle = format_args!("{result:#x}"), "target module loaded");
        let event = LoadEvent {
            path,
            handle: result,
        };
        // `events_rx` lives as long as `self`, so the send cannot fail.
        let _ = self.events_tx.send(event);
        true
    }

    /// Arm the watcher and hook the loader entry at `entry`.
    ///
    /// A watcher that already detected a load starts over: events nobody
    /// received are discarded.
    pub fn watch_loader_entry(
        self: &Arc<Self>,
        interceptor: Arc<dyn Interceptor>,
        entry: usize,
    ) -> Result<LoaderWatch, Error> {
        self.reset();
        self.arm();
        let listener: Arc<dyn InvocationListener> = self.clone();
        let hook = interceptor.attach(entry, listener)?;
        debug!(
            module = %self.target,
            entry = format_args!("{entry:#x}"),
            "watching loader entry"
        );
        Ok(LoaderWatch {
            events: self.events(),
            watcher: Arc::clone(self),
            interceptor,
            hook: Some(hook),
        })
    }

    /// Back to `Idle` from any state, dropping undelivered events.
    fn reset(&self) {
        self.state.store(WatchState::Idle as u8, Ordering::Release);
        let stale = self.events_rx.drain().count();
        if stale > 0 {
            debug!(module = %self.target, stale, "discarded undelivered load events");
        }
    }

    fn transition(&self, from: WatchState, to: WatchState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn read_path(&self, pointer: Word) -> Option<String> {
        if pointer == 0 {
            return None;
        }
        match read_c_string(self.memory.as_ref(), pointer, PATH_MAX) {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(%err, "unreadable loader path argument");
                None
            }
        }
    }
}

impl InvocationListener for LoadEventWatcher {
    fn on_enter(&self, invocation: &Invocation<'_>) -> CallState {
        if self.state() != WatchState::Armed {
            return None;
        }
        let path = invocation.arg(0).and_then(|ptr| self.read_path(ptr));
        if self.observe_enter(path.as_deref()) {
            path.map(|path| Box::new(PendingLoad(path)) as Box<dyn Any + Send>)
        } else {
            None
        }
    }

    fn on_leave(&self, _invocation: &Invocation<'_>, return_value: Word, state: CallState) {
        let pending = state
            .and_then(|state| state.downcast::<PendingLoad>().ok())
            .map(|pending| pending.0);
        self.observe_exit(pending, return_value);
    }
}

/// An armed watcher hooked into a loader entry. Dropping it unhooks.
pub struct LoaderWatch {
    watcher: Arc<LoadEventWatcher>,
    interceptor: Arc<dyn Interceptor>,
    hook: Option<HookId>,
    events: flume::Receiver<LoadEvent>,
}

impl LoaderWatch {
    pub fn watcher(&self) -> &LoadEventWatcher {
        &self.watcher
    }

    pub fn state(&self) -> WatchState {
        self.watcher.state()
    }

    pub fn events(&self) -> &flume::Receiver<LoadEvent> {
        &self.events
    }

    pub fn rearm(&self) -> bool {
        self.watcher.rearm()
    }

    /// Unhook the loader entry. The watcher goes back to `Idle`.
    pub fn stop(mut self) -> Result<(), Error> {
        match self.hook.take() {
            Some(hook) => {
                let detached = self.interceptor.detach(hook);
                self.watcher.reset();
                detached
            }
            None => Ok(()),
        }
    }
}

impl Drop for LoaderWatch {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            if let Err(err) = self.interceptor.detach(hook) {
                warn!(%err, "failed to unhook loader entry");
            }
            self.watcher.reset();
        }
    }
}
