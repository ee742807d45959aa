#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::domain::{ModuleDescriptor, ProbeTarget};
use crate::error::Error;
use crate::interceptor::Interceptor;
use crate::locator::{ModuleLocator, WaitOptions, wait_until_resolvable};
use crate::probe::{CallProbe, CaptureOptions, CaptureSink};
use crate::watcher::{LoadEventWatcher, LoaderWatch};
use config::{ArgumentSignature, Config, MatchStrategy};
use kernel::MemoryReader;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// Symbol whose calls announce module loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderEntry {
    pub module: String,
    pub symbol: String,
}

/// Everything a session needs to know about what to probe.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub module: String,
    pub function: String,
    pub offset: u64,
    pub signature: ArgumentSignature,
    pub match_strategy: MatchStrategy,
    pub wait: WaitOptions,
    pub settle_delay: Duration,
    pub loader: LoaderEntry,
    pub capture: CaptureOptions,
}

impl SessionPlan {
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            module: config.target.module.clone(),
            function: config.target.function.clone(),
            offset: config.target.offset,
            signature: config.target.signature.clone(),
            match_strategy: config.target.match_strategy,
            wait: WaitOptions::from_config(&config.watch),
            settle_delay: config.watch.settle_delay,
            loader: LoaderEntry {
                module: config.watch.loader_module.clone(),
                symbol: config.watch.loader_symbol.clone(),
            },
            capture: CaptureOptions::from_config(&config.capture),
        })
    }
}

pub struct Services {
    pub locator: Box<dyn ModuleLocator>,
    pub interceptor: Arc<dyn Interceptor>,
    pub memory: Arc<dyn MemoryReader>,
    pub clock: Box<dyn Clock>,
    pub sink: Arc<dyn CaptureSink>,
}

/// Waits for the target module and installs the probe into it.
pub struct ProbeSession {
    plan: SessionPlan,
    services: Services,
}

impl ProbeSession {
    pub fn new(plan: SessionPlan, services: Services) -> Self {
        Self { plan, services }
    }

    pub fn plan(&self) -> &SessionPlan {
        &self.plan
    }

    /// Run until the probe is installed, resolution gives up or `cancel`
    /// fires.
    pub async fn run_until(self, cancel: CancellationToken) -> Result<CallProbe, Error> {
        let span = info_span!(
            "probe_session",
            module = %self.plan.module,
            function = %self.plan.function
        );
        self.run(cancel).instrument(span).await
    }

    /// Run the session on its own thread with a single-threaded runtime.
    pub fn spawn(
        self,
        cancel: CancellationToken,
    ) -> std::io::Result<JoinHandle<Result<CallProbe, Error>>> {
        std::thread::Builder::new()
            .name("hookprobe-session".into())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()?;
                runtime.block_on(self.run_until(cancel))
            })
    }

    async fn run(self, cancel: CancellationToken) -> Result<CallProbe, Error> {
        let Self { plan, services } = self;

        let module = match services.locator.resolve(&plan.module) {
            Some(base) => {
                info!(base = format_args!("{base:#x}"), "module already loaded");
                ModuleDescriptor::resolved(&plan.module, base)
            }
            None => {
                let watch = watch_loader(&plan, &services);
                let waited = wait_until_resolvable(
                    services.locator.as_ref(),
                    services.clock.as_ref(),
                    &plan.module,
                    &plan.wait,
                    &cancel,
                    watch.as_ref(),
                )
                .instrument(info_span!("wait"))
                .await;
                if let Some(watch) = watch {
                    if let Err(err) = watch.stop() {
                        warn!(%err, "failed to unhook loader entry");
                    }
                }
                let module = waited?;
                settle(services.clock.as_ref(), plan.settle_delay, &cancel).await?;
                module
            }
        };

        let target = ProbeTarget::new(module, plan.offset);
        info_span!("install").in_scope(|| {
            CallProbe::install(
                services.interceptor,
                services.memory,
                target,
                &plan.signature,
                plan.capture,
                services.sink,
            )
        })
    }
}

/// Hook the loader entry, if the locator can find it.
fn watch_loader(plan: &SessionPlan, services: &Services) -> Option<LoaderWatch> {
    let LoaderEntry { module, symbol } = &plan.loader;
    let Some(entry) = services.locator.find_export(module, symbol) else {
        warn!(
            loader = %module,
            symbol = %symbol,
            "loader entry not found, relying on polling"
        );
        return None;
    };

    let watcher = Arc::new(LoadEventWatcher::new(
        plan.module.clone(),
        plan.match_strategy,
        Arc::clone(&services.memory),
    ));
    match watcher.watch_loader_entry(Arc::clone(&services.interceptor), entry) {
        Ok(watch) => Some(watch),
        Err(err) => {
            warn!(%err, symbol = %symbol, "cannot hook loader entry, relying on polling");
            None
        }
    }
}

async fn settle(clock: &dyn Clock, delay: Duration, cancel: &CancellationToken) -> Result<(), Error> {
    if delay.is_zero() {
        return Ok(());
    }
    debug!(?delay, "letting the module settle");
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = clock.sleep(delay) => Ok(()),
    }
}
