#![forbid(unsafe_code)]

use super::ModuleLocator;
use crate::clock::Clock;
use crate::domain::ModuleDescriptor;
use crate::error::{Error, ResolveFailure};
use crate::watcher::{LoadEvent, LoaderWatch};
use config::Watch;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    /// `None` retries until cancelled.
    pub max_attempts: Option<NonZeroU32>,
}

impl WaitOptions {
    pub fn from_config(watch: &Watch) -> Self {
        Self {
            poll_interval: watch.poll_interval,
            max_attempts: watch.attempt_limit(),
        }
    }
}

/// Resolve `name`, retrying every poll interval until it succeeds, the
/// attempt limit is reached or `cancel` fires.
///
/// With a `wake` watch, a detected load triggers an immediate attempt
/// instead of waiting out the interval. A load event that still does not
/// make the module resolvable (a loose name match) re-arms the watch.
pub async fn wait_until_resolvable(
    locator: &dyn ModuleLocator,
    clock: &dyn Clock,
    name: &str,
    options: &WaitOptions,
    cancel: &CancellationToken,
    wake: Option<&LoaderWatch>,
) -> Result<ModuleDescriptor, Error> {
    let started = clock.now();
    let mut wake = wake;
    let mut attempts: u32 = 0;
    let mut woken_by: Option<LoadEvent> = None;

    loop {
        attempts = attempts.saturating_add(1);
        if let Some(base) = locator.resolve(name) {
            info!(
                module = name,
                base = format_args!("{base:#x}"),
                attempts,
                elapsed = ?started.elapsed(),
                "module resolved"
            );
            return Ok(ModuleDescriptor::resolved(name, base));
        }

        if let (Some(event), Some(watch)) = (woken_by.take(), wake) {
            warn!(
                module = name,
                path = %event.path,
                "load event did not make the module resolvable, re-arming"
            );
            watch.rearm();
        }

        if options
            .max_attempts
            .is_some_and(|limit| attempts >= limit.get())
        {
            return Err(Error::ModuleNotFound {
                name: name.to_owned(),
                reason: ResolveFailure::Exhausted { attempts },
            });
        }
        debug!(module = name, attempts, "module not loaded yet");

        let events = wake.map(LoaderWatch::events);
        let next_event = async move {
            match events {
                Some(events) => events.recv_async().await.ok(),
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::ModuleNotFound {
                    name: name.to_owned(),
                    reason: ResolveFailure::Cancelled { attempts },
                });
            }
            event = next_event => match event {
                Some(event) => {
                    debug!(module = name, path = %event.path, "load detected");
                    woken_by = Some(event);
                }
                None => {
                    debug!(module = name, "load watch closed, polling only");
                    wake = None;
                }
            },
            _ = clock.sleep(options.poll_interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ImmediateClock, SystemClock};
    use crate::locator::ModuleTable;
    use config::MatchStrategy;
    use std::sync::Arc;

    fn options(max_attempts: u32) -> WaitOptions {
        WaitOptions {
            poll_interval: Duration::from_millis(5),
            max_attempts: NonZeroU32::new(max_attempts),
        }
    }

    #[tokio::test]
    async fn resolves_immediately_when_loaded() {
        let table = ModuleTable::new(MatchStrategy::Basename);
        table.load("/lib/target.so", 0x1000);
        let module = wait_until_resolvable(
            &table,
            &ImmediateClock,
            "target.so",
            &options(1),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(module.base_address(), Some(0x1000));
        assert_eq!(module.name(), "target.so");
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let table = ModuleTable::new(MatchStrategy::Basename);
        let err = wait_until_resolvable(
            &table,
            &ImmediateClock,
            "target.so",
            &options(3),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            Error::ModuleNotFound {
                reason: ResolveFailure::Exhausted { attempts: 3 },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cancellation_stops_unbounded_wait() {
        let table = ModuleTable::new(MatchStrategy::Basename);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = wait_until_resolvable(
            &table,
            &SystemClock,
            "target.so",
            &options(0),
            &cancel,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            Error::ModuleNotFound {
                reason: ResolveFailure::Cancelled { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn picks_up_module_loaded_while_polling() {
        let table = Arc::new(ModuleTable::new(MatchStrategy::Basename));
        let loader = Arc::clone(&table);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            loader.load("/lib/target.so", 0x2000);
        });

        let module = wait_until_resolvable(
            table.as_ref(),
            &SystemClock,
            "target.so",
            &options(0),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(module.base_address(), Some(0x2000));
    }
}
