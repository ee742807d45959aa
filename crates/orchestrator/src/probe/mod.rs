#![forbid(unsafe_code)]

//! Argument capture at a fixed offset inside a module.

mod capture;
mod sink;

pub use capture::CapturePlan;
pub use sink::{CaptureSink, ChannelSink, FanoutSink, LogSink, format_capture_line};

use crate::domain::ProbeTarget;
use crate::error::Error;
use crate::interceptor::{HookId, Interceptor, InvocationListener};
use capture::CaptureListener;
use config::ArgumentSignature;
use kernel::{MemoryReader, Protection};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Longest buffer that is read for one call.
    pub max_bytes: usize,
}

impl CaptureOptions {
    pub fn from_config(capture: &config::Capture) -> Self {
        Self {
            max_bytes: capture.max_bytes,
        }
    }
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self::from_config(&config::Capture::default())
    }
}

/// An installed probe. Dropping it uninstalls.
pub struct CallProbe {
    target: ProbeTarget,
    address: usize,
    interceptor: Arc<dyn Interceptor>,
    hook: Option<HookId>,
}

impl CallProbe {
    /// Attach a capturing listener at `target`.
    ///
    /// Fails with [`Error::TargetUnresolved`] while the module has no base,
    /// and with [`Error::InvalidOffset`] when `base + offset` overflows or
    /// does not land in executable memory.
    pub fn install(
        interceptor: Arc<dyn Interceptor>,
        memory: Arc<dyn MemoryReader>,
        target: ProbeTarget,
        signature: &ArgumentSignature,
        options: CaptureOptions,
        sink: Arc<dyn CaptureSink>,
    ) -> Result<Self, Error> {
        let address = target.address()?;
        let executable = memory
            .protection_at(address)
            .is_some_and(|prot| prot.contains(Protection::EXECUTE));
        if !executable {
            return Err(Error::InvalidOffset {
                module: target.module().name().to_owned(),
                offset: target.offset(),
            });
        }

        let listener: Arc<dyn InvocationListener> = Arc::new(CaptureListener {
            plan: CapturePlan::new(signature, options.max_bytes)?,
            memory,
            sink,
        });
        let hook = interceptor.attach(address, listener)?;
        info!(
            module = target.module().name(),
            offset = format_args!("{:#x}", target.offset()),
            address = format_args!("{address:#x}"),
            "probe installed"
        );
        Ok(Self {
            target,
            address,
            interceptor,
            hook: Some(hook),
        })
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn target(&self) -> &ProbeTarget {
        &self.target
    }

    /// Detach the listener, restoring the original control flow.
    pub fn uninstall(mut self) -> Result<(), Error> {
        match self.hook.take() {
            Some(hook) => {
                self.interceptor.detach(hook)?;
                info!(address = format_args!("{:#x}", self.address), "probe uninstalled");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for CallProbe {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            if let Err(err) = self.interceptor.detach(hook) {
                warn!(address = format_args!("{:#x}", self.address), %err, "failed to uninstall probe");
            }
        }
    }
}

impl std::fmt::Debug for CallProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallProbe")
            .field("target", &self.target)
            .field("address", &format_args!("{:#x}", self.address))
            .field("hook", &self.hook)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ModuleDescriptor, ProbeEvent};
    use crate::error::CaptureError;
    use crate::interceptor::SoftwareInterceptor;
    use config::{SignatureError, SlotKind};
    use kernel::SyntheticMemory;
    use pretty_assertions::assert_eq;

    const BASE: usize = 0x4000_0000;
    const DATA: usize = 0x7000_0000;

    struct Fixture {
        interceptor: Arc<SoftwareInterceptor>,
        memory: Arc<SyntheticMemory>,
        sink: ChannelSink,
        events: flume::Receiver<ProbeEvent>,
    }

    impl Fixture {
        fn new() -> Self {
            let memory = SyntheticMemory::new();
            memory.map_zeroed(BASE, 0x1000, Protection::READ | Protection::EXECUTE);
            memory.map_zeroed(BASE + 0x1000, 0x1000, Protection::READ | Protection::WRITE);
            memory.map(DATA, [0xde, 0xad, 0xbe, 0xef], Protection::READ);
            let (sink, events) = ChannelSink::new();
            Self {
                interceptor: Arc::new(SoftwareInterceptor::new()),
                memory: Arc::new(memory),
                sink,
                events,
            }
        }

        fn install(&self, target: ProbeTarget, signature: &ArgumentSignature) -> Result<CallProbe, Error> {
            CallProbe::install(
                self.interceptor.clone(),
                self.memory.clone(),
                target,
                signature,
                CaptureOptions { max_bytes: 16 },
                Arc::new(self.sink.clone()),
            )
        }
    }

    fn resolved(offset: u64) -> ProbeTarget {
        ProbeTarget::new(ModuleDescriptor::resolved("target.so", BASE), offset)
    }

    #[test]
    fn captures_every_call() {
        let fixture = Fixture::new();
        let probe = fixture
            .install(resolved(0x100), &ArgumentSignature::crypto_buffer_new())
            .unwrap();
        assert_eq!(probe.address(), BASE + 0x100);

        let ret = fixture.interceptor.invoke(BASE + 0x100, &[DATA, 4, 0], |_| 0xabc);
        assert_eq!(ret, 0xabc);
        let event = fixture.events.try_recv().unwrap();
        assert_eq!(event.return_value(), 0xabc);
        assert_eq!(event.record().map(|r| r.hex_digest()), Some("deadbeef"));
    }

    #[test]
    fn failed_capture_keeps_probe_installed() {
        let fixture = Fixture::new();
        let _probe = fixture
            .install(resolved(0x100), &ArgumentSignature::crypto_buffer_new())
            .unwrap();

        fixture.interceptor.invoke(BASE + 0x100, &[0x10, 4, 0], |_| 0);
        let event = fixture.events.try_recv().unwrap();
        assert!(matches!(
            event,
            ProbeEvent::CaptureFailed {
                error: CaptureError::OutOfBoundsRead { address: 0x10, length: 4, .. },
                ..
            }
        ));

        fixture.interceptor.invoke(BASE + 0x100, &[DATA, 2, 0], |_| 1);
        let event = fixture.events.try_recv().unwrap();
        assert_eq!(event.record().map(|r| r.hex_digest()), Some("dead"));
    }

    #[test]
    fn concurrent_calls_capture_their_own_buffers() {
        const THREADS: usize = 8;
        const CALLS: usize = 50;
        let buffer = |thread: usize| DATA + 0x1000 * (thread + 1);

        let fixture = Fixture::new();
        for thread in 0..THREADS {
            fixture
                .memory
                .map(buffer(thread), vec![thread as u8; thread + 1], Protection::READ);
        }
        let _probe = fixture
            .install(resolved(0x100), &ArgumentSignature::crypto_buffer_new())
            .unwrap();

        std::thread::scope(|scope| {
            for thread in 0..THREADS {
                let interceptor = &fixture.interceptor;
                scope.spawn(move || {
                    for call in 0..CALLS {
                        let args = [buffer(thread), thread + 1, call];
                        let ret = interceptor.invoke(BASE + 0x100, &args, |_| thread << 16 | call);
                        assert_eq!(ret, thread << 16 | call);
                    }
                });
            }
        });

        let mut per_thread = [0; THREADS];
        for event in fixture.events.drain() {
            let record = event.record().unwrap();
            let &[address, length, call] = record.arguments() else {
                panic!("unexpected arguments {:?}", record.arguments());
            };
            let thread = length - 1;
            assert_eq!(address, buffer(thread));
            assert_eq!(record.bytes(), Some(vec![thread as u8; length].as_slice()));
            assert_eq!(event.return_value(), thread << 16 | call);
            per_thread[thread] += 1;
        }
        assert_eq!(per_thread, [CALLS; THREADS]);
    }

    #[test]
    fn unresolved_module_is_rejected() {
        let fixture = Fixture::new();
        let target = ProbeTarget::new(ModuleDescriptor::new("target.so"), 0x100);
        let err = fixture
            .install(target, &ArgumentSignature::crypto_buffer_new())
            .unwrap_err();
        assert!(matches!(err, Error::TargetUnresolved { module } if module == "target.so"));
    }

    #[test]
    fn offset_outside_code_is_rejected() {
        let fixture = Fixture::new();
        for offset in [0x1100, 0x10_0000, u64::MAX] {
            let err = fixture
                .install(resolved(offset), &ArgumentSignature::crypto_buffer_new())
                .unwrap_err();
            assert!(
                matches!(err, Error::InvalidOffset { offset: o, .. } if o == offset),
                "{offset:#x}: {err}"
            );
        }
        assert!(!fixture.interceptor.is_attached(BASE + 0x1100));
    }

    #[test]
    fn invalid_signature_is_rejected() {
        let fixture = Fixture::new();
        let signature = ArgumentSignature::new([SlotKind::Buffer { length_slot: 3 }]);
        let err = fixture.install(resolved(0x100), &signature).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidSignature(SignatureError::LengthSlotOutOfRange { .. })
        ));
        assert!(!fixture.interceptor.is_attached(BASE + 0x100));
    }

    #[test]
    fn uninstall_and_drop_detach() {
        let fixture = Fixture::new();
        let signature = ArgumentSignature::crypto_buffer_new();

        let probe = fixture.install(resolved(0x100), &signature).unwrap();
        probe.uninstall().unwrap();
        assert!(!fixture.interceptor.is_attached(BASE + 0x100));

        let probe = fixture.install(resolved(0x200), &signature).unwrap();
        drop(probe);
        assert!(!fixture.interceptor.is_attached(BASE + 0x200));

        fixture.interceptor.invoke(BASE + 0x200, &[DATA, 4, 0], |_| 0);
        assert!(fixture.events.try_recv().is_err());
    }
}
