use crate::error::Error;
use crate::signals::cancel_on_signal;
use config::Config;
use kernel::{MemoryReader, ProcessMemory};
use orchestrator::clock::SystemClock;
use orchestrator::domain::{ModuleDescriptor, ProbeTarget};
use orchestrator::locator::{ModuleLocator, ProcMapsLocator, WaitOptions, wait_until_resolvable};
use std::io::Write;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Print the base of `module` and the probe address inside it.
pub fn locate(config: &Config, pid: i32, module: Option<String>, out: &mut impl Write) -> anyhow::Result<()> {
    let name = module.unwrap_or_else(|| config.target.module.clone());
    let locator = ProcMapsLocator::new(pid, config.target.match_strategy);
    let base = locator
        .resolve(&name)
        .ok_or_else(|| Error::NotLoaded(name.clone()))?;

    let target = ProbeTarget::new(ModuleDescriptor::resolved(&name, base), config.target.offset);
    writeln!(out, "{name} base={base:#x}")?;
    writeln!(
        out,
        "{} offset={:#x} address={:#x}",
        config.target.function,
        config.target.offset,
        target.address()?
    )?;
    Ok(())
}

/// Poll until `module` is mapped in `pid`, then print its base.
pub async fn wait(config: &Config, pid: i32, module: Option<String>, out: &mut impl Write) -> anyhow::Result<()> {
    let name = module.unwrap_or_else(|| config.target.module.clone());
    let locator = ProcMapsLocator::new(pid, config.target.match_strategy);
    let options = WaitOptions::from_config(&config.watch);

    let cancel = CancellationToken::new();
    let signals = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(err) = cancel_on_signal(cancel).await {
                error!(%err, "signal handling failed");
            }
        }
    });

    debug!(pid, module = %name, ?options, "waiting for module");
    let waited = wait_until_resolvable(&locator, &SystemClock, &name, &options, &cancel, None).await;
    signals.abort();

    let module = waited?;
    if let Some(base) = module.base_address() {
        writeln!(out, "{} base={base:#x}", module.name())?;
    }
    Ok(())
}

/// Read `length` bytes at `address` in `pid` and print them as hex.
pub fn read(config: &Config, pid: i32, address: usize, length: usize, out: &mut impl Write) -> anyhow::Result<()> {
    let max = config.capture.max_bytes;
    if length > max {
        return Err(Error::ReadTooLong { length, max }.into());
    }
    let memory = ProcessMemory::new(pid);
    let bytes = memory.read(address, length)?;
    writeln!(out, "{}", hex::encode(bytes))?;
    Ok(())
}

pub fn show_config(config: &Config, out: &mut impl Write) -> anyhow::Result<()> {
    write!(out, "{}", config.to_toml()?)?;
    Ok(())
}
