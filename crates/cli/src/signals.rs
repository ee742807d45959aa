use crate::error::Error;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Waits for the first termination signal.
pub async fn wait_for_signal() -> Result<SignalEvent, Error> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(Error::SignalHandler)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(Error::SignalHandler)?;

    tokio::select! {
        _ = sigint.recv() => Ok(SignalEvent::SigINT),
        _ = sigterm.recv() => Ok(SignalEvent::SigTERM),
    }
}

/// Cancels `cancel` once a termination signal arrives.
pub async fn cancel_on_signal(cancel: CancellationToken) -> Result<(), Error> {
    let event = wait_for_signal().await?;
    info!(?event, "stopping");
    cancel.cancel();
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    SigINT,
    SigTERM,
}
