//! Forwarding of OS signals to a running supervisor.

use std::io;

use tokio::{
    signal::unix::{signal, SignalKind},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::supervisor::{handle::SupervisorHandle, Interruption};

/// Listens for SIGINT, SIGTERM, SIGHUP and SIGABRT and turns each into an
/// interruption of `handle`, until `token` is cancelled or the supervisor is gone.
///
/// The handlers are installed before this returns, so from then on those
/// signals no longer terminate the supervisor itself.
pub fn forward_signals(
    handle: SupervisorHandle,
    token: CancellationToken,
) -> io::Result<JoinHandle<()>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigabrt = signal(SignalKind::from_raw(nix::libc::SIGABRT))?;
    debug!("signal handlers registered (SIGINT, SIGTERM, SIGHUP, SIGABRT)");

    Ok(tokio::spawn(async move {
        loop {
            let cause = tokio::select! {
                _ = token.cancelled() => break,
                _ = sigint.recv() => Interruption::Interrupt,
                _ = sigterm.recv() => Interruption::Terminate,
                _ = sighup.recv() => Interruption::Hangup,
                _ = sigabrt.recv() => Interruption::Abort,
            };
            info!(%cause, "received signal");
            if let Err(err) = handle.send(cause) {
                warn!(error = %err, "supervisor is gone, no longer forwarding signals");
                break;
            }
        }
    }))
}
